#![forbid(unsafe_code)]

//! Per-routine descriptors driving the generic case engine.

use fbl_device::{
    Accelerator, BlasStatus, DeviceAddr, Handle, Her2kCall, HerCall, HerkCall, HermitianBlas,
    HprCall, ScalarArg,
};
use fbl_dtype::{ComplexElement, ScalarValue};
use fbl_layout::{ArrayLayout, Operation, ShapeError, Storage, dim};
use fbl_random::{ArrayRole, FillSpec, MatrixKind, NanPolicy};
use fbl_reference::{HostReference, ReferenceError};

use crate::arguments::{Function, TestCase};

/// Outcome of the argument check a conforming kernel performs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validity {
    Valid,
    /// Legal sizes describing no work: `N == 0` or `batch_count == 0`.
    Empty,
    Invalid,
}

impl Validity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Empty => "empty",
            Self::Invalid => "invalid",
        }
    }

    /// Status the kernel must return when probed with null arguments.
    #[must_use]
    pub const fn probe_status(self) -> Option<BlasStatus> {
        match self {
            Self::Valid => None,
            Self::Empty => Some(BlasStatus::Success),
            Self::Invalid => Some(BlasStatus::InvalidValue),
        }
    }
}

/// One logical array of a case and how its host source is generated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArraySpec {
    pub role: ArrayRole,
    pub layout: ArrayLayout,
    pub fill: FillSpec,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operands {
    pub inputs: Vec<ArraySpec>,
    pub output: ArraySpec,
}

/// Device side of one array argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOperand {
    pub addr: Option<DeviceAddr>,
    pub stride: i64,
}

impl DeviceOperand {
    pub const NULL: Self = Self {
        addr: None,
        stride: 0,
    };
}

/// Everything a launch needs beyond the case itself.
#[derive(Debug, Clone, Copy)]
pub struct LaunchArgs<'a, S, R> {
    pub alpha: ScalarArg<'a, S>,
    pub beta: ScalarArg<'a, R>,
    pub inputs: &'a [DeviceOperand],
    pub output: DeviceOperand,
}

impl<S, R> LaunchArgs<'_, S, R> {
    /// Null buffers and null scalars, used to probe quick returns.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            alpha: ScalarArg::Null,
            beta: ScalarArg::Null,
            inputs: &[],
            output: DeviceOperand::NULL,
        }
    }

    fn input(&self, slot: usize) -> DeviceOperand {
        self.inputs.get(slot).copied().unwrap_or(DeviceOperand::NULL)
    }
}

/// Routine-specific knowledge: shapes, data roles, launch and reference call.
pub trait KernelFamily<T: ComplexElement> {
    const FUNCTION: Function;
    const HAS_BETA: bool;

    /// Real for the rank-1 and rank-k updates, complex for her2k.
    type Alpha: ScalarValue;

    fn validity(case: &TestCase) -> Validity;

    /// Layouts and fills of the arguments of a valid case.
    fn operands(case: &TestCase) -> Result<Operands, ShapeError>;

    fn launch<A: Accelerator, B: HermitianBlas<A>>(
        blas: &B,
        handle: &Handle<'_, A>,
        case: &TestCase,
        args: &LaunchArgs<'_, Self::Alpha, T::Real>,
    ) -> BlasStatus;

    /// Apply the reference update to one batch element.
    fn reference<R: HostReference>(
        reference: &R,
        case: &TestCase,
        alpha: Self::Alpha,
        beta: T::Real,
        inputs: &[&[T]],
        output: &mut [T],
    ) -> Result<(), ReferenceError>;

    fn gflop_count(case: &TestCase) -> f64;

    fn gbyte_count(case: &TestCase) -> f64;
}

fn udim(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn tri(n: f64) -> f64 {
    n * (n + 1.0) / 2.0
}

fn batches(case: &TestCase) -> f64 {
    case.batch_count.max(0) as f64
}

fn item_size(case: &TestCase) -> f64 {
    case.dtype.item_size() as f64
}

fn layout(case: &TestCase, storage: Storage) -> Result<ArrayLayout, ShapeError> {
    if case.is_batched() {
        ArrayLayout::batched(storage, case.stride_scale, dim(case.batch_count)?)
    } else {
        ArrayLayout::single(storage)
    }
}

/// Stored shape of `op(X)` for an `N x K` product.
fn op_storage(case: &TestCase, ld: i64) -> Result<Storage, ShapeError> {
    let (n, k) = (dim(case.n)?, dim(case.k)?);
    let (rows, cols) = if case.trans.is_transposed() {
        (k, n)
    } else {
        (n, k)
    };
    Ok(Storage::Dense {
        rows,
        cols,
        ld: dim(ld)?,
    })
}

fn square_storage(case: &TestCase, ld: i64) -> Result<Storage, ShapeError> {
    let n = dim(case.n)?;
    Ok(Storage::Dense {
        rows: n,
        cols: n,
        ld: dim(ld)?,
    })
}

fn sized(case: &TestCase, invalid: bool) -> Validity {
    if invalid {
        Validity::Invalid
    } else if case.n == 0 || case.batch_count == 0 {
        Validity::Empty
    } else {
        Validity::Valid
    }
}

fn rank_k_invalid(case: &TestCase, extra_ld: Option<i64>) -> bool {
    let inner_rows = if case.trans.is_transposed() {
        case.k
    } else {
        case.n
    };
    case.trans == Operation::Transpose
        || case.n < 0
        || case.k < 0
        || case.ldc < case.n
        || case.lda < inner_rows
        || extra_ld.is_some_and(|ld| ld < inner_rows)
        || case.batch_count < 0
}

/// The rank-1 update `A := alpha * x * x^H + A`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Her;

/// The packed rank-1 update `AP := alpha * x * x^H + AP`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hpr;

/// The rank-k update `C := alpha * op(A) * op(A)^H + beta * C`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Herk;

/// The rank-2k update
/// `C := alpha * op(A) * op(B)^H + conj(alpha) * op(B) * op(A)^H + beta * C`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Her2k;

fn x_spec(case: &TestCase) -> Result<ArraySpec, ShapeError> {
    Ok(ArraySpec {
        role: ArrayRole::X,
        layout: layout(
            case,
            Storage::Vector {
                len: dim(case.n)?,
                inc: dim(case.incx)?,
            },
        )?,
        fill: FillSpec::new(MatrixKind::General, NanPolicy::AlphaSetsNan).alternating(),
    })
}

impl<T: ComplexElement> KernelFamily<T> for Her {
    const FUNCTION: Function = Function::Her;
    const HAS_BETA: bool = false;
    type Alpha = T::Real;

    fn validity(case: &TestCase) -> Validity {
        let invalid = case.n < 0
            || case.incx <= 0
            || case.lda < case.n
            || case.lda < 1
            || case.batch_count < 0;
        sized(case, invalid)
    }

    fn operands(case: &TestCase) -> Result<Operands, ShapeError> {
        Ok(Operands {
            inputs: vec![x_spec(case)?],
            output: ArraySpec {
                role: ArrayRole::A,
                layout: layout(case, square_storage(case, case.lda)?)?,
                fill: FillSpec::new(MatrixKind::Hermitian, NanPolicy::Never),
            },
        })
    }

    fn launch<A: Accelerator, B: HermitianBlas<A>>(
        blas: &B,
        handle: &Handle<'_, A>,
        case: &TestCase,
        args: &LaunchArgs<'_, T::Real, T::Real>,
    ) -> BlasStatus {
        let x = args.input(0);
        let call = HerCall {
            uplo: case.uplo,
            n: case.n,
            alpha: args.alpha,
            x: x.addr,
            incx: case.incx,
            stride_x: x.stride,
            a: args.output.addr,
            lda: case.lda,
            stride_a: args.output.stride,
            batch_count: case.batch_count,
        };
        blas.her::<T>(handle, &call)
    }

    fn reference<R: HostReference>(
        reference: &R,
        case: &TestCase,
        alpha: T::Real,
        _beta: T::Real,
        inputs: &[&[T]],
        output: &mut [T],
    ) -> Result<(), ReferenceError> {
        let x = inputs
            .first()
            .ok_or(ReferenceError::ShapeContractViolation("her needs x"))?;
        reference.her(
            case.uplo,
            udim(case.n),
            alpha,
            x,
            udim(case.incx),
            output,
            udim(case.lda),
        )
    }

    fn gflop_count(case: &TestCase) -> f64 {
        8.0 * tri(case.n as f64) * batches(case) / 1e9
    }

    fn gbyte_count(case: &TestCase) -> f64 {
        let n = case.n as f64;
        item_size(case) * (2.0 * tri(n) + n) * batches(case) / 1e9
    }
}

impl<T: ComplexElement> KernelFamily<T> for Hpr {
    const FUNCTION: Function = Function::Hpr;
    const HAS_BETA: bool = false;
    type Alpha = T::Real;

    fn validity(case: &TestCase) -> Validity {
        sized(case, case.n < 0 || case.incx <= 0 || case.batch_count < 0)
    }

    fn operands(case: &TestCase) -> Result<Operands, ShapeError> {
        Ok(Operands {
            inputs: vec![x_spec(case)?],
            output: ArraySpec {
                role: ArrayRole::A,
                layout: layout(case, Storage::Packed { n: dim(case.n)? })?,
                fill: FillSpec::new(MatrixKind::PackedHermitian(case.uplo), NanPolicy::Never),
            },
        })
    }

    fn launch<A: Accelerator, B: HermitianBlas<A>>(
        blas: &B,
        handle: &Handle<'_, A>,
        case: &TestCase,
        args: &LaunchArgs<'_, T::Real, T::Real>,
    ) -> BlasStatus {
        let x = args.input(0);
        let call = HprCall {
            uplo: case.uplo,
            n: case.n,
            alpha: args.alpha,
            x: x.addr,
            incx: case.incx,
            stride_x: x.stride,
            ap: args.output.addr,
            stride_ap: args.output.stride,
            batch_count: case.batch_count,
        };
        blas.hpr::<T>(handle, &call)
    }

    fn reference<R: HostReference>(
        reference: &R,
        case: &TestCase,
        alpha: T::Real,
        _beta: T::Real,
        inputs: &[&[T]],
        output: &mut [T],
    ) -> Result<(), ReferenceError> {
        let x = inputs
            .first()
            .ok_or(ReferenceError::ShapeContractViolation("hpr needs x"))?;
        reference.hpr(case.uplo, udim(case.n), alpha, x, udim(case.incx), output)
    }

    fn gflop_count(case: &TestCase) -> f64 {
        8.0 * tri(case.n as f64) * batches(case) / 1e9
    }

    fn gbyte_count(case: &TestCase) -> f64 {
        let n = case.n as f64;
        item_size(case) * (2.0 * tri(n) + n) * batches(case) / 1e9
    }
}

impl<T: ComplexElement> KernelFamily<T> for Herk {
    const FUNCTION: Function = Function::Herk;
    const HAS_BETA: bool = true;
    type Alpha = T::Real;

    fn validity(case: &TestCase) -> Validity {
        sized(case, rank_k_invalid(case, None))
    }

    fn operands(case: &TestCase) -> Result<Operands, ShapeError> {
        Ok(Operands {
            inputs: vec![ArraySpec {
                role: ArrayRole::A,
                layout: layout(case, op_storage(case, case.lda)?)?,
                fill: FillSpec::new(MatrixKind::General, NanPolicy::AlphaSetsNan),
            }],
            output: ArraySpec {
                role: ArrayRole::C,
                layout: layout(case, square_storage(case, case.ldc)?)?,
                fill: FillSpec::new(MatrixKind::Hermitian, NanPolicy::BetaSetsNan).alternating(),
            },
        })
    }

    fn launch<A: Accelerator, B: HermitianBlas<A>>(
        blas: &B,
        handle: &Handle<'_, A>,
        case: &TestCase,
        args: &LaunchArgs<'_, T::Real, T::Real>,
    ) -> BlasStatus {
        let a = args.input(0);
        let call = HerkCall {
            uplo: case.uplo,
            trans: case.trans,
            n: case.n,
            k: case.k,
            alpha: args.alpha,
            a: a.addr,
            lda: case.lda,
            stride_a: a.stride,
            beta: args.beta,
            c: args.output.addr,
            ldc: case.ldc,
            stride_c: args.output.stride,
            batch_count: case.batch_count,
        };
        blas.herk::<T>(handle, &call)
    }

    fn reference<R: HostReference>(
        reference: &R,
        case: &TestCase,
        alpha: T::Real,
        beta: T::Real,
        inputs: &[&[T]],
        output: &mut [T],
    ) -> Result<(), ReferenceError> {
        let a = inputs
            .first()
            .ok_or(ReferenceError::ShapeContractViolation("herk needs A"))?;
        reference.herk(
            case.uplo,
            case.trans,
            udim(case.n),
            udim(case.k),
            alpha,
            a,
            udim(case.lda),
            beta,
            output,
            udim(case.ldc),
        )
    }

    fn gflop_count(case: &TestCase) -> f64 {
        8.0 * tri(case.n as f64) * case.k as f64 * batches(case) / 1e9
    }

    fn gbyte_count(case: &TestCase) -> f64 {
        let (n, k) = (case.n as f64, case.k as f64);
        item_size(case) * (2.0 * tri(n) + n * k) * batches(case) / 1e9
    }
}

impl<T: ComplexElement> KernelFamily<T> for Her2k {
    const FUNCTION: Function = Function::Her2k;
    const HAS_BETA: bool = true;
    type Alpha = T;

    fn validity(case: &TestCase) -> Validity {
        sized(case, rank_k_invalid(case, Some(case.ldb)))
    }

    fn operands(case: &TestCase) -> Result<Operands, ShapeError> {
        Ok(Operands {
            inputs: vec![
                ArraySpec {
                    role: ArrayRole::A,
                    layout: layout(case, op_storage(case, case.lda)?)?,
                    fill: FillSpec::new(MatrixKind::General, NanPolicy::AlphaSetsNan),
                },
                ArraySpec {
                    role: ArrayRole::B,
                    layout: layout(case, op_storage(case, case.ldb)?)?,
                    fill: FillSpec::new(MatrixKind::General, NanPolicy::Never).alternating(),
                },
            ],
            output: ArraySpec {
                role: ArrayRole::C,
                layout: layout(case, square_storage(case, case.ldc)?)?,
                fill: FillSpec::new(MatrixKind::Hermitian, NanPolicy::Never),
            },
        })
    }

    fn launch<A: Accelerator, B: HermitianBlas<A>>(
        blas: &B,
        handle: &Handle<'_, A>,
        case: &TestCase,
        args: &LaunchArgs<'_, T, T::Real>,
    ) -> BlasStatus {
        let (a, b) = (args.input(0), args.input(1));
        let call = Her2kCall::<T> {
            uplo: case.uplo,
            trans: case.trans,
            n: case.n,
            k: case.k,
            alpha: args.alpha,
            a: a.addr,
            lda: case.lda,
            stride_a: a.stride,
            b: b.addr,
            ldb: case.ldb,
            stride_b: b.stride,
            beta: args.beta,
            c: args.output.addr,
            ldc: case.ldc,
            stride_c: args.output.stride,
            batch_count: case.batch_count,
        };
        blas.her2k(handle, &call)
    }

    fn reference<R: HostReference>(
        reference: &R,
        case: &TestCase,
        alpha: T,
        beta: T::Real,
        inputs: &[&[T]],
        output: &mut [T],
    ) -> Result<(), ReferenceError> {
        let [a, b] = inputs else {
            return Err(ReferenceError::ShapeContractViolation("her2k needs A and B"));
        };
        reference.her2k(
            case.uplo,
            case.trans,
            udim(case.n),
            udim(case.k),
            alpha,
            a,
            udim(case.lda),
            b,
            udim(case.ldb),
            beta,
            output,
            udim(case.ldc),
        )
    }

    fn gflop_count(case: &TestCase) -> f64 {
        let (n, k) = (case.n as f64, case.k as f64);
        (16.0 * tri(n) * k + 2.0 * tri(n)) * batches(case) / 1e9
    }

    fn gbyte_count(case: &TestCase) -> f64 {
        let (n, k) = (case.n as f64, case.k as f64);
        item_size(case) * (2.0 * tri(n) + 2.0 * n * k) * batches(case) / 1e9
    }
}
