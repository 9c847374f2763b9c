#![forbid(unsafe_code)]

use fbl_dtype::{ComplexElement, DeviceCopy, Element, RealElement};
use fbl_layout::{Fill, Operation, packed_index};

use crate::{Accelerator, BlasStatus, DeviceAddr, Handle, PointerMode, ScalarArg, TransportError};

/// `A := alpha * x * x^H + A`, strided over `batch_count` problems.
///
/// The plain entry point is a batch of one with zero strides.
#[derive(Debug, Clone, Copy)]
pub struct HerCall<'a, R> {
    pub uplo: Fill,
    pub n: i64,
    pub alpha: ScalarArg<'a, R>,
    pub x: Option<DeviceAddr>,
    pub incx: i64,
    pub stride_x: i64,
    pub a: Option<DeviceAddr>,
    pub lda: i64,
    pub stride_a: i64,
    pub batch_count: i64,
}

/// `AP := alpha * x * x^H + AP` on packed storage.
#[derive(Debug, Clone, Copy)]
pub struct HprCall<'a, R> {
    pub uplo: Fill,
    pub n: i64,
    pub alpha: ScalarArg<'a, R>,
    pub x: Option<DeviceAddr>,
    pub incx: i64,
    pub stride_x: i64,
    pub ap: Option<DeviceAddr>,
    pub stride_ap: i64,
    pub batch_count: i64,
}

/// `C := alpha * op(A) * op(A)^H + beta * C`
#[derive(Debug, Clone, Copy)]
pub struct HerkCall<'a, R> {
    pub uplo: Fill,
    pub trans: Operation,
    pub n: i64,
    pub k: i64,
    pub alpha: ScalarArg<'a, R>,
    pub a: Option<DeviceAddr>,
    pub lda: i64,
    pub stride_a: i64,
    pub beta: ScalarArg<'a, R>,
    pub c: Option<DeviceAddr>,
    pub ldc: i64,
    pub stride_c: i64,
    pub batch_count: i64,
}

/// `C := alpha * op(A) * op(B)^H + conj(alpha) * op(B) * op(A)^H + beta * C`
#[derive(Debug, Clone, Copy)]
pub struct Her2kCall<'a, T: ComplexElement> {
    pub uplo: Fill,
    pub trans: Operation,
    pub n: i64,
    pub k: i64,
    pub alpha: ScalarArg<'a, T>,
    pub a: Option<DeviceAddr>,
    pub lda: i64,
    pub stride_a: i64,
    pub b: Option<DeviceAddr>,
    pub ldb: i64,
    pub stride_b: i64,
    pub beta: ScalarArg<'a, T::Real>,
    pub c: Option<DeviceAddr>,
    pub ldc: i64,
    pub stride_c: i64,
    pub batch_count: i64,
}

/// The accelerator kernel library under test.
///
/// Element type `T` is not inferable from the real-scalar call records, so
/// callers name it: `blas.her::<Complex<f32>>(&handle, &call)`.
pub trait HermitianBlas<A: Accelerator> {
    fn her<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HerCall<'_, T::Real>,
    ) -> BlasStatus;

    fn hpr<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HprCall<'_, T::Real>,
    ) -> BlasStatus;

    fn herk<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HerkCall<'_, T::Real>,
    ) -> BlasStatus;

    fn her2k<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &Her2kCall<'_, T>,
    ) -> BlasStatus;
}

/// Deliberate kernel faults, used to prove the harness catches them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KernelDefect {
    #[default]
    None,
    /// Multiplies through by a zero `alpha` or `beta` instead of skipping the read.
    ReadsZeroScaledInputs,
    /// Reads `alpha = beta = 1` in device pointer mode.
    IgnoresDeviceScalars,
    /// Also writes the conjugate into the unselected triangle.
    WritesOppositeTriangle,
    /// Leaves the last problem of a batch untouched.
    SkipsLastBatch,
    /// Keeps the imaginary part of diagonal entries.
    LeavesImaginaryDiagonal,
    /// Moves every written real part this many ULP away from zero.
    PerturbsResult { ulps: u32 },
    /// Reports success for invalid sizes.
    AcceptsInvalidSizes,
}

/// Element-parallel implementation of the Hermitian updates over any
/// [`Accelerator`]: every output entry is computed independently from the
/// inputs as they were before the launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmulatedBlas {
    defect: KernelDefect,
}

impl EmulatedBlas {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            defect: KernelDefect::None,
        }
    }

    #[must_use]
    pub const fn with_defect(defect: KernelDefect) -> Self {
        Self { defect }
    }

    #[must_use]
    pub const fn defect(&self) -> KernelDefect {
        self.defect
    }

    fn reject_invalid(&self) -> BlasStatus {
        if self.defect == KernelDefect::AcceptsInvalidSizes {
            BlasStatus::Success
        } else {
            BlasStatus::InvalidValue
        }
    }

    fn active_batches(&self, batch_count: usize) -> usize {
        if self.defect == KernelDefect::SkipsLastBatch && batch_count > 1 {
            batch_count - 1
        } else {
            batch_count
        }
    }

    fn resolve_scalar<S: DeviceCopy, A: Accelerator>(
        &self,
        handle: &Handle<'_, A>,
        arg: ScalarArg<'_, S>,
        ignored_value: S,
    ) -> Result<S, BlasStatus> {
        match (handle.pointer_mode(), arg) {
            (_, ScalarArg::Null) => Err(BlasStatus::InvalidValue),
            (PointerMode::Host, ScalarArg::Host(value)) => Ok(*value),
            (PointerMode::Device, ScalarArg::Device(addr)) => {
                if self.defect == KernelDefect::IgnoresDeviceScalars {
                    return Ok(ignored_value);
                }
                let mut slot = [S::default()];
                handle
                    .device()
                    .download(addr, &mut slot)
                    .map_err(|_| BlasStatus::InternalError)?;
                Ok(slot[0])
            }
            _ => Err(BlasStatus::InternalError),
        }
    }

    fn finish<E: Element>(&self, value: E, diagonal: bool, previous: E) -> E {
        let value = if diagonal && self.defect != KernelDefect::LeavesImaginaryDiagonal {
            value.real_part()
        } else if diagonal {
            E::from_parts(value.re(), previous.im())
        } else {
            value
        };
        match self.defect {
            KernelDefect::PerturbsResult { ulps } => {
                E::from_parts(value.re().nudge(ulps), value.im())
            }
            _ => value,
        }
    }

    fn skip_zero_alpha(&self) -> bool {
        self.defect != KernelDefect::ReadsZeroScaledInputs
    }
}

/// Positive dimension converted for indexing; callers have validated signs.
fn to_usize(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn extent(footprint: usize, stride: usize, batch_count: usize) -> usize {
    if batch_count == 0 || footprint == 0 {
        return 0;
    }
    footprint + stride * (batch_count - 1)
}

fn fetch<E: DeviceCopy, A: Accelerator>(
    device: &A,
    addr: DeviceAddr,
    len: usize,
) -> Result<Vec<E>, TransportError> {
    let mut host = vec![E::default(); len];
    device.download(addr, &mut host)?;
    Ok(host)
}

fn status_of(result: Result<(), TransportError>) -> BlasStatus {
    match result {
        Ok(()) => BlasStatus::Success,
        Err(_) => BlasStatus::InternalError,
    }
}

/// `op(X)[row, l]` for a stored column-major `X`.
fn op_entry<T: ComplexElement>(
    trans: Operation,
    data: &[T],
    base: usize,
    ld: usize,
    row: usize,
    l: usize,
) -> T {
    match trans {
        Operation::None => data[base + row + l * ld],
        _ => data[base + l + row * ld].conj(),
    }
}

/// Indices of the `uplo` triangle of an `n x n` matrix as `(row, col)`.
fn triangle(uplo: Fill, n: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n).flat_map(move |col| {
        (0..n)
            .filter(move |&row| uplo.contains(row, col))
            .map(move |row| (row, col))
    })
}

impl EmulatedBlas {
    /// `update + beta * previous`; `beta == 0` discards `previous` unread.
    fn combine<T: ComplexElement>(
        &self,
        update: T,
        beta: T::Real,
        previous: T,
        diagonal: bool,
    ) -> T {
        let previous = if diagonal {
            previous.real_part()
        } else {
            previous
        };
        if beta == T::Real::ZERO && self.defect != KernelDefect::ReadsZeroScaledInputs {
            update
        } else {
            update + previous.scale(beta)
        }
    }

    fn rank_one<T: ComplexElement, A: Accelerator>(
        &self,
        device: &A,
        kernel: &'static str,
        dims: RankOneDims,
        alpha: T::Real,
        x_addr: DeviceAddr,
        out_addr: DeviceAddr,
    ) -> Result<(), TransportError> {
        device.enqueue(kernel)?;
        let RankOneDims {
            uplo,
            n,
            incx,
            stride_x,
            ld,
            stride_out,
            batch_count,
        } = dims;
        let footprint = match ld {
            Some(ld) => ld * n,
            None => n * (n + 1) / 2,
        };
        let x: Vec<T> = fetch(device, x_addr, extent(n * incx, stride_x, batch_count))?;
        let before: Vec<T> = fetch(device, out_addr, extent(footprint, stride_out, batch_count))?;
        let mut after = before.clone();
        for batch in 0..self.active_batches(batch_count) {
            let xb = batch * stride_x;
            let ob = batch * stride_out;
            for (row, col) in triangle(uplo, n) {
                let offset = match ld {
                    Some(ld) => Some(row + col * ld),
                    None => packed_index(uplo, n, row, col),
                };
                let Some(offset) = offset else {
                    continue;
                };
                let idx = ob + offset;
                let outer = (x[xb + row * incx] * x[xb + col * incx].conj()).scale(alpha);
                let diagonal = row == col;
                let value = if diagonal {
                    T::from_real(before[idx].re() + outer.re())
                } else {
                    before[idx] + outer
                };
                after[idx] = self.finish(value, diagonal, before[idx]);
                if let (Some(ld), false, KernelDefect::WritesOppositeTriangle) =
                    (ld, diagonal, self.defect)
                {
                    after[ob + col + row * ld] = after[idx].conj();
                }
            }
        }
        device.upload(out_addr, &after)
    }

    /// Shared body of herk (`b` absent, real `alpha`) and her2k.
    fn rank_k<T: ComplexElement, A: Accelerator>(
        &self,
        device: &A,
        kernel: &'static str,
        dims: RankKDims,
        alpha: T,
        beta: T::Real,
        arrays: RankKArrays,
    ) -> Result<(), TransportError> {
        device.enqueue(kernel)?;
        let RankKDims {
            uplo,
            trans,
            n,
            k,
            lda,
            stride_a,
            ldb,
            stride_b,
            ldc,
            stride_c,
            batch_count,
        } = dims;
        let skip_inputs = alpha.is_zero() && self.skip_zero_alpha();
        let inner_cols = if trans == Operation::None { k } else { n };
        let a: Vec<T> = match arrays.a {
            Some(addr) if !skip_inputs => {
                fetch(device, addr, extent(lda * inner_cols, stride_a, batch_count))?
            }
            _ => Vec::new(),
        };
        let b: Vec<T> = match arrays.b {
            Some(addr) if !skip_inputs => {
                fetch(device, addr, extent(ldb * inner_cols, stride_b, batch_count))?
            }
            _ => a.clone(),
        };
        let rank_two = arrays.b.is_some();
        let before: Vec<T> = fetch(device, arrays.c, extent(ldc * n, stride_c, batch_count))?;
        let mut after = before.clone();
        for batch in 0..self.active_batches(batch_count) {
            let a_base = batch * stride_a;
            let b_base = batch * if rank_two { stride_b } else { stride_a };
            let b_ld = if rank_two { ldb } else { lda };
            let cb = batch * stride_c;
            for (row, col) in triangle(uplo, n) {
                let idx = cb + row + col * ldc;
                let mut ab = T::zero();
                let mut ba = T::zero();
                if !skip_inputs {
                    for l in 0..k {
                        ab = ab
                            + op_entry(trans, &a, a_base, lda, row, l)
                                * op_entry(trans, &b, b_base, b_ld, col, l).conj();
                        if rank_two {
                            ba = ba
                                + op_entry(trans, &b, b_base, b_ld, row, l)
                                    * op_entry(trans, &a, a_base, lda, col, l).conj();
                        }
                    }
                }
                let update = if rank_two {
                    alpha * ab + alpha.conj() * ba
                } else {
                    ab.scale(alpha.re())
                };
                let diagonal = row == col;
                let value = self.combine(update, beta, before[idx], diagonal);
                after[idx] = self.finish(value, diagonal, before[idx]);
                if !diagonal && self.defect == KernelDefect::WritesOppositeTriangle {
                    after[cb + col + row * ldc] = after[idx].conj();
                }
            }
        }
        device.upload(arrays.c, &after)
    }
}

#[derive(Debug, Clone, Copy)]
struct RankOneDims {
    uplo: Fill,
    n: usize,
    incx: usize,
    stride_x: usize,
    /// `None` for packed output.
    ld: Option<usize>,
    stride_out: usize,
    batch_count: usize,
}

#[derive(Debug, Clone, Copy)]
struct RankKDims {
    uplo: Fill,
    trans: Operation,
    n: usize,
    k: usize,
    lda: usize,
    stride_a: usize,
    ldb: usize,
    stride_b: usize,
    ldc: usize,
    stride_c: usize,
    batch_count: usize,
}

/// Device arrays of a rank-k launch after argument checks.
struct RankKArrays {
    a: Option<DeviceAddr>,
    b: Option<DeviceAddr>,
    c: DeviceAddr,
}

macro_rules! resolve_or_return {
    ($blas:expr, $handle:expr, $arg:expr, $ignored:expr) => {
        match $blas.resolve_scalar($handle, $arg, $ignored) {
            Ok(value) => value,
            Err(status) => return status,
        }
    };
}

impl<A: Accelerator> HermitianBlas<A> for EmulatedBlas {
    fn her<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HerCall<'_, T::Real>,
    ) -> BlasStatus {
        if call.n < 0 || call.incx <= 0 || call.lda < call.n || call.lda < 1 || call.batch_count < 0
        {
            return self.reject_invalid();
        }
        if call.n == 0 || call.batch_count == 0 {
            return BlasStatus::Success;
        }
        let alpha = resolve_or_return!(self, handle, call.alpha, T::Real::ONE);
        if alpha == T::Real::ZERO && self.skip_zero_alpha() {
            return BlasStatus::Success;
        }
        let (Some(x), Some(a)) = (call.x, call.a) else {
            return BlasStatus::InvalidValue;
        };
        let dims = RankOneDims {
            uplo: call.uplo,
            n: to_usize(call.n),
            incx: to_usize(call.incx),
            stride_x: to_usize(call.stride_x),
            ld: Some(to_usize(call.lda)),
            stride_out: to_usize(call.stride_a),
            batch_count: to_usize(call.batch_count),
        };
        status_of(self.rank_one::<T, A>(handle.device(), "her", dims, alpha, x, a))
    }

    fn hpr<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HprCall<'_, T::Real>,
    ) -> BlasStatus {
        if call.n < 0 || call.incx <= 0 || call.batch_count < 0 {
            return self.reject_invalid();
        }
        if call.n == 0 || call.batch_count == 0 {
            return BlasStatus::Success;
        }
        let alpha = resolve_or_return!(self, handle, call.alpha, T::Real::ONE);
        if alpha == T::Real::ZERO && self.skip_zero_alpha() {
            return BlasStatus::Success;
        }
        let (Some(x), Some(ap)) = (call.x, call.ap) else {
            return BlasStatus::InvalidValue;
        };
        let dims = RankOneDims {
            uplo: call.uplo,
            n: to_usize(call.n),
            incx: to_usize(call.incx),
            stride_x: to_usize(call.stride_x),
            ld: None,
            stride_out: to_usize(call.stride_ap),
            batch_count: to_usize(call.batch_count),
        };
        status_of(self.rank_one::<T, A>(handle.device(), "hpr", dims, alpha, x, ap))
    }

    fn herk<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &HerkCall<'_, T::Real>,
    ) -> BlasStatus {
        let inner_rows = if call.trans == Operation::None { call.n } else { call.k };
        if call.trans == Operation::Transpose
            || call.n < 0
            || call.k < 0
            || call.ldc < call.n
            || call.lda < inner_rows
            || call.batch_count < 0
        {
            return self.reject_invalid();
        }
        if call.n == 0 || call.batch_count == 0 {
            return BlasStatus::Success;
        }
        let alpha = resolve_or_return!(self, handle, call.alpha, T::Real::ONE);
        let beta = resolve_or_return!(self, handle, call.beta, T::Real::ONE);
        if (alpha == T::Real::ZERO || call.k == 0) && beta == T::Real::ONE {
            return BlasStatus::Success;
        }
        let reads_a = call.k > 0 && (alpha != T::Real::ZERO || !self.skip_zero_alpha());
        let (Some(c), true) = (call.c, call.a.is_some() || !reads_a) else {
            return BlasStatus::InvalidValue;
        };
        let dims = RankKDims {
            uplo: call.uplo,
            trans: call.trans,
            n: to_usize(call.n),
            k: to_usize(call.k),
            lda: to_usize(call.lda),
            stride_a: to_usize(call.stride_a),
            ldb: to_usize(call.lda),
            stride_b: to_usize(call.stride_a),
            ldc: to_usize(call.ldc),
            stride_c: to_usize(call.stride_c),
            batch_count: to_usize(call.batch_count),
        };
        let arrays = RankKArrays {
            a: call.a,
            b: None,
            c,
        };
        let alpha = T::from_real(alpha);
        status_of(self.rank_k::<T, A>(handle.device(), "herk", dims, alpha, beta, arrays))
    }

    fn her2k<T: ComplexElement>(
        &self,
        handle: &Handle<'_, A>,
        call: &Her2kCall<'_, T>,
    ) -> BlasStatus {
        let inner_rows = if call.trans == Operation::None { call.n } else { call.k };
        if call.trans == Operation::Transpose
            || call.n < 0
            || call.k < 0
            || call.ldc < call.n
            || call.lda < inner_rows
            || call.ldb < inner_rows
            || call.batch_count < 0
        {
            return self.reject_invalid();
        }
        if call.n == 0 || call.batch_count == 0 {
            return BlasStatus::Success;
        }
        let alpha = resolve_or_return!(self, handle, call.alpha, T::from_real(T::Real::ONE));
        let beta = resolve_or_return!(self, handle, call.beta, T::Real::ONE);
        if (alpha.is_zero() || call.k == 0) && beta == T::Real::ONE {
            return BlasStatus::Success;
        }
        let reads_inputs = call.k > 0 && (!alpha.is_zero() || !self.skip_zero_alpha());
        let inputs_present = call.a.is_some() && call.b.is_some();
        let (Some(c), true) = (call.c, inputs_present || !reads_inputs) else {
            return BlasStatus::InvalidValue;
        };
        let dims = RankKDims {
            uplo: call.uplo,
            trans: call.trans,
            n: to_usize(call.n),
            k: to_usize(call.k),
            lda: to_usize(call.lda),
            stride_a: to_usize(call.stride_a),
            ldb: to_usize(call.ldb),
            stride_b: to_usize(call.stride_b),
            ldc: to_usize(call.ldc),
            stride_c: to_usize(call.stride_c),
            batch_count: to_usize(call.batch_count),
        };
        let arrays = RankKArrays {
            a: call.a,
            b: call.b,
            c,
        };
        status_of(self.rank_k::<T, A>(handle.device(), "her2k", dims, alpha, beta, arrays))
    }
}
