#![forbid(unsafe_code)]

use core::fmt;

use fbl_device::{
    Accelerator, BlasStatus, Handle, HermitianBlas, PointerMode, ScalarArg, TransportError,
};
use fbl_dtype::{ComplexElement, DType, DeviceCopy, Element, RealElement as _, ScalarValue};
use fbl_layout::ShapeError;
use fbl_random::{DataGenerator, GeneratorError, ScalarZeros};
use fbl_reference::{HostReference, ReferenceError};
use serde::Serialize;

use crate::arguments::TestCase;
use crate::check::{CheckFailure, Verdict, norm_check, unit_check};
use crate::family::{ArraySpec, DeviceOperand, KernelFamily, LaunchArgs, Validity};
use crate::mirror::{HostDeviceMirror, ScalarPair};
use crate::model::{LogRecord, test_name};
use crate::perf::{self, PerfError, Timing, WorkCounts};

/// Conditions that abort a run instead of failing a single case.
#[derive(Debug, Clone, PartialEq)]
pub enum HarnessError {
    Transport(TransportError),
    Layout(ShapeError),
    Generator(GeneratorError),
    Reference(ReferenceError),
    UnsupportedDType(DType),
}

impl HarnessError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(err) => err.reason_code(),
            Self::Layout(_) => "layout_overflow",
            Self::Generator(err) => err.reason_code(),
            Self::Reference(err) => err.reason_code(),
            Self::UnsupportedDType(_) => "harness_dtype_unsupported",
        }
    }
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "device transport failed: {err}"),
            Self::Layout(err) => write!(f, "array layout: {err}"),
            Self::Generator(err) => write!(f, "data generation: {err}"),
            Self::Reference(err) => write!(f, "reference evaluation: {err}"),
            Self::UnsupportedDType(dtype) => write!(f, "no Hermitian kernels for {dtype}"),
        }
    }
}

impl std::error::Error for HarnessError {}

impl From<TransportError> for HarnessError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<ShapeError> for HarnessError {
    fn from(err: ShapeError) -> Self {
        Self::Layout(err)
    }
}

impl From<GeneratorError> for HarnessError {
    fn from(err: GeneratorError) -> Self {
        Self::Generator(err)
    }
}

impl From<ReferenceError> for HarnessError {
    fn from(err: ReferenceError) -> Self {
        Self::Reference(err)
    }
}

/// SHA-256 fingerprints of the buffers a checked case compared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BufferDigests {
    pub gold: String,
    pub host_result: Option<String>,
    pub device_result: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaseReport {
    pub id: String,
    pub name: String,
    pub validity: Validity,
    /// Status of the null-argument probe, for quick-return cases.
    pub probe_status: Option<BlasStatus>,
    pub host_verdicts: Vec<Verdict>,
    pub device_verdicts: Vec<Verdict>,
    pub failures: Vec<CheckFailure>,
    pub timing: Option<Timing>,
    pub digests: Option<BufferDigests>,
    pub record: LogRecord,
}

impl CaseReport {
    fn new(case: &TestCase, validity: Validity) -> Self {
        Self {
            id: case.id.clone(),
            name: test_name(case),
            validity,
            probe_status: None,
            host_verdicts: Vec::new(),
            device_verdicts: Vec::new(),
            failures: Vec::new(),
            timing: None,
            digests: None,
            record: LogRecord::new(case),
        }
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Hex SHA-256 over the little-endian bits of every component, widened to `f64`.
#[must_use]
pub fn buffer_digest<T: Element>(data: &[T]) -> String {
    let mut bytes = Vec::with_capacity(data.len() * 16);
    for value in data {
        bytes.extend_from_slice(&value.re().to_f64().to_bits().to_le_bytes());
        bytes.extend_from_slice(&value.im().to_f64().to_bits().to_le_bytes());
    }
    crate::sha256_hex(&bytes)
}

fn generate<'d, T: ComplexElement, A: Accelerator>(
    device: &'d A,
    generator: &DataGenerator,
    spec: &ArraySpec,
    zeros: ScalarZeros,
) -> Result<HostDeviceMirror<'d, T, A>, HarnessError> {
    let mut host = vec![T::zero(); spec.layout.element_count()?];
    generator.fill(spec.role, &mut host, &spec.layout, spec.fill, zeros)?;
    Ok(HostDeviceMirror::new(device, spec.role, spec.layout, host)?)
}

fn operand<T: DeviceCopy, A: Accelerator>(
    case: &TestCase,
    mirror: &HostDeviceMirror<'_, T, A>,
) -> Result<DeviceOperand, ShapeError> {
    // Plain routines are a batch of one; their strides are unused.
    let stride = if case.is_batched() {
        i64::try_from(mirror.layout().stride).map_err(|_| ShapeError::Overflow)?
    } else {
        0
    };
    Ok(DeviceOperand {
        addr: Some(mirror.addr()),
        stride,
    })
}

fn launch_args<'a, S: DeviceCopy, R: DeviceCopy, A: Accelerator>(
    mode: PointerMode,
    alpha: &'a ScalarPair<'_, S, A>,
    beta: Option<&'a ScalarPair<'_, R, A>>,
    inputs: &'a [DeviceOperand],
    output: DeviceOperand,
) -> LaunchArgs<'a, S, R> {
    LaunchArgs {
        alpha: alpha.arg(mode),
        beta: beta.map_or(ScalarArg::Null, |pair| pair.arg(mode)),
        inputs,
        output,
    }
}

/// Run the reference update on a copy of the output source, batch by batch.
fn gold_result<T, F, R, A>(
    reference: &R,
    case: &TestCase,
    alpha: F::Alpha,
    beta: T::Real,
    inputs: &[HostDeviceMirror<'_, T, A>],
    output: &HostDeviceMirror<'_, T, A>,
) -> Result<Vec<T>, ReferenceError>
where
    T: ComplexElement,
    F: KernelFamily<T>,
    R: HostReference,
    A: Accelerator,
{
    let mut gold = output.host().to_vec();
    let layout = *output.layout();
    for batch in 0..layout.batch_count {
        let slices: Vec<&[T]> = inputs
            .iter()
            .map(|mirror| &mirror.host()[mirror.layout().batch_offset(batch)..])
            .collect();
        F::reference(
            reference,
            case,
            alpha,
            beta,
            &slices,
            &mut gold[layout.batch_offset(batch)..],
        )?;
    }
    Ok(gold)
}

/// Execute one test case end to end.
///
/// Quick-return cases are probed once with null buffers and scalars and
/// never touch device memory. Valid cases run in host pointer mode, get
/// their output restored, run in device pointer mode, and have both results
/// checked against the same gold. Transport failures abort with an error;
/// everything else is recorded in the report.
pub fn run_case<T, F, A, B, R>(
    case: &TestCase,
    device: &A,
    blas: &B,
    reference: &R,
) -> Result<CaseReport, HarnessError>
where
    T: ComplexElement,
    F: KernelFamily<T>,
    A: Accelerator,
    B: HermitianBlas<A>,
    R: HostReference,
{
    let mut report = CaseReport::new(case, F::validity(case));
    let mut handle = Handle::new(device);

    if let Some(expected) = report.validity.probe_status() {
        handle.set_pointer_mode(PointerMode::Host);
        let status = F::launch(blas, &handle, case, &LaunchArgs::null());
        report.probe_status = Some(status);
        if status != expected {
            report.failures.push(CheckFailure::KernelStatus {
                mode: PointerMode::Host,
                expected,
                actual: status,
            });
        }
        return Ok(report);
    }

    let operands = F::operands(case)?;
    let alpha = F::Alpha::from_case(case.alpha_re, case.alpha_im);
    let beta = T::Real::from_case(case.beta, 0.0);
    let zeros = ScalarZeros {
        alpha: alpha.is_exact_zero(),
        beta: F::HAS_BETA && beta.is_exact_zero(),
    };

    let generator = DataGenerator::new(case.seed);
    let inputs = operands
        .inputs
        .iter()
        .map(|spec| generate::<T, A>(device, &generator, spec, zeros))
        .collect::<Result<Vec<_>, _>>()?;
    let output = generate::<T, A>(device, &generator, &operands.output, zeros)?;
    let alpha_pair = ScalarPair::new(device, alpha)?;
    let beta_pair = if F::HAS_BETA {
        Some(ScalarPair::new(device, beta)?)
    } else {
        None
    };
    let input_operands = inputs
        .iter()
        .map(|mirror| operand(case, mirror))
        .collect::<Result<Vec<_>, _>>()?;
    let output_operand = operand(case, &output)?;
    let array = output.role().name();

    if case.unit_check || case.norm_check {
        let mut results: Vec<(PointerMode, Option<Vec<T>>)> = Vec::with_capacity(2);
        for mode in [PointerMode::Host, PointerMode::Device] {
            handle.set_pointer_mode(mode);
            let args = launch_args(
                mode,
                &alpha_pair,
                beta_pair.as_ref(),
                &input_operands,
                output_operand,
            );
            let status = F::launch(blas, &handle, case, &args);
            let result = output.fetch()?;
            if mode == PointerMode::Host {
                output.restore()?;
            }
            if status.is_success() {
                results.push((mode, Some(result)));
            } else {
                report.failures.push(CheckFailure::KernelStatus {
                    mode,
                    expected: BlasStatus::Success,
                    actual: status,
                });
                results.push((mode, None));
            }
        }

        let gold = gold_result::<T, F, R, A>(reference, case, alpha, beta, &inputs, &output)?;
        let region = output.layout().comparison_region();
        let tolerance = case.dtype.norm_tolerance();
        for (mode, result) in &results {
            let Some(result) = result else {
                continue;
            };
            let mut verdicts = Vec::new();
            if case.unit_check {
                match unit_check(&region, &gold, result) {
                    Ok(verdict) => verdicts.push(verdict),
                    Err(mismatch) => report.failures.push(CheckFailure::Unit {
                        mode: *mode,
                        array,
                        mismatch,
                    }),
                }
            }
            if case.norm_check {
                let verdict = norm_check(case.norm, &region, tolerance, &gold, result);
                if let Verdict::Normed { error, threshold } = verdict {
                    match mode {
                        PointerMode::Host => report.record.norm_error_host_ptr = Some(error),
                        PointerMode::Device => report.record.norm_error_device_ptr = Some(error),
                    }
                    if !verdict.passed() {
                        report.failures.push(CheckFailure::Norm {
                            mode: *mode,
                            array,
                            error,
                            threshold,
                        });
                    }
                }
                verdicts.push(verdict);
            }
            match mode {
                PointerMode::Host => report.host_verdicts = verdicts,
                PointerMode::Device => report.device_verdicts = verdicts,
            }
        }

        let digest_of = |mode: PointerMode| {
            results
                .iter()
                .find(|(m, _)| *m == mode)
                .and_then(|(_, result)| result.as_deref())
                .map(buffer_digest)
        };
        report.digests = Some(BufferDigests {
            gold: buffer_digest(&gold),
            host_result: digest_of(PointerMode::Host),
            device_result: digest_of(PointerMode::Device),
        });
    }

    if case.timing {
        let work = WorkCounts {
            gflop: F::gflop_count(case),
            gbyte: F::gbyte_count(case),
        };
        let args = launch_args(
            PointerMode::Device,
            &alpha_pair,
            beta_pair.as_ref(),
            &input_operands,
            output_operand,
        );
        let timed = perf::measure(
            &mut handle,
            &output,
            case.cold_iters,
            case.iters,
            work,
            |handle| F::launch(blas, handle, case, &args),
        );
        match timed {
            Ok(timing) => {
                report.record.gpu_us = Some(timing.gpu_us);
                report.record.gflops = Some(timing.gflops);
                report.record.gbytes_per_s = Some(timing.gbytes_per_s);
                report.timing = Some(timing);
            }
            Err(PerfError::Kernel(status)) => report.failures.push(CheckFailure::KernelStatus {
                mode: PointerMode::Device,
                expected: BlasStatus::Success,
                actual: status,
            }),
            Err(PerfError::Transport(err)) => return Err(err.into()),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{HarnessError, buffer_digest, operand, run_case};
    use crate::arguments::{Arguments, TestCase};
    use crate::check::{CheckFailure, Verdict};
    use crate::family::{Her, Her2k, Herk, Hpr, Validity};
    use crate::mirror::HostDeviceMirror;
    use fbl_device::{
        BlasStatus, EmulatedBlas, FaultPlan, HostEmulator, KernelDefect, PointerMode,
    };
    use fbl_layout::{ArrayLayout, ShapeError, Storage};
    use fbl_random::ArrayRole;
    use fbl_reference::NaiveReference;
    use num_complex::Complex;

    type C32 = Complex<f32>;
    type C64 = Complex<f64>;

    fn case(args: &Arguments) -> TestCase {
        TestCase::from_arguments(args).expect("fixture case")
    }

    #[test]
    fn quick_return_probe_touches_no_memory() {
        let device = HostEmulator::new();
        let blas = EmulatedBlas::new();
        for (args, validity, status) in [
            (Arguments::new("n0", "her", 0), Validity::Empty, BlasStatus::Success),
            (Arguments::new("neg", "her", -3), Validity::Invalid, BlasStatus::InvalidValue),
        ] {
            let report =
                run_case::<C32, Her, _, _, _>(&case(&args), &device, &blas, &NaiveReference)
                    .expect("probe");
            assert_eq!(report.validity, validity, "{}", args.id);
            assert_eq!(report.probe_status, Some(status), "{}", args.id);
            assert!(report.passed(), "{}: {:?}", args.id, report.failures);
            assert!(report.digests.is_none());
        }
        assert_eq!(device.stats().touches(), 0);
    }

    #[test]
    fn valid_case_checks_both_pointer_modes() {
        let device = HostEmulator::new();
        let mut args = Arguments::new("herk", "herk", 5);
        args.k = 3;
        args.alpha = 1.5;
        args.beta = 2.0;
        let blas = EmulatedBlas::new();
        let report = run_case::<C64, Herk, _, _, _>(&case(&args), &device, &blas, &NaiveReference)
            .expect("run");
        assert!(report.passed(), "{:?}", report.failures);
        assert_eq!(report.host_verdicts.len(), 2);
        assert_eq!(report.device_verdicts.len(), 2);
        assert!(matches!(report.host_verdicts[0], Verdict::Exact { .. }));
        let digests = report.digests.expect("digests");
        assert_eq!(digests.host_result, digests.device_result);
        let error = report.record.norm_error_device_ptr.expect("device norm error");
        assert!(error <= 1.0e-12, "{error}");
        assert_eq!(device.stats().live_buffers, 0, "scoped buffers released");
    }

    #[test]
    fn device_scalar_defect_fails_only_the_device_run() {
        let device = HostEmulator::new();
        let blas = EmulatedBlas::with_defect(KernelDefect::IgnoresDeviceScalars);
        let mut args = Arguments::new("her2k", "her2k", 4);
        args.k = 2;
        args.alpha = 2.0;
        args.alphai = -1.0;
        args.beta = 3.0;
        let report = run_case::<C32, Her2k, _, _, _>(&case(&args), &device, &blas, &NaiveReference)
            .expect("run");
        assert!(!report.passed());
        assert!(
            report
                .failures
                .iter()
                .all(|failure| failure.mode() == PointerMode::Device)
        );
        assert!(matches!(report.failures[0], CheckFailure::Unit { array: "C", .. }));
    }

    #[test]
    fn transport_failures_abort_the_case() {
        let device = HostEmulator::with_faults(FaultPlan {
            fail_upload_at: Some(0),
            ..FaultPlan::default()
        });
        let args = Arguments::new("hpr", "hpr", 3);
        let blas = EmulatedBlas::new();
        let err = run_case::<C64, Hpr, _, _, _>(&case(&args), &device, &blas, &NaiveReference)
            .expect_err("upload failure");
        assert!(matches!(err, HarnessError::Transport(_)));
        assert_eq!(err.reason_code(), "device_upload_failed");
    }

    #[test]
    fn timing_reports_throughput_without_checks() {
        let device = HostEmulator::new();
        let mut args = Arguments::new("timed", "hpr", 8);
        args.unit_check = false;
        args.norm_check = false;
        args.timing = true;
        args.iters = 3;
        args.cold_iters = 1;
        let blas = EmulatedBlas::new();
        let report = run_case::<C32, Hpr, _, _, _>(&case(&args), &device, &blas, &NaiveReference)
            .expect("timed run");
        let timing = report.timing.expect("timing");
        assert_eq!(timing.iters, 3);
        assert!(report.record.gpu_us.is_some());
        assert!(report.digests.is_none());
        assert_eq!(device.launch_log().len(), 4);
    }

    #[test]
    fn digests_are_stable_and_sensitive() {
        let a = [C64::new(1.0, 2.0), C64::new(3.0, 4.0)];
        let b = [C64::new(1.0, 2.0), C64::new(3.0, 4.5)];
        assert_eq!(buffer_digest(&a), buffer_digest(&a));
        assert_ne!(buffer_digest(&a), buffer_digest(&b));
        assert_eq!(buffer_digest(&a).len(), 64);
    }

    #[test]
    fn batch_stride_beyond_signed_range_is_an_overflow() {
        let device = HostEmulator::new();
        let storage = Storage::Packed { n: 2 };
        let host = vec![C32::new(0.0, 0.0); 3];
        let huge = ArrayLayout {
            storage,
            stride: usize::MAX,
            batch_count: 1,
        };
        let mirror = HostDeviceMirror::new(&device, ArrayRole::A, huge, host.clone())
            .expect("upload");
        let batched = case(&Arguments::new("huge", "hpr_strided_batched", 2));
        assert_eq!(operand(&batched, &mirror), Err(ShapeError::Overflow));

        let plain = case(&Arguments::new("plain", "hpr", 2));
        assert_eq!(operand(&plain, &mirror).expect("plain stride").stride, 0);

        let fitting = ArrayLayout::single(storage).expect("layout");
        let mirror = HostDeviceMirror::new(&device, ArrayRole::A, fitting, host).expect("upload");
        assert_eq!(operand(&batched, &mirror).expect("stride fits").stride, 3);
    }
}
