use fbl_conformance::arguments::{Arguments, TestCase};
use fbl_conformance::check::CheckFailure;
use fbl_conformance::dispatch_case;
use fbl_conformance::harness::CaseReport;
use fbl_device::{BlasStatus, EmulatedBlas, FaultPlan, HostEmulator, KernelDefect, PointerMode};
use fbl_reference::NaiveReference;

fn case(args: &Arguments) -> TestCase {
    TestCase::from_arguments(args).expect("defect case")
}

fn run_with(defect: KernelDefect, args: &Arguments) -> CaseReport {
    let device = HostEmulator::new();
    dispatch_case(
        &case(args),
        &device,
        &EmulatedBlas::with_defect(defect),
        &NaiveReference,
    )
    .expect("case runs")
}

fn rank_k(id: &str, routine: &str, alpha: f64, beta: f64) -> Arguments {
    let mut args = Arguments::new(id, routine, 5);
    args.k = 3;
    args.alpha = alpha;
    args.beta = beta;
    args
}

#[test]
fn zero_alpha_poisoning_catches_kernels_that_read_x() {
    let mut args = Arguments::new("her-alpha0", "her", 4);
    args.alpha = 0.0;
    assert!(run_with(KernelDefect::None, &args).passed());
    let report = run_with(KernelDefect::ReadsZeroScaledInputs, &args);
    assert!(!report.passed());
    assert!(matches!(report.failures[0], CheckFailure::Unit { array: "A", .. }));
}

#[test]
fn zero_beta_poisoning_catches_kernels_that_read_c() {
    let args = rank_k("herk-beta0", "herk", 1.0, 0.0);
    assert!(run_with(KernelDefect::None, &args).passed());
    assert!(!run_with(KernelDefect::ReadsZeroScaledInputs, &args).passed());
}

#[test]
fn ignoring_device_scalars_fails_only_device_mode() {
    let report = run_with(
        KernelDefect::IgnoresDeviceScalars,
        &rank_k("herk-scalars", "herk", 2.5, -1.5),
    );
    assert!(!report.passed());
    assert!(
        report
            .failures
            .iter()
            .all(|failure| failure.mode() == PointerMode::Device)
    );
}

#[test]
fn writes_outside_the_selected_triangle_are_caught() {
    let mut args = rank_k("her2k-triangle", "her2k", 1.0, 1.0);
    args.uplo = 'L';
    args.alphai = 0.5;
    let report = run_with(KernelDefect::WritesOppositeTriangle, &args);
    assert!(!report.passed());
    assert!(matches!(report.failures[0], CheckFailure::Unit { mode: PointerMode::Host, .. }));
}

#[test]
fn skipped_batch_is_caught_in_the_last_slice() {
    let mut args = Arguments::new("hpr-skip", "hpr_strided_batched", 4);
    args.batch_count = 3;
    args.stride_scale = 1.5;
    args.alpha = 1.0;
    let report = run_with(KernelDefect::SkipsLastBatch, &args);
    let Some(CheckFailure::Unit { mismatch, .. }) = report.failures.first() else {
        panic!("unit check failure expected, got {:?}", report.failures);
    };
    assert_eq!(mismatch.batch, 2);
}

#[test]
fn imaginary_diagonal_is_caught_when_c_is_poisoned() {
    let report = run_with(
        KernelDefect::LeavesImaginaryDiagonal,
        &rank_k("herk-diag", "herk", 1.0, 0.0),
    );
    assert!(!report.passed());
}

#[test]
fn unit_check_window_is_four_ulp() {
    let args = rank_k("herk-ulp", "herk", 1.0, 1.0);
    assert!(run_with(KernelDefect::PerturbsResult { ulps: 2 }, &args).passed());

    let report = run_with(KernelDefect::PerturbsResult { ulps: 16 }, &args);
    let Some(CheckFailure::Unit { mismatch, .. }) = report.failures.first() else {
        panic!("unit check failure expected, got {:?}", report.failures);
    };
    assert!(mismatch.ulp.is_some_and(|ulp| ulp > 4));
}

#[test]
fn accepting_invalid_sizes_is_a_status_failure() {
    let args = Arguments::new("her-negative", "her", -2);
    let report = run_with(KernelDefect::AcceptsInvalidSizes, &args);
    assert_eq!(report.probe_status, Some(BlasStatus::Success));
    assert_eq!(
        report.failures,
        vec![CheckFailure::KernelStatus {
            mode: PointerMode::Host,
            expected: BlasStatus::InvalidValue,
            actual: BlasStatus::Success,
        }]
    );
}

#[test]
fn transport_faults_abort_instead_of_failing_the_case() {
    let device = HostEmulator::with_faults(FaultPlan {
        fail_upload_at: Some(1),
        ..FaultPlan::default()
    });
    let args = rank_k("herk-upload", "herk", 1.0, 1.0);
    let err = dispatch_case(&case(&args), &device, &EmulatedBlas::new(), &NaiveReference)
        .expect_err("upload fault aborts");
    assert_eq!(err.reason_code(), "device_upload_failed");
}
