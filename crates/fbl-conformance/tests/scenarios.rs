use fbl_conformance::arguments::{Arguments, TestCase};
use fbl_conformance::check::Verdict;
use fbl_conformance::dispatch_case;
use fbl_conformance::family::Validity;
use fbl_device::{BlasStatus, EmulatedBlas, HostEmulator};
use fbl_reference::NaiveReference;

fn case(args: &Arguments) -> TestCase {
    TestCase::from_arguments(args).expect("scenario case")
}

#[test]
fn packed_update_matches_gold_in_both_pointer_modes() {
    let mut args = Arguments::new("scenario-1", "hpr", 4);
    args.alpha = 2.0;
    args.incx = 1;
    let device = HostEmulator::new();
    let report = dispatch_case(&case(&args), &device, &EmulatedBlas::new(), &NaiveReference)
        .expect("scenario 1 runs");
    assert!(report.passed(), "{:?}", report.failures);
    for verdicts in [&report.host_verdicts, &report.device_verdicts] {
        assert!(matches!(verdicts[0], Verdict::Exact { max_ulp } if max_ulp <= 4));
    }
}

#[test]
fn zero_order_is_a_quick_return_for_every_family() {
    for routine in [
        "her",
        "hpr",
        "herk",
        "her2k",
        "her_strided_batched",
        "hpr_strided_batched",
        "herk_strided_batched",
        "her2k_strided_batched",
    ] {
        let device = HostEmulator::new();
        let mut args = Arguments::new(routine, routine, 0);
        args.k = 3;
        let report = dispatch_case(&case(&args), &device, &EmulatedBlas::new(), &NaiveReference)
            .expect("probe runs");
        assert_eq!(report.validity, Validity::Empty, "{routine}");
        assert_eq!(report.probe_status, Some(BlasStatus::Success), "{routine}");
        assert!(report.host_verdicts.is_empty(), "{routine}: no checker ran");
        assert_eq!(device.stats().touches(), 0, "{routine}");
    }
}

#[test]
fn strided_batched_rank_2k_matches_every_batch_slice() {
    let mut args = Arguments::new("scenario-3", "her2k_strided_batched", 3);
    args.k = 2;
    args.batch_count = 2;
    args.stride_scale = 1.5;
    args.alpha = 1.0;
    args.alphai = -0.5;
    args.beta = 2.0;
    let device = HostEmulator::new();
    let report = dispatch_case(&case(&args), &device, &EmulatedBlas::new(), &NaiveReference)
        .expect("scenario 3 runs");
    assert!(report.passed(), "{:?}", report.failures);
    let Some(Verdict::Normed { error, threshold }) = report.device_verdicts.last().copied() else {
        panic!("norm verdict recorded");
    };
    assert!(error <= threshold);
    assert!((threshold - 2.0e-4).abs() < 1e-12, "f32 Frobenius threshold scales with batch");
    assert_eq!(report.name, "her2k_strided_batched_f32_c_U_N_3_2_1_m0p5_3_3_2_3_1p5_2");
}

#[test]
fn undersized_leading_dimension_is_rejected_before_allocation() {
    let mut her = Arguments::new("her-lda", "her", 5);
    her.lda = Some(4);
    let mut herk = Arguments::new("herk-ldc", "herk", 5);
    herk.k = 2;
    herk.ldc = Some(4);
    let mut her2k = Arguments::new("her2k-ldb", "her2k", 4);
    her2k.k = 3;
    her2k.trans_a = 'C';
    her2k.ldb = Some(2);

    for args in [her, herk, her2k] {
        let device = HostEmulator::new();
        let report = dispatch_case(&case(&args), &device, &EmulatedBlas::new(), &NaiveReference)
            .expect("probe runs");
        assert_eq!(report.validity, Validity::Invalid, "{}", args.id);
        assert_eq!(report.probe_status, Some(BlasStatus::InvalidValue), "{}", args.id);
        assert!(report.passed(), "{}: {:?}", args.id, report.failures);
        assert_eq!(device.stats().allocations, 0, "{}", args.id);
    }
}
