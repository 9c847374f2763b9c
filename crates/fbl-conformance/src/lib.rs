#![forbid(unsafe_code)]

pub mod arguments;
pub mod benchmark;
pub mod check;
pub mod family;
pub mod harness;
pub mod mirror;
pub mod model;
pub mod perf;

use crate::arguments::{Function, TestCase, load_cases};
use crate::check::Verdict;
use crate::family::{Her, Her2k, Herk, Hpr};
use crate::harness::{BufferDigests, CaseReport, HarnessError, run_case};
use fbl_device::{Accelerator, EmulatedBlas, HermitianBlas, HostEmulator};
use fbl_dtype::{ComplexElement, DType};
use fbl_reference::{HostReference, NaiveReference};
use num_complex::Complex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

pub const HERMITIAN_CASES_FILE: &str = "hermitian_cases.json";

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub fixture_root: PathBuf,
    pub case_file: PathBuf,
    pub artifact_root: PathBuf,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
        let fixture_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures");
        Self {
            case_file: fixture_root.join(HERMITIAN_CASES_FILE),
            fixture_root,
            artifact_root: repo_root.join("artifacts"),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub case_file_present: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

/// A finished suite plus the per-case reports it was aggregated from.
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub report: SuiteReport,
    pub cases: Vec<CaseReport>,
}

#[derive(Debug, Serialize)]
struct KernelLogEntry<'a> {
    suite: &'static str,
    fixture_id: &'a str,
    test_name: &'a str,
    routine: String,
    a_type: &'static str,
    seed: u64,
    validity: &'static str,
    probe_status: Option<&'static str>,
    reason_code: &'static str,
    failures: Vec<String>,
    host_verdicts: &'a [Verdict],
    device_verdicts: &'a [Verdict],
    digests: Option<&'a BufferDigests>,
    record: serde_json::Value,
    passed: bool,
}

static KERNEL_LOG_PATH: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

pub fn set_kernel_log_path(path: Option<PathBuf>) {
    let cell = KERNEL_LOG_PATH.get_or_init(|| Mutex::new(None));
    if let Ok(mut slot) = cell.lock() {
        *slot = path;
    }
}

fn maybe_append_kernel_log(entry: &KernelLogEntry<'_>) -> Result<(), String> {
    let configured = KERNEL_LOG_PATH
        .get()
        .and_then(|cell| cell.lock().ok())
        .and_then(|slot| slot.clone());
    let from_env = std::env::var_os("FBL_KERNEL_LOG_PATH").map(PathBuf::from);
    let Some(path) = configured.or(from_env) else {
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| format!("failed opening {}: {err}", path.display()))?;
    let line = serde_json::to_string(entry)
        .map_err(|err| format!("failed serializing kernel log entry: {err}"))?;
    let mut payload = line.into_bytes();
    payload.push(b'\n');
    file.write_all(&payload)
        .map_err(|err| format!("failed appending kernel log {}: {err}", path.display()))
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = fs::read_dir(&config.fixture_root)
        .ok()
        .into_iter()
        .flat_map(|it| it.filter_map(Result::ok))
        .count();

    HarnessReport {
        suite: "smoke",
        fixture_count,
        case_file_present: config.case_file.exists(),
    }
}

fn by_function<T, A, B, R>(
    case: &TestCase,
    device: &A,
    blas: &B,
    reference: &R,
) -> Result<CaseReport, HarnessError>
where
    T: ComplexElement,
    A: Accelerator,
    B: HermitianBlas<A>,
    R: HostReference,
{
    match case.function {
        Function::Her => run_case::<T, Her, A, B, R>(case, device, blas, reference),
        Function::Hpr => run_case::<T, Hpr, A, B, R>(case, device, blas, reference),
        Function::Herk => run_case::<T, Herk, A, B, R>(case, device, blas, reference),
        Function::Her2k => run_case::<T, Her2k, A, B, R>(case, device, blas, reference),
    }
}

/// Route a case to the engine instance for its routine and element type.
pub fn dispatch_case<A, B, R>(
    case: &TestCase,
    device: &A,
    blas: &B,
    reference: &R,
) -> Result<CaseReport, HarnessError>
where
    A: Accelerator,
    B: HermitianBlas<A>,
    R: HostReference,
{
    match case.dtype {
        DType::Complex64 => by_function::<Complex<f32>, A, B, R>(case, device, blas, reference),
        DType::Complex128 => by_function::<Complex<f64>, A, B, R>(case, device, blas, reference),
        other => Err(HarnessError::UnsupportedDType(other)),
    }
}

fn log_case(suite: &'static str, case: &TestCase, report: &CaseReport) -> Result<(), String> {
    let entry = KernelLogEntry {
        suite,
        fixture_id: &report.id,
        test_name: &report.name,
        routine: case.routine(),
        a_type: case.dtype.name(),
        seed: case.seed,
        validity: report.validity.as_str(),
        probe_status: report.probe_status.map(|status| status.as_str()),
        reason_code: report
            .failures
            .first()
            .map_or("none", |failure| failure.reason_code()),
        failures: report.failures.iter().map(ToString::to_string).collect(),
        host_verdicts: &report.host_verdicts,
        device_verdicts: &report.device_verdicts,
        digests: report.digests.as_ref(),
        record: report.record.to_json(),
        passed: report.passed(),
    };
    maybe_append_kernel_log(&entry)
}

/// Run every case in order; a transport failure aborts the whole suite.
pub fn run_cases<A, B, R>(
    suite: &'static str,
    cases: &[TestCase],
    device: &A,
    blas: &B,
    reference: &R,
) -> Result<SuiteRun, String>
where
    A: Accelerator,
    B: HermitianBlas<A>,
    R: HostReference,
{
    let mut report = SuiteReport {
        suite,
        case_count: cases.len(),
        pass_count: 0,
        failures: Vec::new(),
    };
    let mut reports = Vec::with_capacity(cases.len());

    for case in cases {
        let case_report = dispatch_case(case, device, blas, reference)
            .map_err(|err| format!("{}: {} ({err})", case.id, err.reason_code()))?;
        if case_report.passed() {
            report.pass_count += 1;
        }
        report.failures.extend(
            case_report
                .failures
                .iter()
                .map(|failure| format!("{}: {failure}", case_report.id)),
        );
        log_case(suite, case, &case_report)?;
        reports.push(case_report);
    }

    Ok(SuiteRun {
        report,
        cases: reports,
    })
}

pub fn load_hermitian_cases(path: &Path) -> Result<Vec<TestCase>, String> {
    load_cases(path)
}

/// The fixture grid against the emulated kernels and the naive reference.
pub fn run_hermitian_suite(config: &HarnessConfig) -> Result<SuiteRun, String> {
    let cases = load_hermitian_cases(&config.case_file)?;
    let device = HostEmulator::new();
    run_cases(
        "hermitian",
        &cases,
        &device,
        &EmulatedBlas::new(),
        &NaiveReference,
    )
}

#[cfg(test)]
mod tests {
    use super::{HarnessConfig, dispatch_case, run_cases, run_smoke, sha256_hex};
    use crate::arguments::{Arguments, TestCase};
    use crate::harness::HarnessError;
    use fbl_device::{EmulatedBlas, HostEmulator, KernelDefect};
    use fbl_dtype::DType;
    use fbl_reference::NaiveReference;

    fn case(args: &Arguments) -> TestCase {
        TestCase::from_arguments(args).expect("fixture case")
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn smoke_sees_the_fixture_directory() {
        let report = run_smoke(&HarnessConfig::default_paths());
        assert_eq!(report.suite, "smoke");
        assert!(report.case_file_present);
        assert!(report.fixture_count >= 1);
    }

    #[test]
    fn dispatch_covers_both_complex_types() {
        let device = HostEmulator::new();
        let blas = EmulatedBlas::new();
        for a_type in ["f32_c", "f64_c"] {
            let mut args = Arguments::new("dispatch", "her", 3);
            args.a_type = a_type.to_string();
            let report =
                dispatch_case(&case(&args), &device, &blas, &NaiveReference).expect("dispatch");
            assert!(report.passed(), "{a_type}: {:?}", report.failures);
        }

        let mut real = case(&Arguments::new("real", "her", 3));
        real.dtype = DType::F64;
        let err = dispatch_case(&real, &device, &blas, &NaiveReference).expect_err("real dtype");
        assert_eq!(err, HarnessError::UnsupportedDType(DType::F64));
    }

    #[test]
    fn suite_counts_failures_and_keeps_going() {
        let device = HostEmulator::new();
        let blas = EmulatedBlas::with_defect(KernelDefect::WritesOppositeTriangle);
        let mut herk = Arguments::new("herk-defect", "herk", 4);
        herk.k = 2;
        let cases = vec![
            case(&herk),
            case(&Arguments::new("empty", "hpr", 0)),
        ];
        let run = run_cases("defects", &cases, &device, &blas, &NaiveReference).expect("suite");
        assert_eq!(run.report.case_count, 2);
        assert_eq!(run.report.pass_count, 1);
        assert!(!run.report.all_passed());
        assert!(run.report.failures[0].starts_with("herk-defect: "));
        assert_eq!(run.cases.len(), 2);
    }
}
