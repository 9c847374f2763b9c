#![forbid(unsafe_code)]

use fbl_conformance::{HarnessConfig, SuiteReport, run_hermitian_suite, set_kernel_log_path};
use serde::Serialize;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Serialize)]
struct SuiteSummary {
    suite: String,
    case_count: usize,
    pass_count: usize,
    failures: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GateSummary {
    status: &'static str,
    case_file: String,
    kernel_log: String,
    suites: Vec<SuiteSummary>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("run_hermitian_gate failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let mut log_path: Option<PathBuf> = None;
    let mut fixture: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-path" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--log-path requires a value".to_string())?;
                log_path = Some(PathBuf::from(value));
            }
            "--fixture" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--fixture requires a value".to_string())?;
                fixture = Some(PathBuf::from(value));
            }
            "--help" | "-h" => {
                println!(
                    "Usage: cargo run -p fbl-conformance --bin run_hermitian_gate -- [--log-path <path>] [--fixture <cases.json>]"
                );
                return Ok(());
            }
            unknown => return Err(format!("unknown argument: {unknown}")),
        }
    }

    let ts_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis());
    let mut cfg = HarnessConfig::default_paths();
    if let Some(path) = fixture {
        cfg.case_file = path;
    }
    let log_path = log_path.unwrap_or_else(|| {
        cfg.artifact_root
            .join("logs")
            .join(format!("hermitian_kernels_{ts_millis}.jsonl"))
    });
    set_kernel_log_path(Some(log_path.clone()));

    let run = run_hermitian_suite(&cfg)?;

    // Timed cases get a header line and a values line each.
    for case in run.cases.iter().filter(|case| case.timing.is_some()) {
        eprintln!("{}", case.name);
        eprintln!("{}", case.record.csv_header());
        eprintln!("{}", case.record.csv_values());
    }

    let status = if run.report.all_passed() {
        "pass"
    } else {
        "fail"
    };
    let summary = GateSummary {
        status,
        case_file: cfg.case_file.display().to_string(),
        kernel_log: log_path.display().to_string(),
        suites: vec![summarize_suite(run.report)],
    };

    let summary_json = serde_json::to_string_pretty(&summary)
        .map_err(|err| format!("failed serializing summary: {err}"))?;
    println!("{summary_json}");

    if status == "fail" {
        std::process::exit(2);
    }
    Ok(())
}

fn summarize_suite(report: SuiteReport) -> SuiteSummary {
    SuiteSummary {
        suite: report.suite.to_string(),
        case_count: report.case_count,
        pass_count: report.pass_count,
        failures: report.failures,
    }
}
