#![forbid(unsafe_code)]

use crate::arguments::{Arguments, TestCase};
use crate::dispatch_case;
use fbl_device::{Accelerator, EmulatedBlas, HostEmulator};
use fbl_reference::NaiveReference;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentileSummary {
    pub p50_us: f64,
    pub p95_us: f64,
    pub p99_us: f64,
    pub min_us: f64,
    pub max_us: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkWorkload {
    pub name: String,
    pub runs: usize,
    pub iters_per_run: usize,
    /// Mean per-call latency of each measured block.
    pub samples_us: Vec<f64>,
    pub percentiles: PercentileSummary,
    pub median_gflops: f64,
    pub median_gbytes_per_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkBaseline {
    pub schema_version: u8,
    pub generated_at_unix_ms: u128,
    pub git_commit: String,
    pub device: String,
    pub workloads: Vec<BenchmarkWorkload>,
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn git_commit_short(repo_root: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(repo_root)
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        _ => "unknown".to_string(),
    }
}

fn percentile_index(len: usize, percentile_num: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let last = len - 1;
    (last * percentile_num + 50) / 100
}

fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn at_percentile(sorted: &[f64], percentile_num: usize) -> f64 {
    sorted
        .get(percentile_index(sorted.len(), percentile_num))
        .copied()
        .unwrap_or(0.0)
}

fn summarize_samples(samples: &[f64]) -> PercentileSummary {
    let sorted = sorted(samples);
    PercentileSummary {
        p50_us: at_percentile(&sorted, 50),
        p95_us: at_percentile(&sorted, 95),
        p99_us: at_percentile(&sorted, 99),
        min_us: sorted.first().copied().unwrap_or(0.0),
        max_us: sorted.last().copied().unwrap_or(0.0),
    }
}

/// Timing-only case: no correctness checks, `iters` measured launches.
fn timed_case(
    routine: &str,
    a_type: &str,
    n: i64,
    k: i64,
    batch_count: i64,
) -> Result<TestCase, String> {
    let mut args = Arguments::new(routine, routine, n);
    args.a_type = a_type.to_string();
    args.k = k;
    args.alpha = 1.5;
    args.beta = 0.5;
    args.batch_count = batch_count;
    args.unit_check = false;
    args.norm_check = false;
    args.timing = true;
    args.iters = 5;
    args.cold_iters = 1;
    TestCase::from_arguments(&args).map_err(|err| format!("{routine}: {err}"))
}

fn time_workload(
    name: &str,
    runs: usize,
    case: &TestCase,
    device: &HostEmulator,
) -> Result<BenchmarkWorkload, String> {
    let blas = EmulatedBlas::new();
    let mut samples_us = Vec::with_capacity(runs);
    let mut gflops = Vec::with_capacity(runs);
    let mut gbytes = Vec::with_capacity(runs);

    for _ in 0..runs {
        let report = dispatch_case(case, device, &blas, &NaiveReference)
            .map_err(|err| format!("{name}: {} ({err})", err.reason_code()))?;
        if let Some(failure) = report.failures.first() {
            return Err(format!("{name}: {failure}"));
        }
        let timing = report
            .timing
            .ok_or_else(|| format!("{name}: case produced no timing"))?;
        samples_us.push(timing.gpu_us);
        gflops.push(timing.gflops);
        gbytes.push(timing.gbytes_per_s);
    }

    Ok(BenchmarkWorkload {
        name: name.to_string(),
        runs,
        iters_per_run: case.iters,
        percentiles: summarize_samples(&samples_us),
        samples_us,
        median_gflops: at_percentile(&sorted(&gflops), 50),
        median_gbytes_per_s: at_percentile(&sorted(&gbytes), 50),
    })
}

pub fn generate_benchmark_baseline(
    repo_root: &Path,
    output_path: &Path,
) -> Result<BenchmarkBaseline, String> {
    let workloads = [
        ("hpr_f32_c_n256", timed_case("hpr", "f32_c", 256, 0, 1)?),
        ("her_f64_c_n256", timed_case("her", "f64_c", 256, 0, 1)?),
        ("herk_f32_c_n128_k64", timed_case("herk", "f32_c", 128, 64, 1)?),
        (
            "her2k_strided_batched_f64_c_n64_k32_b4",
            timed_case("her2k_strided_batched", "f64_c", 64, 32, 4)?,
        ),
    ];

    let device = HostEmulator::new();
    let mut measured = Vec::with_capacity(workloads.len());
    for (name, case) in &workloads {
        measured.push(time_workload(name, 10, case, &device)?);
    }

    let baseline = BenchmarkBaseline {
        schema_version: 1,
        generated_at_unix_ms: now_unix_ms(),
        git_commit: git_commit_short(repo_root),
        device: device.name().to_string(),
        workloads: measured,
    };

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed creating {}: {err}", parent.display()))?;
    }

    let raw = serde_json::to_string_pretty(&baseline)
        .map_err(|err| format!("failed serializing baseline: {err}"))?;
    fs::write(output_path, raw)
        .map_err(|err| format!("failed writing {}: {err}", output_path.display()))?;

    Ok(baseline)
}
