#![forbid(unsafe_code)]

use fbl_conformance::benchmark::generate_benchmark_baseline;

fn main() {
    if let Err(err) = run() {
        eprintln!("generate_benchmark_baseline failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let repo_root = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    let output_path = repo_root.join("artifacts/baselines/hermitian_benchmark_baseline.json");

    let baseline = generate_benchmark_baseline(&repo_root, &output_path)?;
    for workload in &baseline.workloads {
        println!(
            "{}: p50 {:.2} us, {:.3} GFLOP/s, {:.3} GB/s",
            workload.name,
            workload.percentiles.p50_us,
            workload.median_gflops,
            workload.median_gbytes_per_s
        );
    }
    println!("wrote {}", output_path.display());
    Ok(())
}
