#![forbid(unsafe_code)]

use core::fmt;
use std::time::Instant;

use fbl_device::{Accelerator, BlasStatus, Handle, PointerMode, TransportError};
use fbl_dtype::DeviceCopy;
use serde::Serialize;

use crate::mirror::HostDeviceMirror;

/// Floating-point and memory work of one launch, in units of 1e9.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WorkCounts {
    pub gflop: f64,
    pub gbyte: f64,
}

/// Steady-state throughput of the device-pointer-mode path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timing {
    pub cold_iters: usize,
    pub iters: usize,
    pub gpu_us: f64,
    pub gflops: f64,
    pub gbytes_per_s: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfError {
    Transport(TransportError),
    Kernel(BlasStatus),
}

impl PerfError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Transport(err) => err.reason_code(),
            Self::Kernel(_) => "timed_launch_failed",
        }
    }
}

impl fmt::Display for PerfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(err) => write!(f, "{err}"),
            Self::Kernel(status) => write!(f, "timed launch returned {status}"),
        }
    }
}

impl std::error::Error for PerfError {}

impl From<TransportError> for PerfError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

fn launch_checked<A: Accelerator>(
    handle: &Handle<'_, A>,
    launch: &mut impl FnMut(&Handle<'_, A>) -> BlasStatus,
) -> Result<(), PerfError> {
    let status = launch(handle);
    if status.is_success() {
        Ok(())
    } else {
        Err(PerfError::Kernel(status))
    }
}

/// Time `iters` device-pointer-mode launches after `cold_iters` untimed ones.
///
/// The output is restored from its host source first. The queue is
/// synchronized only around the measured block.
pub fn measure<E: DeviceCopy, A: Accelerator>(
    handle: &mut Handle<'_, A>,
    output: &HostDeviceMirror<'_, E, A>,
    cold_iters: usize,
    iters: usize,
    work: WorkCounts,
    mut launch: impl FnMut(&Handle<'_, A>) -> BlasStatus,
) -> Result<Timing, PerfError> {
    output.restore()?;
    handle.set_pointer_mode(PointerMode::Device);
    for _ in 0..cold_iters {
        launch_checked(handle, &mut launch)?;
    }
    handle.synchronize()?;

    let start = Instant::now();
    for _ in 0..iters {
        launch_checked(handle, &mut launch)?;
    }
    handle.synchronize()?;
    let elapsed = start.elapsed().as_secs_f64();

    let seconds_per_call = elapsed / iters.max(1) as f64;
    let rate = |amount: f64| {
        if seconds_per_call > 0.0 {
            amount / seconds_per_call
        } else {
            0.0
        }
    };
    Ok(Timing {
        cold_iters,
        iters,
        gpu_us: seconds_per_call * 1.0e6,
        gflops: rate(work.gflop),
        gbytes_per_s: rate(work.gbyte),
    })
}
