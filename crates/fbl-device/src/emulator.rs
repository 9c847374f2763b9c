#![forbid(unsafe_code)]

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use fbl_dtype::DeviceCopy;

use crate::{Accelerator, DeviceAddr, TransportError};

const ALIGNMENT: u64 = 256;

/// Counters kept by the emulator for every operation it served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub allocations: usize,
    pub releases: usize,
    pub live_buffers: usize,
    pub uploads: usize,
    pub downloads: usize,
    pub launches: usize,
    pub synchronizations: usize,
}

impl TransferStats {
    /// Total device traffic, allocations included.
    #[must_use]
    pub const fn touches(&self) -> usize {
        self.allocations + self.uploads + self.downloads
    }
}

/// Injected transport failures: the `n`-th operation of a kind (zero-based) fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    pub fail_allocation_at: Option<usize>,
    pub fail_upload_at: Option<usize>,
    pub fail_download_at: Option<usize>,
    pub fail_synchronize: bool,
}

#[derive(Debug, Default)]
struct EmulatorState {
    next_addr: u64,
    buffers: HashMap<DeviceAddr, Box<dyn Any + Send>>,
    stats: TransferStats,
    faults: FaultPlan,
    launch_log: Vec<&'static str>,
}

/// Accelerator backed by host memory.
///
/// Every allocation is a typed `Vec` behind an opaque address, so kernels and
/// the harness exercise the same explicit transfer discipline a real device
/// requires.
#[derive(Debug, Default)]
pub struct HostEmulator {
    state: Mutex<EmulatorState>,
}

impl HostEmulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_faults(faults: FaultPlan) -> Self {
        let emulator = Self::default();
        if let Ok(mut state) = emulator.state.lock() {
            state.faults = faults;
        }
        emulator
    }

    #[must_use]
    pub fn stats(&self) -> TransferStats {
        self.state
            .lock()
            .map(|state| state.stats)
            .unwrap_or_default()
    }

    /// Kernel names in launch order.
    #[must_use]
    pub fn launch_log(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .map(|state| state.launch_log.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, EmulatorState>, String> {
        self.state
            .lock()
            .map_err(|_| "emulator state lock poisoned".to_string())
    }
}

fn typed_buffer<'s, E: DeviceCopy>(
    state: &'s mut EmulatorState,
    addr: DeviceAddr,
) -> Result<&'s mut Vec<E>, TransportError> {
    let slot = state
        .buffers
        .get_mut(&addr)
        .ok_or(TransportError::InvalidAddress(addr))?;
    slot.downcast_mut::<Vec<E>>()
        .ok_or(TransportError::TypeMismatch {
            addr,
            requested: std::any::type_name::<E>(),
        })
}

impl Accelerator for HostEmulator {
    fn name(&self) -> &str {
        "host-emulator"
    }

    fn allocate<E: DeviceCopy>(&self, len: usize) -> Result<DeviceAddr, TransportError> {
        let mut state = self.lock().map_err(|detail| TransportError::Allocation {
            elements: len,
            detail,
        })?;
        if state.faults.fail_allocation_at == Some(state.stats.allocations) {
            state.stats.allocations += 1;
            return Err(TransportError::Allocation {
                elements: len,
                detail: "injected allocation failure".to_string(),
            });
        }
        let span = len
            .checked_mul(std::mem::size_of::<E>())
            .and_then(|bytes| u64::try_from(bytes).ok())
            .and_then(|bytes| bytes.div_ceil(ALIGNMENT).checked_mul(ALIGNMENT))
            .and_then(|span| span.checked_add(ALIGNMENT))
            .and_then(|span| state.next_addr.checked_add(span));
        let Some(next_addr) = span else {
            return Err(TransportError::Allocation {
                elements: len,
                detail: "allocation size overflows the address space".to_string(),
            });
        };
        let addr = DeviceAddr(state.next_addr + ALIGNMENT);
        state.next_addr = next_addr;
        state.buffers.insert(addr, Box::new(vec![E::default(); len]));
        state.stats.allocations += 1;
        state.stats.live_buffers += 1;
        Ok(addr)
    }

    fn release(&self, addr: DeviceAddr) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.buffers.remove(&addr).is_some() {
            state.stats.releases += 1;
            state.stats.live_buffers -= 1;
        }
    }

    fn upload<E: DeviceCopy>(&self, addr: DeviceAddr, host: &[E]) -> Result<(), TransportError> {
        let mut state = self
            .lock()
            .map_err(|detail| TransportError::HostToDevice { addr, detail })?;
        let attempt = state.stats.uploads;
        state.stats.uploads += 1;
        if state.faults.fail_upload_at == Some(attempt) {
            return Err(TransportError::HostToDevice {
                addr,
                detail: "injected upload failure".to_string(),
            });
        }
        let buffer = typed_buffer::<E>(&mut state, addr)?;
        if host.len() > buffer.len() {
            return Err(TransportError::LengthMismatch {
                addr,
                device: buffer.len(),
                host: host.len(),
            });
        }
        buffer[..host.len()].copy_from_slice(host);
        Ok(())
    }

    fn download<E: DeviceCopy>(
        &self,
        addr: DeviceAddr,
        host: &mut [E],
    ) -> Result<(), TransportError> {
        let mut state = self
            .lock()
            .map_err(|detail| TransportError::DeviceToHost { addr, detail })?;
        let attempt = state.stats.downloads;
        state.stats.downloads += 1;
        if state.faults.fail_download_at == Some(attempt) {
            return Err(TransportError::DeviceToHost {
                addr,
                detail: "injected download failure".to_string(),
            });
        }
        let buffer = typed_buffer::<E>(&mut state, addr)?;
        if host.len() > buffer.len() {
            return Err(TransportError::LengthMismatch {
                addr,
                device: buffer.len(),
                host: host.len(),
            });
        }
        host.copy_from_slice(&buffer[..host.len()]);
        Ok(())
    }

    fn enqueue(&self, kernel: &'static str) -> Result<(), TransportError> {
        let mut state = self.lock().map_err(TransportError::Synchronize)?;
        state.stats.launches += 1;
        state.launch_log.push(kernel);
        Ok(())
    }

    fn synchronize(&self) -> Result<(), TransportError> {
        let mut state = self.lock().map_err(TransportError::Synchronize)?;
        state.stats.synchronizations += 1;
        if state.faults.fail_synchronize {
            return Err(TransportError::Synchronize(
                "injected synchronize failure".to_string(),
            ));
        }
        Ok(())
    }
}
