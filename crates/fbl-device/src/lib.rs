#![forbid(unsafe_code)]

pub mod blas;
pub mod emulator;

use core::fmt;
use core::marker::PhantomData;

use fbl_dtype::DeviceCopy;

pub use blas::{
    EmulatedBlas, Her2kCall, HerCall, HerkCall, HermitianBlas, HprCall, KernelDefect,
};
pub use emulator::{FaultPlan, HostEmulator, TransferStats};

/// Where the kernel reads `alpha` and `beta` from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerMode {
    Host,
    Device,
}

impl PointerMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for PointerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status returned by every kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlasStatus {
    Success,
    InvalidValue,
    InternalError,
}

impl BlasStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidValue => "invalid_value",
            Self::InternalError => "internal_error",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for BlasStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque accelerator memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddr(pub u64);

impl fmt::Display for DeviceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Allocation { elements: usize, detail: String },
    HostToDevice { addr: DeviceAddr, detail: String },
    DeviceToHost { addr: DeviceAddr, detail: String },
    Synchronize(String),
    InvalidAddress(DeviceAddr),
    TypeMismatch { addr: DeviceAddr, requested: &'static str },
    LengthMismatch { addr: DeviceAddr, device: usize, host: usize },
}

impl TransportError {
    #[must_use]
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Allocation { .. } => "device_allocation_failed",
            Self::HostToDevice { .. } => "device_upload_failed",
            Self::DeviceToHost { .. } => "device_download_failed",
            Self::Synchronize(_) => "device_synchronize_failed",
            Self::InvalidAddress(_) => "device_address_invalid",
            Self::TypeMismatch { .. } => "device_type_mismatch",
            Self::LengthMismatch { .. } => "device_length_mismatch",
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { elements, detail } => {
                write!(f, "allocating {elements} elements failed: {detail}")
            }
            Self::HostToDevice { addr, detail } => write!(f, "copy to {addr} failed: {detail}"),
            Self::DeviceToHost { addr, detail } => {
                write!(f, "copy from {addr} failed: {detail}")
            }
            Self::Synchronize(detail) => write!(f, "synchronize failed: {detail}"),
            Self::InvalidAddress(addr) => write!(f, "no live allocation at {addr}"),
            Self::TypeMismatch { addr, requested } => {
                write!(f, "allocation at {addr} does not hold {requested}")
            }
            Self::LengthMismatch { addr, device, host } => write!(
                f,
                "allocation at {addr} holds {device} elements, host side has {host}"
            ),
        }
    }
}

impl std::error::Error for TransportError {}

/// Device memory and the ordered queue kernels run on.
///
/// Copies are synchronous with respect to the host. `enqueue` records a
/// kernel launch on the queue; `synchronize` waits for all queued work.
pub trait Accelerator {
    fn name(&self) -> &str;

    fn allocate<E: DeviceCopy>(&self, len: usize) -> Result<DeviceAddr, TransportError>;

    /// Release an allocation. Releasing an unknown address is a no-op.
    fn release(&self, addr: DeviceAddr);

    /// Copy `host` into the first `host.len()` elements at `addr`.
    fn upload<E: DeviceCopy>(&self, addr: DeviceAddr, host: &[E]) -> Result<(), TransportError>;

    /// Copy the first `host.len()` elements at `addr` into `host`.
    fn download<E: DeviceCopy>(
        &self,
        addr: DeviceAddr,
        host: &mut [E],
    ) -> Result<(), TransportError>;

    fn enqueue(&self, kernel: &'static str) -> Result<(), TransportError>;

    fn synchronize(&self) -> Result<(), TransportError>;
}

/// Scoped device allocation, released when dropped.
#[derive(Debug)]
pub struct DeviceVector<'d, E: DeviceCopy, A: Accelerator> {
    device: &'d A,
    addr: DeviceAddr,
    len: usize,
    _element: PhantomData<E>,
}

impl<'d, E: DeviceCopy, A: Accelerator> DeviceVector<'d, E, A> {
    pub fn new(device: &'d A, len: usize) -> Result<Self, TransportError> {
        let addr = device.allocate::<E>(len)?;
        Ok(Self {
            device,
            addr,
            len,
            _element: PhantomData,
        })
    }

    /// Allocate and upload `host` in one step.
    pub fn from_host(device: &'d A, host: &[E]) -> Result<Self, TransportError> {
        let vector = Self::new(device, host.len())?;
        vector.upload(host)?;
        Ok(vector)
    }

    #[must_use]
    pub const fn addr(&self) -> DeviceAddr {
        self.addr
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn upload(&self, host: &[E]) -> Result<(), TransportError> {
        if host.len() != self.len {
            return Err(TransportError::LengthMismatch {
                addr: self.addr,
                device: self.len,
                host: host.len(),
            });
        }
        self.device.upload(self.addr, host)
    }

    pub fn download(&self, host: &mut [E]) -> Result<(), TransportError> {
        if host.len() != self.len {
            return Err(TransportError::LengthMismatch {
                addr: self.addr,
                device: self.len,
                host: host.len(),
            });
        }
        self.device.download(self.addr, host)
    }

    pub fn to_host(&self) -> Result<Vec<E>, TransportError> {
        let mut host = vec![E::default(); self.len];
        self.download(&mut host)?;
        Ok(host)
    }
}

impl<E: DeviceCopy, A: Accelerator> Drop for DeviceVector<'_, E, A> {
    fn drop(&mut self) {
        self.device.release(self.addr);
    }
}

/// Execution context passed to every kernel call.
#[derive(Debug)]
pub struct Handle<'d, A: Accelerator> {
    device: &'d A,
    pointer_mode: PointerMode,
}

impl<'d, A: Accelerator> Handle<'d, A> {
    #[must_use]
    pub const fn new(device: &'d A) -> Self {
        Self {
            device,
            pointer_mode: PointerMode::Host,
        }
    }

    #[must_use]
    pub const fn device(&self) -> &'d A {
        self.device
    }

    pub fn set_pointer_mode(&mut self, mode: PointerMode) {
        self.pointer_mode = mode;
    }

    #[must_use]
    pub const fn pointer_mode(&self) -> PointerMode {
        self.pointer_mode
    }

    pub fn synchronize(&self) -> Result<(), TransportError> {
        self.device.synchronize()
    }
}

/// A scalar kernel argument: absent, host-resident or device-resident.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarArg<'a, S> {
    Null,
    Host(&'a S),
    Device(DeviceAddr),
}
