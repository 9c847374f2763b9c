#![forbid(unsafe_code)]

use fbl_device::{Accelerator, DeviceAddr, DeviceVector, PointerMode, ScalarArg, TransportError};
use fbl_dtype::DeviceCopy;
use fbl_layout::ArrayLayout;
use fbl_random::ArrayRole;

/// A host source array and the device allocation mirroring it.
///
/// The host side is never modified after construction, so the device copy
/// can be put back into its initial state at any time.
#[derive(Debug)]
pub struct HostDeviceMirror<'d, E: DeviceCopy, A: Accelerator> {
    role: ArrayRole,
    layout: ArrayLayout,
    host: Vec<E>,
    device: DeviceVector<'d, E, A>,
}

impl<'d, E: DeviceCopy, A: Accelerator> HostDeviceMirror<'d, E, A> {
    /// Allocate one contiguous device buffer for the whole batch and upload `host`.
    pub fn new(
        device: &'d A,
        role: ArrayRole,
        layout: ArrayLayout,
        host: Vec<E>,
    ) -> Result<Self, TransportError> {
        let device = DeviceVector::from_host(device, &host)?;
        Ok(Self {
            role,
            layout,
            host,
            device,
        })
    }

    #[must_use]
    pub const fn role(&self) -> ArrayRole {
        self.role
    }

    #[must_use]
    pub const fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    #[must_use]
    pub fn host(&self) -> &[E] {
        &self.host
    }

    #[must_use]
    pub const fn addr(&self) -> DeviceAddr {
        self.device.addr()
    }

    /// Re-upload the host source over whatever the device holds now.
    pub fn restore(&self) -> Result<(), TransportError> {
        self.device.upload(&self.host)
    }

    /// Synchronous copy of the current device contents.
    pub fn fetch(&self) -> Result<Vec<E>, TransportError> {
        self.device.to_host()
    }
}

/// A kernel scalar held both on the host and in device memory.
#[derive(Debug)]
pub struct ScalarPair<'d, S: DeviceCopy, A: Accelerator> {
    host: S,
    device: DeviceVector<'d, S, A>,
}

impl<'d, S: DeviceCopy, A: Accelerator> ScalarPair<'d, S, A> {
    pub fn new(device: &'d A, value: S) -> Result<Self, TransportError> {
        Ok(Self {
            host: value,
            device: DeviceVector::from_host(device, &[value])?,
        })
    }

    #[must_use]
    pub const fn value(&self) -> S {
        self.host
    }

    /// The argument matching `mode`: a host reference or the device address.
    #[must_use]
    pub fn arg(&self, mode: PointerMode) -> ScalarArg<'_, S> {
        match mode {
            PointerMode::Host => ScalarArg::Host(&self.host),
            PointerMode::Device => ScalarArg::Device(self.device.addr()),
        }
    }
}
