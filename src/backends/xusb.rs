//! Static-report backend for XUSB (Xbox 360) gamepads.
//!
//! The driver has no partial-update call: every change submits the whole
//! [`XusbReport`]. The pad keeps the committed report in a [`ReportStore`], so
//! untouched fields survive every mutation and a rejected submit leaves the
//! committed report as it was.
//!
//! Devices are created on demand; identities come from the registry counter.

use super::{BackendKind, IdentityScheme, VirtualDeviceBackend};
use crate::device::{DeviceId, VirtualPad};
use crate::error::{BackendError, ControllerError};
use crate::install::InstallHost;
use crate::mapping::{Axis, Button, Layout};
use crate::metadata::DeviceIdentity;
use crate::report::{Report, ReportStore, XusbReport};
use std::sync::Arc;
use tracing::{debug, warn};

/// Connection to the virtual bus.
pub trait XusbDriver: Send {
    /// Can the bus be reached?
    fn is_present(&self) -> bool;

    /// Plug in a new target and wait until it is ready.
    fn connect(&mut self, identity: &DeviceIdentity) -> Result<Box<dyn XusbTarget>, BackendError>;
}

/// One plugged-in target.
pub trait XusbTarget: Send {
    /// Replace the device state with `report`.
    fn submit(&mut self, report: &XusbReport) -> Result<(), BackendError>;

    /// Unplug. Must tolerate being called on a target that never became ready.
    fn unplug(&mut self);
}

pub struct XusbBackend<D> {
    driver: D,
    identity: DeviceIdentity,
    host: Arc<dyn InstallHost>,
}

impl<D: XusbDriver> XusbBackend<D> {
    pub fn new(driver: D, identity: DeviceIdentity, host: Arc<dyn InstallHost>) -> Self {
        Self {
            driver,
            identity,
            host,
        }
    }
}

impl<D: XusbDriver> VirtualDeviceBackend for XusbBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Xusb
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::Dynamic
    }

    fn is_supported(&self) -> bool {
        self.driver.is_present()
    }

    fn install_host(&self) -> Arc<dyn InstallHost> {
        self.host.clone()
    }

    fn create(&mut self, next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError> {
        if !self.driver.is_present() {
            return Err(ControllerError::DriverUnavailable);
        }
        let target = self.driver.connect(&self.identity)?;
        let mut pad = XusbPad {
            id: next_id,
            target: Some(target),
            store: ReportStore::new(),
        };
        // Start from a neutral report so readers never see stale state.
        pad.flush_current()?;
        debug!(id = %next_id, "xusb target plugged in");
        Ok(Box::new(pad))
    }
}

struct XusbPad {
    id: DeviceId,
    target: Option<Box<dyn XusbTarget>>,
    store: ReportStore<XusbReport>,
}

impl XusbPad {
    fn flush_current(&mut self) -> Result<(), ControllerError> {
        self.submit_with(|_| {})
    }

    fn submit_with(&mut self, mutate: impl FnOnce(&mut XusbReport)) -> Result<(), ControllerError> {
        let Some(target) = self.target.as_mut() else {
            return Err(BackendError::rejected("submit on released target").into());
        };
        self.store
            .update(mutate, |report| target.submit(report))
            .map_err(|err| {
                warn!(id = %self.id, error = %err, "xusb submit rejected");
                ControllerError::from(err)
            })
    }
}

impl VirtualPad for XusbPad {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn set_button(&mut self, button: Button, pressed: bool) -> Result<(), ControllerError> {
        let Button::Gamepad(button) = button else {
            return Err(ControllerError::ButtonOutOfRange(-1));
        };
        self.submit_with(|r| r.set_button(button, pressed))
    }

    fn set_axis(&mut self, axis: Axis, value: f64) -> Result<(), ControllerError> {
        let Axis::Gamepad(axis) = axis else {
            return Err(ControllerError::AxisOutOfRange(-1));
        };
        self.submit_with(|r| r.set_axis(axis, value))
    }

    fn report(&self) -> Report {
        Report::Xusb(self.store.snapshot())
    }

    fn release(&mut self) {
        if let Some(mut target) = self.target.take() {
            target.unplug();
            debug!(id = %self.id, "xusb target unplugged");
        }
    }
}

impl Drop for XusbPad {
    fn drop(&mut self) {
        self.release();
    }
}
