#![cfg(target_os = "windows")]

//! ViGEmBus XUSB targets through `vigem-client`.
//!
//! Each target owns its own bus client, so unplugging one target never
//! invalidates another. The bus is considered present when a client can
//! connect.

use crate::backends::xusb::{XusbDriver, XusbTarget};
use crate::error::BackendError;
use crate::metadata::DeviceIdentity;
use crate::report::XusbReport;
use tracing::debug;
use vigem_client::{Client, TargetId, XButtons, XGamepad, Xbox360Wired};

/// [`XusbDriver`] backed by the ViGEmBus driver.
#[derive(Debug, Default)]
pub struct VigemDriver;

impl VigemDriver {
    /// Can a client reach the bus right now?
    pub fn bus_present() -> bool {
        Client::connect().is_ok()
    }
}

fn bus_error(op: &'static str, err: vigem_client::Error) -> BackendError {
    BackendError::Library(format!("{op}: {err}"))
}

impl XusbDriver for VigemDriver {
    fn is_present(&self) -> bool {
        Self::bus_present()
    }

    fn connect(&mut self, identity: &DeviceIdentity) -> Result<Box<dyn XusbTarget>, BackendError> {
        let client = Client::connect().map_err(|e| bus_error("connect", e))?;
        let id = TargetId {
            vendor: identity.vendor_id,
            product: identity.product_id,
        };
        let mut target = Xbox360Wired::new(client, id);
        target.plugin().map_err(|e| bus_error("plugin", e))?;
        let mut guard = VigemTarget {
            target,
            plugged: true,
        };
        // A target that never becomes ready is unplugged by the guard's drop.
        guard
            .target
            .wait_ready()
            .map_err(|e| bus_error("wait_ready", e))?;
        debug!(vendor = id.vendor, product = id.product, "vigem target ready");
        Ok(Box::new(guard))
    }
}

struct VigemTarget {
    target: Xbox360Wired<Client>,
    plugged: bool,
}

// SAFETY: the target's handles are process-wide kernel handles; the registry
// only touches a target from one thread at a time (under the device mutex).
unsafe impl Send for VigemTarget {}

impl XusbTarget for VigemTarget {
    fn submit(&mut self, report: &XusbReport) -> Result<(), BackendError> {
        let gamepad = XGamepad {
            buttons: XButtons {
                raw: report.buttons,
            },
            left_trigger: report.left_trigger,
            right_trigger: report.right_trigger,
            thumb_lx: report.thumb_lx,
            thumb_ly: report.thumb_ly,
            thumb_rx: report.thumb_rx,
            thumb_ry: report.thumb_ry,
        };
        self.target
            .update(&gamepad)
            .map_err(|e| bus_error("update", e))
    }

    fn unplug(&mut self) {
        if std::mem::take(&mut self.plugged) {
            if let Err(err) = self.target.unplug() {
                debug!(error = %err, "vigem unplug failed");
            }
        }
    }
}

impl Drop for VigemTarget {
    fn drop(&mut self) {
        self.unplug();
    }
}
