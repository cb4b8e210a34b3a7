#![cfg(target_os = "macos")]

//! macOS virtual device backend.
//!
//! Virtual HID devices are owned by the bundled helper executable (see
//! [`helper`](crate::backends::helper)). Support requires both a usable HID
//! manager and the helper beside the module. Nothing needs installing, so the
//! installer resolves `true` without elevation.

use crate::backends::helper::{HelperBackend, HelperBridge, ProcessBridge, Reply, Request};
use crate::config::Settings;
use crate::error::BackendError;
use crate::install::Preinstalled;
use hidapi::HidApi;
use std::sync::Arc;
use tracing::debug;

/// Can a HID manager be created?
pub fn hid_manager_available() -> bool {
    match HidApi::new() {
        Ok(_) => true,
        Err(err) => {
            debug!(error = %err, "HID manager unavailable");
            false
        }
    }
}

/// [`ProcessBridge`] that also requires the HID manager.
pub struct MacBridge(ProcessBridge);

impl HelperBridge for MacBridge {
    fn is_available(&self) -> bool {
        self.0.is_available() && hid_manager_available()
    }

    fn call(&mut self, request: &Request) -> Result<Reply, BackendError> {
        self.0.call(request)
    }

    fn generation(&self) -> u64 {
        self.0.generation()
    }
}

/// Helper-delegated gamepads with the configured identity.
pub fn helper_backend(settings: &Settings) -> HelperBackend<MacBridge> {
    HelperBackend::new(
        MacBridge(ProcessBridge::beside_module()),
        settings.device.clone(),
        Arc::new(Preinstalled),
    )
}
