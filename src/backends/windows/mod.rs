#![cfg(target_os = "windows")]

//! Windows virtual device backends.
//!
//! - **ViGEm** ([`vigem`]): XUSB (Xbox 360) gamepads created on demand. This is
//!   the default backend returned by [`platform`](crate::backends::platform).
//! - **vJoy** ([`vjoy`]): 16 pre-configured joystick slots with up to 128
//!   buttons and eight axes. [`vjoy_registry`] pairs [`vjoy_backend`] with the
//!   vJoy installer.
//! - **Elevation** ([`elevate`]): UAC launch used by both backends' installers.

pub mod elevate;
pub mod vigem;
pub mod vjoy;

use crate::backends::joystick::{JoystickBackend, JoystickDriver};
use crate::backends::xusb::XusbBackend;
use crate::backends::BackendKind;
use crate::config::{InstallerSettings, Settings};
use crate::manager::Registry;
use std::sync::Arc;

pub use elevate::ElevatedHost;
pub use vigem::VigemDriver;
pub use vjoy::{VjoyDriver, VjoyLibrary};

/// ViGEm gamepads. Installation is verified by connecting to the bus, so the
/// configured artifact must be the ViGEmBus installer.
pub fn vigem_backend(settings: &Settings) -> XusbBackend<VigemDriver> {
    XusbBackend::new(
        VigemDriver,
        settings.device.clone(),
        Arc::new(ElevatedHost::new(VigemDriver::bus_present)),
    )
}

/// vJoy joysticks over the library found beside the module or on the search path.
pub fn vjoy_backend() -> JoystickBackend<VjoyDriver> {
    JoystickBackend::new(
        VjoyDriver::load(),
        Arc::new(ElevatedHost::new(|| VjoyDriver::load().enabled())),
    )
}

/// Registry over vJoy joysticks whose installer is the bundled vJoy setup.
///
/// `settings.installer` is used only when it was changed from the platform
/// default; otherwise the vJoy defaults apply.
pub fn vjoy_registry(settings: &Settings) -> Registry {
    let installer = if settings.installer == InstallerSettings::default() {
        InstallerSettings::for_backend(BackendKind::Joystick)
    } else {
        settings.installer.clone()
    };
    Registry::with_installer(Box::new(vjoy_backend()), installer)
}
