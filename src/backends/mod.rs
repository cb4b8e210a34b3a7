//! Virtual device backends for `stickpad`.
//!
//! One [`VirtualDeviceBackend`] per device family. Each backend is generic over
//! a small driver trait ([`XusbDriver`], [`JoystickDriver`], [`SinkFactory`],
//! [`HelperBridge`]) so the report/lifecycle logic is shared and testable; the
//! native implementations of those traits live in the per-OS modules:
//!
//! - **Windows**: ViGEm (`vigem-client`) for XUSB gamepads, vJoy
//!   (`vJoyInterface.dll` via `libloading`) for 16-slot joysticks.
//! - **Linux**: uinput through `evdev`.
//! - **macOS**: a bundled helper process owning IOHIDUserDevice objects.
//!
//! [`platform`] picks the default backend for the build target once; nothing
//! else in the crate branches on the OS.

use crate::device::{DeviceId, VirtualPad};
use crate::error::ControllerError;
use crate::event::ChannelDesc;
use crate::install::InstallHost;
use crate::mapping::Layout;
use std::sync::Arc;

pub mod helper;
pub mod joystick;
pub mod uinput;
pub mod xusb;

#[cfg(target_os = "windows")]
#[cfg_attr(docsrs, doc(cfg(target_os = "windows")))]
pub mod windows;

#[cfg(target_os = "linux")]
#[cfg_attr(docsrs, doc(cfg(target_os = "linux")))]
pub mod linux;

#[cfg(target_os = "macos")]
#[cfg_attr(docsrs, doc(cfg(target_os = "macos")))]
pub mod macos;

pub use helper::{HelperBackend, HelperBridge, StdioBridge};
pub use joystick::{JoystickBackend, JoystickDriver};
pub use uinput::{EventSink, SinkFactory, UinputBackend};
pub use xusb::{XusbBackend, XusbDriver, XusbTarget};

/// Which backend variant is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Whole-report submission, dynamic identities (ViGEm).
    Xusb,
    /// Whole-report semantics over a 16-slot table (vJoy).
    Joystick,
    /// Discrete kernel events (uinput).
    Uinput,
    /// Calls forwarded to a helper process.
    Helper,
}

/// How a backend numbers its devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityScheme {
    /// The backend assigns the slot index.
    FixedSlots,
    /// The registry assigns the next counter value.
    Dynamic,
}

/// The per-OS capability set.
///
/// Implementations must never panic from [`is_supported`](Self::is_supported);
/// probing failures are `false`.
pub trait VirtualDeviceBackend: Send {
    fn kind(&self) -> BackendKind;

    fn layout(&self) -> Layout;

    fn identity_scheme(&self) -> IdentityScheme;

    /// Is the OS facility present and usable right now?
    fn is_supported(&self) -> bool;

    /// Platform side of driver installation for this backend.
    fn install_host(&self) -> Arc<dyn InstallHost>;

    /// Materialize one device. `next_id` is the registry's proposal for
    /// [`IdentityScheme::Dynamic`] backends; fixed-slot backends ignore it.
    fn create(&mut self, next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError>;

    /// Controls devices from this backend accept.
    fn describe(&self) -> Vec<ChannelDesc> {
        crate::event::describe(self.layout(), None)
    }
}

/// Kind of the backend [`platform`] returns on this build target.
#[cfg(target_os = "windows")]
pub const PLATFORM_KIND: BackendKind = BackendKind::Xusb;
#[cfg(target_os = "linux")]
pub const PLATFORM_KIND: BackendKind = BackendKind::Uinput;
#[cfg(not(any(target_os = "windows", target_os = "linux")))]
pub const PLATFORM_KIND: BackendKind = BackendKind::Helper;

/// The default backend for this build target.
#[cfg(target_os = "windows")]
pub fn platform(settings: &crate::config::Settings) -> Box<dyn VirtualDeviceBackend> {
    Box::new(windows::vigem_backend(settings))
}

/// The default backend for this build target.
#[cfg(target_os = "linux")]
pub fn platform(settings: &crate::config::Settings) -> Box<dyn VirtualDeviceBackend> {
    Box::new(linux::uinput_backend(settings))
}

/// The default backend for this build target.
#[cfg(target_os = "macos")]
pub fn platform(settings: &crate::config::Settings) -> Box<dyn VirtualDeviceBackend> {
    Box::new(macos::helper_backend(settings))
}

/// The default backend for this build target.
#[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
pub fn platform(_settings: &crate::config::Settings) -> Box<dyn VirtualDeviceBackend> {
    Box::new(Unsupported)
}

/// Backend for targets without a virtual-HID facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unsupported;

impl VirtualDeviceBackend for Unsupported {
    fn kind(&self) -> BackendKind {
        BackendKind::Helper
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::Dynamic
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn install_host(&self) -> Arc<dyn InstallHost> {
        Arc::new(NoInstall)
    }

    fn create(&mut self, _next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError> {
        Err(ControllerError::DriverUnavailable)
    }
}

/// Install host that never finds the facility and cannot install it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInstall;

impl InstallHost for NoInstall {
    fn is_installed(&self) -> bool {
        false
    }

    fn launch_elevated(
        &self,
        _request: &crate::install::LaunchRequest,
    ) -> Result<crate::install::Launch, crate::error::InstallError> {
        Err(crate::error::InstallError::Unsupported)
    }
}
