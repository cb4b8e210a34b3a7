//! Virtual gamepad and joystick devices at the OS level.
//!
//! `stickpad` programs the virtual-HID facility each desktop OS already has:
//! ViGEm or vJoy on Windows, uinput on Linux, a bundled HID helper on macOS.
//! Software reading input sees an ordinary controller.
//!
//! The usual flow:
//! 1. [`Registry::is_supported`] probes the facility.
//! 2. If absent, [`Registry::install`] installs it with elevation on a
//!    background thread and resolves to `true`/`false`.
//! 3. [`Registry::create`] materializes a device and returns a
//!    [`ControllerHandle`]; button and axis calls on the handle block until
//!    the OS has the change.
//! 4. [`ControllerHandle::destroy`], [`Registry::shutdown`] or dropping the
//!    registry releases the device.
//!
//! [`global`] gives a process-wide registry over the platform backend.
//! Embedders that need a specific backend (or a fake one in tests) build a
//! [`Registry`] directly from anything implementing
//! [`VirtualDeviceBackend`](backends::VirtualDeviceBackend).

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod install;
pub mod manager;
pub mod mapping;
pub mod metadata;
pub mod report;
pub mod slots;

pub use config::{RetryPolicy, Settings};
pub use device::*;
pub use error::{BackendError, ConfigError, ControllerError, ErrorKind, InstallError};
pub use event::{ChannelDesc, ChannelKind};
pub use install::{InstallTask, InstallationState, Installer};
pub use manager::*;
pub use mapping::Layout;
pub use report::Report;
