//! The per-device capability set.
//!
//! A [`VirtualPad`] owns the native resources of exactly one virtual device.
//! Backends hand them out from
//! [`VirtualDeviceBackend::create`](crate::backends::VirtualDeviceBackend::create);
//! the [`Registry`](crate::Registry) wraps them in
//! [`ControllerHandle`](crate::ControllerHandle)s and is the only caller.
//!
//! Inputs arrive already validated ([`Button`]/[`Axis`] can only be built
//! through [`Layout`](crate::mapping::Layout)), so implementations only map and
//! write. `release` must be idempotent and must tolerate a partially
//! initialised device; implementations also call it from `Drop`.

use crate::error::ControllerError;
use crate::event::ChannelDesc;
use crate::mapping::{Axis, Button, Layout};
use crate::report::Report;
use serde::{Deserialize, Serialize};

/// Public device identity. Always 0-based.
///
/// Fixed-slot backends use the slot index; dynamic backends use a registry
/// counter that is never reused within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait VirtualPad: Send {
    fn id(&self) -> DeviceId;

    fn layout(&self) -> Layout;

    /// Press or release one button and push the change to the OS.
    fn set_button(&mut self, button: Button, pressed: bool) -> Result<(), ControllerError>;

    /// Move one axis (value already inside the layout's domain).
    fn set_axis(&mut self, axis: Axis, value: f64) -> Result<(), ControllerError>;

    /// Last report the driver accepted.
    fn report(&self) -> Report;

    /// Controls this device accepts.
    fn describe(&self) -> Vec<ChannelDesc> {
        crate::event::describe(self.layout(), None)
    }

    /// Release every native resource. Safe to call more than once.
    fn release(&mut self);
}
