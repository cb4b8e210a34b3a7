#![cfg(target_os = "linux")]

//! Linux virtual device backend.
//!
//! - **uinput** ([`evdev_sink`]): gamepads created through `/dev/uinput` with
//!   the `evdev` crate.
//! - **modprobe** ([`modprobe`]): loads the `uinput` module via `pkexec` when
//!   it is missing.

pub mod evdev_sink;
pub mod modprobe;

use crate::backends::uinput::UinputBackend;
use crate::config::Settings;
use std::sync::Arc;

pub use evdev_sink::{uinput_available, EvdevFactory};
pub use modprobe::PkexecHost;

/// uinput gamepads with the configured identity and settle delay.
pub fn uinput_backend(settings: &Settings) -> UinputBackend<EvdevFactory> {
    UinputBackend::new(
        EvdevFactory,
        settings.device.clone(),
        &settings.uinput,
        Arc::new(PkexecHost),
    )
}
