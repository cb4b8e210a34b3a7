#![cfg(target_os = "linux")]

//! uinput devices through `evdev`.

use crate::backends::uinput::{DeviceSpec, EventSink, SinkFactory};
use crate::event::RawEvent;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    UinputAbsSetup,
};
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Candidate uinput nodes, in the order the kernel docs list them.
pub const UINPUT_NODES: [&str; 2] = ["/dev/uinput", "/dev/input/uinput"];

/// Can a uinput node be opened for writing?
///
/// A node that exists but cannot be opened still counts as supported (the
/// facility is there; permissions are the user's to fix), with a warning.
pub fn uinput_available() -> bool {
    let mut present = false;
    for node in UINPUT_NODES {
        let path = Path::new(node);
        if !path.exists() {
            continue;
        }
        present = true;
        let opened = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path);
        match opened {
            Ok(_) => return true,
            Err(err) => debug!(node, error = %err, "uinput node not writable"),
        }
    }
    if present {
        warn!("uinput node exists but is not writable; check udev rules or group membership");
    }
    present
}

/// [`SinkFactory`] that builds real uinput devices.
#[derive(Debug, Default)]
pub struct EvdevFactory;

impl SinkFactory for EvdevFactory {
    fn is_available(&self) -> bool {
        uinput_available()
    }

    fn open(&mut self, spec: &DeviceSpec) -> io::Result<Box<dyn EventSink>> {
        let id = &spec.identity;
        let mut keys = AttributeSet::<Key>::new();
        for code in &spec.keys {
            keys.insert(Key::new(*code));
        }

        let mut builder = VirtualDeviceBuilder::new()?
            .name(&id.name)
            .input_id(InputId::new(
                BusType::BUS_USB,
                id.vendor_id,
                id.product_id,
                id.version,
            ))
            .with_keys(&keys)?;
        for axis in &spec.axes {
            let setup = UinputAbsSetup::new(
                AbsoluteAxisType(axis.code),
                AbsInfo::new(0, axis.min, axis.max, axis.fuzz, axis.flat, 0),
            );
            builder = builder.with_absolute_axis(&setup)?;
        }
        let device = builder.build()?;
        Ok(Box::new(EvdevSink { device }))
    }
}

struct EvdevSink {
    device: VirtualDevice,
}

impl EventSink for EvdevSink {
    fn write_frame(&mut self, event: RawEvent) -> io::Result<()> {
        // `emit` appends the SYN_REPORT.
        self.device
            .emit(&[InputEvent::new(EventType(event.kind), event.code, event.value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::uinput::DeviceSpec;
    use crate::metadata::DeviceIdentity;

    #[test]
    #[ignore] // Requires uinput access (run with: cargo test -- --ignored)
    fn creates_a_real_gamepad() {
        let mut factory = EvdevFactory;
        let mut sink = factory
            .open(&DeviceSpec::gamepad(DeviceIdentity::default()))
            .unwrap();
        sink.write_frame(RawEvent::key(crate::mapping::codes::BTN_SOUTH, true))
            .unwrap();
    }
}
