//! Event-stream backend (Linux uinput).
//!
//! The full capability set (button codes, axis ranges, bus and ids) is
//! registered once when the device is created. After that every change is a
//! single event followed by `SYN_REPORT`; nothing is resent.
//!
//! The D-pad is not a set of keys here: it is the `ABS_HAT0X`/`ABS_HAT0Y` pair.
//! Every direction change rewrites its hat axis from all held directions, so
//! releasing Up while Down is still held leaves the hat at `+1`.

use super::{BackendKind, IdentityScheme, VirtualDeviceBackend};
use crate::config::UinputSettings;
use crate::device::{DeviceId, VirtualPad};
use crate::error::{BackendError, ControllerError};
use crate::event::RawEvent;
use crate::install::InstallHost;
use crate::mapping::{codes, Axis, Button, GamepadAxis, GamepadButton, Layout, LinuxInput};
use crate::metadata::DeviceIdentity;
use crate::report::{PadReport, Report, ReportStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Range registration for one absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxisSpec {
    pub code: u16,
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
}

/// Everything registered with the kernel before the device appears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub identity: DeviceIdentity,
    pub keys: Vec<u16>,
    pub axes: Vec<AbsAxisSpec>,
}

impl DeviceSpec {
    /// Xbox 360 style capabilities: 11 keys, four stick axes, two triggers, one hat.
    pub fn gamepad(identity: DeviceIdentity) -> Self {
        let keys = GamepadButton::ALL
            .iter()
            .filter_map(|b| match b.linux_input() {
                LinuxInput::Key(code) => Some(code),
                LinuxInput::Hat { .. } => None,
            })
            .collect();

        let mut axes: Vec<AbsAxisSpec> = GamepadAxis::ALL
            .iter()
            .map(|a| {
                let (min, max, flat) = if a.is_trigger() {
                    (0, 255, 0)
                } else {
                    (i32::from(i16::MIN), i32::from(i16::MAX), 128)
                };
                AbsAxisSpec {
                    code: a.linux_code(),
                    min,
                    max,
                    fuzz: if a.is_trigger() { 0 } else { 16 },
                    flat,
                }
            })
            .collect();
        for code in [codes::ABS_HAT0X, codes::ABS_HAT0Y] {
            axes.push(AbsAxisSpec {
                code,
                min: -1,
                max: 1,
                fuzz: 0,
                flat: 0,
            });
        }

        Self {
            identity,
            keys,
            axes,
        }
    }
}

/// A created kernel device.
pub trait EventSink: Send {
    /// Write `event` and then `SYN_REPORT`.
    fn write_frame(&mut self, event: RawEvent) -> io::Result<()>;
}

/// Opens kernel devices.
pub trait SinkFactory: Send {
    /// Is the uinput node present and openable?
    fn is_available(&self) -> bool;

    /// Register `spec` and create the device.
    fn open(&mut self, spec: &DeviceSpec) -> io::Result<Box<dyn EventSink>>;
}

pub struct UinputBackend<F> {
    factory: F,
    identity: DeviceIdentity,
    settle_delay: Duration,
    host: Arc<dyn InstallHost>,
}

impl<F: SinkFactory> UinputBackend<F> {
    pub fn new(
        factory: F,
        identity: DeviceIdentity,
        settings: &UinputSettings,
        host: Arc<dyn InstallHost>,
    ) -> Self {
        Self {
            factory,
            identity,
            settle_delay: settings.settle_delay(),
            host,
        }
    }
}

impl<F: SinkFactory> VirtualDeviceBackend for UinputBackend<F> {
    fn kind(&self) -> BackendKind {
        BackendKind::Uinput
    }

    fn layout(&self) -> Layout {
        Layout::Gamepad
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::Dynamic
    }

    fn is_supported(&self) -> bool {
        self.factory.is_available()
    }

    fn install_host(&self) -> Arc<dyn InstallHost> {
        self.host.clone()
    }

    fn create(&mut self, next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError> {
        if !self.factory.is_available() {
            return Err(ControllerError::DriverUnavailable);
        }
        let spec = DeviceSpec::gamepad(self.identity.clone());
        let sink = self.factory.open(&spec).map_err(BackendError::Io)?;
        // Give udev and readers time to pick the node up before the first event.
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }
        debug!(id = %next_id, name = %spec.identity.name, "uinput device created");
        Ok(Box::new(UinputPad {
            id: next_id,
            sink: Some(sink),
            store: ReportStore::new(),
        }))
    }
}

struct UinputPad {
    id: DeviceId,
    sink: Option<Box<dyn EventSink>>,
    store: ReportStore<PadReport>,
}

impl UinputPad {
    /// Stage `mutate`, then write the event `frame` builds from the staged report.
    fn emit(
        &mut self,
        mutate: impl FnOnce(&mut PadReport),
        frame: impl FnOnce(&PadReport) -> RawEvent,
    ) -> Result<(), ControllerError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(BackendError::rejected("write to destroyed device").into());
        };
        let id = self.id;
        self.store.update(mutate, |staged| {
            let event = frame(staged);
            sink.write_frame(event).map_err(|err| {
                warn!(%id, code = event.code, error = %err, "uinput write failed");
                ControllerError::from(BackendError::Io(err))
            })
        })
    }
}

/// Hat position on `axis` implied by the held D-pad directions.
///
/// Opposite directions held together cancel out to `0`.
fn hat_position(report: &PadReport, axis: u16) -> i32 {
    GamepadButton::ALL
        .iter()
        .filter(|b| report.is_pressed(**b))
        .map(|b| match b.linux_input() {
            LinuxInput::Hat { axis: a, value } if a == axis => value,
            _ => 0,
        })
        .sum::<i32>()
        .clamp(-1, 1)
}

impl VirtualPad for UinputPad {
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
        match button.linux_input() {
            LinuxInput::Key(code) => self.emit(
                |r| r.set_button(button, pressed),
                |_| RawEvent::key(code, pressed),
            ),
            LinuxInput::Hat { axis, .. } => self.emit(
                |r| {
                    r.set_button(button, pressed);
                    let value = hat_position(r, axis) as i8;
                    if axis == codes::ABS_HAT0X {
                        r.hat_x = value;
                    } else {
                        r.hat_y = value;
                    }
                },
                |r| RawEvent::abs(axis, hat_position(r, axis)),
            ),
        }
    }

    fn set_axis(&mut self, axis: Axis, value: f64) -> Result<(), ControllerError> {
        let Axis::Gamepad(axis) = axis else {
            return Err(ControllerError::AxisOutOfRange(-1));
        };
        let encoded = axis.encode(value);
        self.emit(
            |r| r.set_axis(axis, encoded),
            |_| RawEvent::abs(axis.linux_code(), encoded),
        )
    }

    fn report(&self) -> Report {
        Report::Pad(self.store.snapshot())
    }

    fn release(&mut self) {
        // Dropping the sink destroys the kernel device.
        if self.sink.take().is_some() {
            debug!(id = %self.id, "uinput device destroyed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Preinstalled;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Wire {
        frames: Vec<RawEvent>,
        specs: Vec<DeviceSpec>,
        fail: bool,
        destroyed: u32,
    }

    struct FakeSink(Arc<Mutex<Wire>>);

    impl EventSink for FakeSink {
        fn write_frame(&mut self, event: RawEvent) -> io::Result<()> {
            let mut wire = self.0.lock();
            if wire.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            wire.frames.push(event);
            wire.frames.push(RawEvent::syn());
            Ok(())
        }
    }

    impl Drop for FakeSink {
        fn drop(&mut self) {
            self.0.lock().destroyed += 1;
        }
    }

    struct FakeFactory(Arc<Mutex<Wire>>);

    impl SinkFactory for FakeFactory {
        fn is_available(&self) -> bool {
            true
        }
        fn open(&mut self, spec: &DeviceSpec) -> io::Result<Box<dyn EventSink>> {
            self.0.lock().specs.push(spec.clone());
            Ok(Box::new(FakeSink(self.0.clone())))
        }
    }

    fn backend() -> (UinputBackend<FakeFactory>, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let settings = UinputSettings { settle_delay_ms: 0 };
        (
            UinputBackend::new(
                FakeFactory(wire.clone()),
                DeviceIdentity::default(),
                &settings,
                Arc::new(Preinstalled),
            ),
            wire,
        )
    }

    #[test]
    fn capabilities_registered_once() {
        let (mut be, wire) = backend();
        let _pad = be.create(DeviceId(0)).unwrap();
        let wire = wire.lock();
        let spec = &wire.specs[0];
        assert_eq!(spec.keys.len(), 11);
        assert_eq!(spec.axes.len(), 8);
        let lt = spec.axes.iter().find(|a| a.code == codes::ABS_Z).unwrap();
        assert_eq!((lt.min, lt.max), (0, 255));
        let hat = spec.axes.iter().find(|a| a.code == codes::ABS_HAT0Y).unwrap();
        assert_eq!((hat.min, hat.max), (-1, 1));
        assert_eq!(spec.identity.vendor_id, 0x045e);
    }

    #[test]
    fn every_change_is_one_event_then_syn() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::A), true).unwrap();
        pad.set_axis(Axis::Gamepad(GamepadAxis::LeftY), -1.0).unwrap();

        let wire = wire.lock();
        assert_eq!(
            wire.frames,
            vec![
                RawEvent::key(codes::BTN_SOUTH, true),
                RawEvent::syn(),
                RawEvent::abs(codes::ABS_Y, -32768),
                RawEvent::syn(),
            ]
        );
    }

    #[test]
    fn dpad_is_a_hat_excursion() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::DpadLeft), true).unwrap();
        assert_eq!(pad.report().as_pad().unwrap().hat_x, -1);
        pad.set_button(Button::Gamepad(GamepadButton::DpadLeft), false).unwrap();
        assert_eq!(pad.report().as_pad().unwrap().hat_x, 0);

        let wire = wire.lock();
        let events: Vec<_> = wire.frames.iter().filter(|e| !e.is_syn()).copied().collect();
        assert_eq!(
            events,
            vec![
                RawEvent::abs(codes::ABS_HAT0X, -1),
                RawEvent::abs(codes::ABS_HAT0X, 0),
            ]
        );
        assert!(events.iter().all(|e| e.kind != codes::EV_KEY));
    }

    #[test]
    fn overlapping_directions_follow_held_buttons() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::DpadUp), true).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::DpadDown), true).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::DpadUp), false).unwrap();

        let report = pad.report();
        let report = report.as_pad().unwrap();
        assert!(report.is_pressed(GamepadButton::DpadDown));
        assert!(!report.is_pressed(GamepadButton::DpadUp));
        assert_eq!(report.hat_y, 1);

        let wire = wire.lock();
        let events: Vec<_> = wire.frames.iter().filter(|e| !e.is_syn()).copied().collect();
        assert_eq!(
            events,
            vec![
                RawEvent::abs(codes::ABS_HAT0Y, -1),
                RawEvent::abs(codes::ABS_HAT0Y, 0),
                RawEvent::abs(codes::ABS_HAT0Y, 1),
            ]
        );
    }

    #[test]
    fn failed_hat_write_keeps_direction_state() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_button(Button::Gamepad(GamepadButton::DpadRight), true).unwrap();
        wire.lock().fail = true;
        assert!(pad.set_button(Button::Gamepad(GamepadButton::DpadLeft), true).is_err());
        let report = pad.report();
        assert_eq!(report.as_pad().unwrap().hat_x, 1);
        assert!(!report.as_pad().unwrap().is_pressed(GamepadButton::DpadLeft));
    }

    #[test]
    fn triggers_are_encoded_to_byte_range() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_axis(Axis::Gamepad(GamepadAxis::RightTrigger), 1.0).unwrap();
        assert_eq!(wire.lock().frames[0], RawEvent::abs(codes::ABS_RZ, 255));
        assert_eq!(pad.report().as_pad().unwrap().axis(GamepadAxis::RightTrigger), 255);
    }

    #[test]
    fn failed_write_keeps_report_and_device() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        wire.lock().fail = true;
        let err = pad.set_button(Button::Gamepad(GamepadButton::B), true).unwrap_err();
        assert!(matches!(err, ControllerError::Backend(BackendError::Io(_))));
        assert_eq!(pad.report().button_bits(), 0);
        wire.lock().fail = false;
        pad.set_button(Button::Gamepad(GamepadButton::B), true).unwrap();
    }

    #[test]
    fn release_destroys_device_once() {
        let (mut be, wire) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.release();
        pad.release();
        drop(pad);
        assert_eq!(wire.lock().destroyed, 1);
    }
}
