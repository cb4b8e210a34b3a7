//! Fixed-slot joystick backend (vJoy style).
//!
//! The driver exposes up to [`SLOT_COUNT`](crate::slots::SLOT_COUNT) pre-configured devices. Each slot
//! decides its own button count and which of the eight axes exist, so the pad
//! checks both before writing.
//!
//! ## Identity
//! Public ids are the 0-based slot index. The driver numbers devices from 1,
//! so every call into [`JoystickDriver`] uses `rid = slot + 1`. The conversion
//! happens in exactly one place ([`NativeIds`]).

use super::{BackendKind, IdentityScheme, VirtualDeviceBackend};
use crate::device::{DeviceId, VirtualPad};
use crate::error::{BackendError, ControllerError};
use crate::event::{self, ChannelDesc, ChannelKind};
use crate::install::InstallHost;
use crate::mapping::{Axis, Button, JoystickAxis, Layout};
use crate::report::{JoystickReport, Report, ReportStore};
use crate::slots::{SlotDriver, SlotState, SlotTable};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Native joystick driver. All ids are the driver's 1-based `rID`s.
pub trait JoystickDriver: Send {
    /// Driver enabled and the user-mode library matches the kernel driver.
    fn enabled(&self) -> bool;

    fn status(&self, rid: u32) -> SlotState;

    fn acquire(&mut self, rid: u32) -> bool;

    fn relinquish(&mut self, rid: u32);

    /// Center axes and release buttons.
    fn reset(&mut self, rid: u32) -> bool;

    /// Buttons configured on the device.
    fn button_count(&self, rid: u32) -> u8;

    fn axis_exists(&self, rid: u32, usage: u32) -> bool;

    fn set_button(&mut self, rid: u32, button: u8, down: bool) -> bool;

    fn set_axis(&mut self, rid: u32, usage: u32, value: i32) -> bool;
}

/// Convert a 0-based slot into the driver's 1-based id.
#[inline]
pub fn native_id(slot: u32) -> u32 {
    slot + 1
}

/// [`SlotDriver`] view of a [`JoystickDriver`].
struct NativeIds<'a, D>(&'a mut D);

impl<D: JoystickDriver> SlotDriver for NativeIds<'_, D> {
    fn slot_state(&self, slot: u32) -> SlotState {
        self.0.status(native_id(slot))
    }

    fn acquire(&mut self, slot: u32) -> bool {
        self.0.acquire(native_id(slot))
    }

    fn relinquish(&mut self, slot: u32) {
        self.0.relinquish(native_id(slot))
    }
}

struct Shared<D> {
    driver: D,
    table: SlotTable,
}

pub struct JoystickBackend<D> {
    shared: Arc<Mutex<Shared<D>>>,
    host: Arc<dyn InstallHost>,
}

impl<D: JoystickDriver> JoystickBackend<D> {
    pub fn new(driver: D, host: Arc<dyn InstallHost>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                driver,
                table: SlotTable::new(),
            })),
            host,
        }
    }

    /// Slots currently owned through this backend.
    pub fn owned(&self) -> usize {
        self.shared.lock().table.owned()
    }
}

impl<D: JoystickDriver + 'static> VirtualDeviceBackend for JoystickBackend<D> {
    fn kind(&self) -> BackendKind {
        BackendKind::Joystick
    }

    fn layout(&self) -> Layout {
        Layout::Joystick
    }

    fn identity_scheme(&self) -> IdentityScheme {
        IdentityScheme::FixedSlots
    }

    fn is_supported(&self) -> bool {
        self.shared.lock().driver.enabled()
    }

    fn install_host(&self) -> Arc<dyn InstallHost> {
        self.host.clone()
    }

    fn create(&mut self, _next_id: DeviceId) -> Result<Box<dyn VirtualPad>, ControllerError> {
        let mut guard = self.shared.lock();
        let Shared { driver, table } = &mut *guard;
        if !driver.enabled() {
            return Err(ControllerError::DriverUnavailable);
        }
        let slot = table.allocate(&mut NativeIds(&mut *driver))?;
        let rid = native_id(slot);
        if !driver.reset(rid) {
            warn!(slot, rid, "reset after acquire failed");
        }
        let buttons = driver.button_count(rid);
        let axes = JoystickAxis::ALL.map(|a| driver.axis_exists(rid, a.hid_usage()));
        drop(guard);

        debug!(slot, rid, buttons, "joystick slot ready");
        Ok(Box::new(JoystickPad {
            slot,
            buttons,
            axes,
            shared: Some(self.shared.clone()),
            store: ReportStore::new(),
        }))
    }
}

struct JoystickPad<D: JoystickDriver> {
    slot: u32,
    buttons: u8,
    axes: [bool; 8],
    shared: Option<Arc<Mutex<Shared<D>>>>,
    store: ReportStore<JoystickReport>,
}

impl<D: JoystickDriver> JoystickPad<D> {
    /// Reset and relinquish the slot. Idempotent.
    fn release_slot(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut guard = shared.lock();
        let Shared { driver, table } = &mut *guard;
        let rid = native_id(self.slot);
        if !driver.reset(rid) {
            debug!(rid, "reset before relinquish failed");
        }
        table.release(self.slot, &mut NativeIds(&mut *driver));
    }

    fn shared(&self) -> Result<&Arc<Mutex<Shared<D>>>, ControllerError> {
        self.shared
            .as_ref()
            .ok_or_else(|| BackendError::rejected("write to released slot").into())
    }
}

impl<D: JoystickDriver + 'static> VirtualPad for JoystickPad<D> {
    fn id(&self) -> DeviceId {
        DeviceId(self.slot)
    }

    fn layout(&self) -> Layout {
        Layout::Joystick
    }

    fn set_button(&mut self, button: Button, pressed: bool) -> Result<(), ControllerError> {
        let Button::Joystick(button) = button else {
            return Err(ControllerError::ButtonOutOfRange(-1));
        };
        if button.number() > self.buttons {
            return Err(ControllerError::ButtonOutOfRange(i64::from(button.number())));
        }
        let rid = native_id(self.slot);
        let cell = self.shared()?.clone();
        let mut shared = cell.lock();
        self.store.update(
            |r| r.set_button(button, pressed),
            |_| {
                if shared.driver.set_button(rid, button.number(), pressed) {
                    Ok(())
                } else {
                    warn!(rid, button = button.number(), "SetBtn rejected");
                    Err(ControllerError::from(BackendError::rejected("SetBtn")))
                }
            },
        )
    }

    fn set_axis(&mut self, axis: Axis, value: f64) -> Result<(), ControllerError> {
        let Axis::Joystick(axis) = axis else {
            return Err(ControllerError::AxisOutOfRange(-1));
        };
        if !self.axes[axis.index()] {
            return Err(ControllerError::AxisUnavailable(axis as u8));
        }
        let rid = native_id(self.slot);
        let cell = self.shared()?.clone();
        let mut shared = cell.lock();
        self.store.update(
            |r| r.set_axis(axis, value),
            |r| {
                let encoded = r.axis(axis).unwrap_or(1);
                if shared.driver.set_axis(rid, axis.hid_usage(), encoded) {
                    Ok(())
                } else {
                    warn!(rid, axis = axis.name(), "SetAxis rejected");
                    Err(ControllerError::from(BackendError::rejected("SetAxis")))
                }
            },
        )
    }

    fn report(&self) -> Report {
        Report::Joystick(self.store.snapshot())
    }

    fn describe(&self) -> Vec<ChannelDesc> {
        event::describe(Layout::Joystick, Some(self.buttons))
            .into_iter()
            .filter(|c| c.kind != ChannelKind::Axis || self.axes[usize::from(c.idx)])
            .collect()
    }

    fn release(&mut self) {
        self.release_slot();
    }
}

impl<D: JoystickDriver> Drop for JoystickPad<D> {
    fn drop(&mut self) {
        self.release_slot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Preinstalled;
    use crate::mapping::JoystickButton;

    #[derive(Default)]
    struct Log {
        acquired: Vec<u32>,
        relinquished: Vec<u32>,
        buttons: Vec<(u32, u8, bool)>,
        axes: Vec<(u32, u32, i32)>,
        busy: Vec<u32>,
        reject_writes: bool,
    }

    #[derive(Clone, Default)]
    struct FakeVjoy(Arc<Mutex<Log>>);

    impl JoystickDriver for FakeVjoy {
        fn enabled(&self) -> bool {
            true
        }
        fn status(&self, rid: u32) -> SlotState {
            let log = self.0.lock();
            if log.busy.contains(&rid) {
                SlotState::Unavailable
            } else if log.acquired.contains(&rid) {
                SlotState::Owned
            } else {
                SlotState::Free
            }
        }
        fn acquire(&mut self, rid: u32) -> bool {
            self.0.lock().acquired.push(rid);
            true
        }
        fn relinquish(&mut self, rid: u32) {
            let mut log = self.0.lock();
            log.acquired.retain(|r| *r != rid);
            log.relinquished.push(rid);
        }
        fn reset(&mut self, _rid: u32) -> bool {
            true
        }
        fn button_count(&self, _rid: u32) -> u8 {
            32
        }
        fn axis_exists(&self, _rid: u32, usage: u32) -> bool {
            // X, Y, Z only
            usage <= 0x32
        }
        fn set_button(&mut self, rid: u32, button: u8, down: bool) -> bool {
            let mut log = self.0.lock();
            log.buttons.push((rid, button, down));
            !log.reject_writes
        }
        fn set_axis(&mut self, rid: u32, usage: u32, value: i32) -> bool {
            let mut log = self.0.lock();
            log.axes.push((rid, usage, value));
            !log.reject_writes
        }
    }

    fn backend() -> (JoystickBackend<FakeVjoy>, Arc<Mutex<Log>>) {
        let driver = FakeVjoy::default();
        let log = driver.0.clone();
        (JoystickBackend::new(driver, Arc::new(Preinstalled)), log)
    }

    fn button(n: i64) -> Button {
        Button::Joystick(JoystickButton::from_index(n).unwrap())
    }

    #[test]
    fn first_device_is_id_zero_on_native_one() {
        let (mut be, log) = backend();
        let pad = be.create(DeviceId(99)).unwrap();
        assert_eq!(pad.id(), DeviceId(0));
        assert_eq!(log.lock().acquired, vec![1]);
    }

    #[test]
    fn writes_use_native_ids() {
        let (mut be, log) = backend();
        let _first = be.create(DeviceId(0)).unwrap();
        let mut second = be.create(DeviceId(0)).unwrap();
        assert_eq!(second.id(), DeviceId(1));

        second.set_button(button(3), true).unwrap();
        second.set_axis(Axis::Joystick(JoystickAxis::Y), 1.0).unwrap();
        let log = log.lock();
        assert_eq!(log.buttons, vec![(2, 3, true)]);
        assert_eq!(log.axes, vec![(2, 0x31, 32768)]);
    }

    #[test]
    fn sixteen_slots_then_exhausted() {
        let (mut be, _) = backend();
        let pads: Vec<_> = (0..16).map(|_| be.create(DeviceId(0)).unwrap()).collect();
        assert_eq!(pads.len(), 16);
        assert!(matches!(
            be.create(DeviceId(0)),
            Err(ControllerError::Exhausted(16))
        ));
    }

    #[test]
    fn slots_busy_elsewhere_are_skipped() {
        let (mut be, log) = backend();
        log.lock().busy = vec![1, 2];
        let pad = be.create(DeviceId(0)).unwrap();
        assert_eq!(pad.id(), DeviceId(2));
    }

    #[test]
    fn missing_axis_is_a_validation_error() {
        let (mut be, log) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        let err = pad
            .set_axis(Axis::Joystick(JoystickAxis::Slider), 0.5)
            .unwrap_err();
        assert!(matches!(err, ControllerError::AxisUnavailable(6)));
        assert!(log.lock().axes.is_empty());
        let axes = pad
            .describe()
            .into_iter()
            .filter(|c| c.kind == ChannelKind::Axis)
            .count();
        assert_eq!(axes, 3);
    }

    #[test]
    fn buttons_beyond_slot_configuration_are_rejected() {
        let (mut be, _) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        assert!(pad.set_button(button(32), true).is_ok());
        let err = pad.set_button(button(33), true).unwrap_err();
        assert!(err.is_range_error());
    }

    #[test]
    fn rejected_write_keeps_report() {
        let (mut be, log) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.set_button(button(1), true).unwrap();
        let before = pad.report();
        log.lock().reject_writes = true;
        assert!(pad.set_button(button(2), true).is_err());
        assert_eq!(pad.report(), before);
    }

    #[test]
    fn release_relinquishes_once_and_frees_slot() {
        let (mut be, log) = backend();
        let mut pad = be.create(DeviceId(0)).unwrap();
        pad.release();
        pad.release();
        drop(pad);
        assert_eq!(log.lock().relinquished, vec![1]);
        assert_eq!(be.owned(), 0);
        assert_eq!(be.create(DeviceId(0)).unwrap().id(), DeviceId(0));
    }
}
