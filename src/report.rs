//! In-memory report state.
//!
//! Each virtual device keeps the full button/axis snapshot it last pushed to
//! the OS. Updates go through [`ReportStore::update`]: the change is applied to
//! a copy, the copy is flushed to the driver, and only a successful flush
//! commits it. A rejected write leaves the committed report exactly as it was,
//! so the in-memory view never drifts from what the input stack believes.

use crate::mapping::{
    encode_joystick_axis, encode_stick, encode_trigger, GamepadAxis, GamepadButton, JoystickAxis,
    JoystickButton,
};
use serde::{Deserialize, Serialize};

/// Stage-then-commit holder for one device's report.
#[derive(Debug, Clone, Default)]
pub struct ReportStore<R> {
    committed: R,
}

impl<R: Copy + Default> ReportStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `mutate` to a copy of the current report and hand it to `flush`.
    ///
    /// The copy becomes the committed report only if `flush` succeeds.
    pub fn update<E>(
        &mut self,
        mutate: impl FnOnce(&mut R),
        flush: impl FnOnce(&R) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut staged = self.committed;
        mutate(&mut staged);
        flush(&staged)?;
        self.committed = staged;
        Ok(())
    }

    #[inline]
    pub fn snapshot(&self) -> R {
        self.committed
    }
}

/// The XUSB report submitted whole on every change (static-report backend).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct XusbReport {
    pub buttons: u16,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

impl XusbReport {
    pub fn set_button(&mut self, button: GamepadButton, pressed: bool) {
        if pressed {
            self.buttons |= button.xusb_mask();
        } else {
            self.buttons &= !button.xusb_mask();
        }
    }

    /// Vertical stick axes are sign-inverted: XUSB treats up as positive.
    pub fn set_axis(&mut self, axis: GamepadAxis, value: f64) {
        match axis {
            GamepadAxis::LeftX => self.thumb_lx = encode_stick(value),
            GamepadAxis::LeftY => self.thumb_ly = encode_stick(-value),
            GamepadAxis::RightX => self.thumb_rx = encode_stick(value),
            GamepadAxis::RightY => self.thumb_ry = encode_stick(-value),
            GamepadAxis::LeftTrigger => self.left_trigger = encode_trigger(value),
            GamepadAxis::RightTrigger => self.right_trigger = encode_trigger(value),
        }
    }
}

/// Mirror of a gamepad driven by discrete events or a helper process.
///
/// `buttons` is indexed by abstract button index; `axes` holds the encoded
/// values last written (sticks `i16` range, triggers `0..=255`); the hat pair
/// holds the D-pad excursion (`-1 | 0 | 1`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PadReport {
    pub buttons: u32,
    pub axes: [i32; 6],
    pub hat_x: i8,
    pub hat_y: i8,
}

impl PadReport {
    pub fn set_button(&mut self, button: GamepadButton, pressed: bool) {
        let bit = 1u32 << button.index();
        if pressed {
            self.buttons |= bit;
        } else {
            self.buttons &= !bit;
        }
    }

    pub fn is_pressed(&self, button: GamepadButton) -> bool {
        self.buttons & (1u32 << button.index()) != 0
    }

    pub fn set_axis(&mut self, axis: GamepadAxis, encoded: i32) {
        if let Some(slot) = self.axes.get_mut(axis.index()) {
            *slot = encoded;
        }
    }

    pub fn axis(&self, axis: GamepadAxis) -> i32 {
        self.axes.get(axis.index()).copied().unwrap_or(0)
    }
}

/// Mirror of a vJoy-style device: 128 buttons and eight axes.
///
/// Axes start at `None` (never written since acquisition/reset).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoystickReport {
    pub buttons: u128,
    pub axes: [Option<i32>; 8],
}

impl JoystickReport {
    pub fn set_button(&mut self, button: JoystickButton, pressed: bool) {
        let bit = 1u128 << (button.number() - 1);
        if pressed {
            self.buttons |= bit;
        } else {
            self.buttons &= !bit;
        }
    }

    pub fn is_pressed(&self, button: JoystickButton) -> bool {
        self.buttons & (1u128 << (button.number() - 1)) != 0
    }

    pub fn set_axis(&mut self, axis: JoystickAxis, value: f64) {
        if let Some(slot) = self.axes.get_mut(axis.index()) {
            *slot = Some(encode_joystick_axis(value));
        }
    }

    pub fn axis(&self, axis: JoystickAxis) -> Option<i32> {
        self.axes.get(axis.index()).copied().flatten()
    }
}

/// Read-back view of whatever report a device keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Report {
    Xusb(XusbReport),
    Pad(PadReport),
    Joystick(JoystickReport),
}

impl Report {
    /// Raw button bitmask, widened to `u128`.
    pub fn button_bits(&self) -> u128 {
        match self {
            Report::Xusb(r) => u128::from(r.buttons),
            Report::Pad(r) => u128::from(r.buttons),
            Report::Joystick(r) => r.buttons,
        }
    }

    pub fn as_xusb(&self) -> Option<&XusbReport> {
        match self {
            Report::Xusb(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_pad(&self) -> Option<&PadReport> {
        match self {
            Report::Pad(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_joystick(&self) -> Option<&JoystickReport> {
        match self {
            Report::Joystick(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_flush_keeps_committed_report() {
        let mut store: ReportStore<XusbReport> = ReportStore::new();
        store
            .update(|r| r.set_button(GamepadButton::A, true), |_| Ok::<_, ()>(()))
            .unwrap();
        let before = store.snapshot();

        let res = store.update(|r| r.set_button(GamepadButton::B, true), |_| Err(()));
        assert!(res.is_err());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn flush_sees_the_whole_staged_report() {
        let mut store: ReportStore<XusbReport> = ReportStore::new();
        store
            .update(|r| r.set_axis(GamepadAxis::LeftX, 1.0), |_| Ok::<_, ()>(()))
            .unwrap();
        let mut flushed = None;
        store
            .update(
                |r| r.set_button(GamepadButton::Y, true),
                |r| {
                    flushed = Some(*r);
                    Ok::<_, ()>(())
                },
            )
            .unwrap();
        let flushed = flushed.unwrap();
        assert_eq!(flushed.thumb_lx, 32767);
        assert_eq!(flushed.buttons, crate::mapping::xusb::Y);
    }

    #[test]
    fn xusb_vertical_axes_are_inverted() {
        let mut r = XusbReport::default();
        r.set_axis(GamepadAxis::LeftY, 1.0);
        r.set_axis(GamepadAxis::RightY, -1.0);
        assert_eq!(r.thumb_ly, -32768);
        assert_eq!(r.thumb_ry, 32767);
    }

    #[test]
    fn xusb_triggers() {
        let mut r = XusbReport::default();
        r.set_axis(GamepadAxis::LeftTrigger, -1.0);
        r.set_axis(GamepadAxis::RightTrigger, 1.0);
        assert_eq!(r.left_trigger, 0);
        assert_eq!(r.right_trigger, 255);
    }

    #[test]
    fn joystick_buttons_cover_128() {
        let mut r = JoystickReport::default();
        let top = JoystickButton::from_index(128).unwrap();
        r.set_button(top, true);
        assert!(r.is_pressed(top));
        assert_eq!(r.buttons, 1u128 << 127);
    }
}
