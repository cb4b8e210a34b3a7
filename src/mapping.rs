//! Abstract control indices and their backend encodings.
//!
//! Callers address controls by small integers. This module owns the one table
//! that turns those integers into typed controls, and the value encoders every
//! backend uses. Validation happens here, before any backend is touched.
//!
//! ## Gamepad layout (Xbox 360 style)
//! | index | button | XUSB mask | Linux code |
//! |---|---|---|---|
//! | 0 | A | `0x1000` | `BTN_SOUTH` |
//! | 1 | B | `0x2000` | `BTN_EAST` |
//! | 2 | X | `0x4000` | `BTN_NORTH` |
//! | 3 | Y | `0x8000` | `BTN_WEST` |
//! | 4 | LB | `0x0100` | `BTN_TL` |
//! | 5 | RB | `0x0200` | `BTN_TR` |
//! | 6, 7 | reserved | - | - |
//! | 8 | Back | `0x0020` | `BTN_SELECT` |
//! | 9 | Start | `0x0010` | `BTN_START` |
//! | 10 | LThumb | `0x0040` | `BTN_THUMBL` |
//! | 11 | RThumb | `0x0080` | `BTN_THUMBR` |
//! | 12..15 | DPad U/D/L/R | `0x0001..0x0008` | `ABS_HAT0Y`/`ABS_HAT0X` |
//! | 16 | Guide | `0x0400` | `BTN_MODE` |
//!
//! Axes: `0` LX, `1` LY, `2` RX, `3` RY, `4` LT, `5` RT, all in `[-1.0, 1.0]`.
//!
//! ## Joystick layout (vJoy style)
//! Buttons `1..=128` (6 and 7 are still rejected), axes `0..=7` mapped to HID
//! usages X, Y, Z, Rx, Ry, Rz, Slider, Dial, values in `[0.0, 1.0]`.

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};

/// Highest abstract button index accepted by the range check.
pub const MAX_BUTTON_INDEX: i64 = 31;

/// Highest abstract axis index accepted by the range check.
pub const MAX_AXIS_INDEX: i64 = 7;

/// Button indices rejected on every backend.
pub const RESERVED_BUTTONS: [i64; 2] = [6, 7];

/// Largest vJoy-style button number.
pub const MAX_JOYSTICK_BUTTON: i64 = 128;

/// Linux input event codes used by the event-stream backend.
pub mod codes {
    pub const EV_SYN: u16 = 0x00;
    pub const EV_KEY: u16 = 0x01;
    pub const EV_ABS: u16 = 0x03;
    pub const SYN_REPORT: u16 = 0;

    pub const BTN_SOUTH: u16 = 0x130;
    pub const BTN_EAST: u16 = 0x131;
    pub const BTN_NORTH: u16 = 0x133;
    pub const BTN_WEST: u16 = 0x134;
    pub const BTN_TL: u16 = 0x136;
    pub const BTN_TR: u16 = 0x137;
    pub const BTN_SELECT: u16 = 0x13a;
    pub const BTN_START: u16 = 0x13b;
    pub const BTN_MODE: u16 = 0x13c;
    pub const BTN_THUMBL: u16 = 0x13d;
    pub const BTN_THUMBR: u16 = 0x13e;

    pub const ABS_X: u16 = 0x00;
    pub const ABS_Y: u16 = 0x01;
    pub const ABS_Z: u16 = 0x02;
    pub const ABS_RX: u16 = 0x03;
    pub const ABS_RY: u16 = 0x04;
    pub const ABS_RZ: u16 = 0x05;
    pub const ABS_HAT0X: u16 = 0x10;
    pub const ABS_HAT0Y: u16 = 0x11;
}

/// XUSB (`XINPUT_GAMEPAD_*`) button masks.
pub mod xusb {
    pub const DPAD_UP: u16 = 0x0001;
    pub const DPAD_DOWN: u16 = 0x0002;
    pub const DPAD_LEFT: u16 = 0x0004;
    pub const DPAD_RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LEFT_THUMB: u16 = 0x0040;
    pub const RIGHT_THUMB: u16 = 0x0080;
    pub const LEFT_SHOULDER: u16 = 0x0100;
    pub const RIGHT_SHOULDER: u16 = 0x0200;
    pub const GUIDE: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;
}

/// Which control table a device uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Layout {
    /// Xbox 360 style: buttons `0..=16`, six axes in `[-1, 1]`.
    Gamepad,
    /// vJoy style: buttons `1..=128`, eight axes in `[0, 1]`.
    Joystick,
}

impl Layout {
    /// Validate an abstract button index against this layout.
    pub fn button(self, index: i64) -> Result<Button, ControllerError> {
        if RESERVED_BUTTONS.contains(&index) {
            return Err(ControllerError::ReservedButton(index));
        }
        match self {
            Layout::Gamepad => GamepadButton::from_index(index).map(Button::Gamepad),
            Layout::Joystick => JoystickButton::from_index(index).map(Button::Joystick),
        }
    }

    /// Validate an abstract axis index and its value against this layout.
    pub fn axis(self, index: i64, value: f64) -> Result<Axis, ControllerError> {
        if !(0..=MAX_AXIS_INDEX).contains(&index) {
            return Err(ControllerError::AxisOutOfRange(index));
        }
        let axis = match self {
            Layout::Gamepad => Axis::Gamepad(GamepadAxis::from_index(index)?),
            Layout::Joystick => Axis::Joystick(JoystickAxis::from_index(index)?),
        };
        let (min, max) = self.axis_domain();
        // NaN fails both comparisons, so test for containment explicitly.
        if !(value >= min && value <= max) {
            return Err(ControllerError::AxisValueOutOfRange { value, min, max });
        }
        Ok(axis)
    }

    /// Inclusive value domain for axes on this layout.
    pub fn axis_domain(self) -> (f64, f64) {
        match self {
            Layout::Gamepad => (-1.0, 1.0),
            Layout::Joystick => (0.0, 1.0),
        }
    }
}

/// A validated button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Gamepad(GamepadButton),
    Joystick(JoystickButton),
}

/// A validated axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Gamepad(GamepadAxis),
    Joystick(JoystickAxis),
}

/// Gamepad buttons keyed by their abstract index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadButton {
    A = 0,
    B = 1,
    X = 2,
    Y = 3,
    LeftShoulder = 4,
    RightShoulder = 5,
    Back = 8,
    Start = 9,
    LeftThumb = 10,
    RightThumb = 11,
    DpadUp = 12,
    DpadDown = 13,
    DpadLeft = 14,
    DpadRight = 15,
    Guide = 16,
}

/// How the event-stream backend expresses a gamepad button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinuxInput {
    /// An `EV_KEY` code.
    Key(u16),
    /// A hat excursion: `axis` goes to `value` on press and back to 0 on release.
    Hat { axis: u16, value: i32 },
}

impl GamepadButton {
    pub const ALL: [GamepadButton; 15] = [
        GamepadButton::A,
        GamepadButton::B,
        GamepadButton::X,
        GamepadButton::Y,
        GamepadButton::LeftShoulder,
        GamepadButton::RightShoulder,
        GamepadButton::Back,
        GamepadButton::Start,
        GamepadButton::LeftThumb,
        GamepadButton::RightThumb,
        GamepadButton::DpadUp,
        GamepadButton::DpadDown,
        GamepadButton::DpadLeft,
        GamepadButton::DpadRight,
        GamepadButton::Guide,
    ];

    pub fn from_index(index: i64) -> Result<Self, ControllerError> {
        if !(0..=MAX_BUTTON_INDEX).contains(&index) {
            return Err(ControllerError::ButtonOutOfRange(index));
        }
        Self::ALL
            .iter()
            .copied()
            .find(|b| b.index() == index)
            .ok_or(if RESERVED_BUTTONS.contains(&index) {
                ControllerError::ReservedButton(index)
            } else {
                ControllerError::ButtonOutOfRange(index)
            })
    }

    #[inline]
    pub fn index(self) -> i64 {
        self as i64
    }

    pub fn name(self) -> &'static str {
        match self {
            GamepadButton::A => "A",
            GamepadButton::B => "B",
            GamepadButton::X => "X",
            GamepadButton::Y => "Y",
            GamepadButton::LeftShoulder => "LB",
            GamepadButton::RightShoulder => "RB",
            GamepadButton::Back => "Back",
            GamepadButton::Start => "Start",
            GamepadButton::LeftThumb => "LThumb",
            GamepadButton::RightThumb => "RThumb",
            GamepadButton::DpadUp => "DpadUp",
            GamepadButton::DpadDown => "DpadDown",
            GamepadButton::DpadLeft => "DpadLeft",
            GamepadButton::DpadRight => "DpadRight",
            GamepadButton::Guide => "Guide",
        }
    }

    pub fn xusb_mask(self) -> u16 {
        match self {
            GamepadButton::A => xusb::A,
            GamepadButton::B => xusb::B,
            GamepadButton::X => xusb::X,
            GamepadButton::Y => xusb::Y,
            GamepadButton::LeftShoulder => xusb::LEFT_SHOULDER,
            GamepadButton::RightShoulder => xusb::RIGHT_SHOULDER,
            GamepadButton::Back => xusb::BACK,
            GamepadButton::Start => xusb::START,
            GamepadButton::LeftThumb => xusb::LEFT_THUMB,
            GamepadButton::RightThumb => xusb::RIGHT_THUMB,
            GamepadButton::DpadUp => xusb::DPAD_UP,
            GamepadButton::DpadDown => xusb::DPAD_DOWN,
            GamepadButton::DpadLeft => xusb::DPAD_LEFT,
            GamepadButton::DpadRight => xusb::DPAD_RIGHT,
            GamepadButton::Guide => xusb::GUIDE,
        }
    }

    pub fn linux_input(self) -> LinuxInput {
        use codes::*;
        match self {
            GamepadButton::A => LinuxInput::Key(BTN_SOUTH),
            GamepadButton::B => LinuxInput::Key(BTN_EAST),
            GamepadButton::X => LinuxInput::Key(BTN_NORTH),
            GamepadButton::Y => LinuxInput::Key(BTN_WEST),
            GamepadButton::LeftShoulder => LinuxInput::Key(BTN_TL),
            GamepadButton::RightShoulder => LinuxInput::Key(BTN_TR),
            GamepadButton::Back => LinuxInput::Key(BTN_SELECT),
            GamepadButton::Start => LinuxInput::Key(BTN_START),
            GamepadButton::LeftThumb => LinuxInput::Key(BTN_THUMBL),
            GamepadButton::RightThumb => LinuxInput::Key(BTN_THUMBR),
            GamepadButton::Guide => LinuxInput::Key(BTN_MODE),
            GamepadButton::DpadUp => LinuxInput::Hat { axis: ABS_HAT0Y, value: -1 },
            GamepadButton::DpadDown => LinuxInput::Hat { axis: ABS_HAT0Y, value: 1 },
            GamepadButton::DpadLeft => LinuxInput::Hat { axis: ABS_HAT0X, value: -1 },
            GamepadButton::DpadRight => LinuxInput::Hat { axis: ABS_HAT0X, value: 1 },
        }
    }
}

/// Gamepad axes keyed by their abstract index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GamepadAxis {
    LeftX = 0,
    LeftY = 1,
    RightX = 2,
    RightY = 3,
    LeftTrigger = 4,
    RightTrigger = 5,
}

impl GamepadAxis {
    pub const ALL: [GamepadAxis; 6] = [
        GamepadAxis::LeftX,
        GamepadAxis::LeftY,
        GamepadAxis::RightX,
        GamepadAxis::RightY,
        GamepadAxis::LeftTrigger,
        GamepadAxis::RightTrigger,
    ];

    pub fn from_index(index: i64) -> Result<Self, ControllerError> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| *a as i64 == index)
            .ok_or(ControllerError::AxisOutOfRange(index))
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn is_trigger(self) -> bool {
        matches!(self, GamepadAxis::LeftTrigger | GamepadAxis::RightTrigger)
    }

    pub fn name(self) -> &'static str {
        match self {
            GamepadAxis::LeftX => "LX",
            GamepadAxis::LeftY => "LY",
            GamepadAxis::RightX => "RX",
            GamepadAxis::RightY => "RY",
            GamepadAxis::LeftTrigger => "LT",
            GamepadAxis::RightTrigger => "RT",
        }
    }

    pub fn linux_code(self) -> u16 {
        match self {
            GamepadAxis::LeftX => codes::ABS_X,
            GamepadAxis::LeftY => codes::ABS_Y,
            GamepadAxis::RightX => codes::ABS_RX,
            GamepadAxis::RightY => codes::ABS_RY,
            GamepadAxis::LeftTrigger => codes::ABS_Z,
            GamepadAxis::RightTrigger => codes::ABS_RZ,
        }
    }

    /// Encode a validated value the way every gamepad backend except XUSB does:
    /// sticks to `i16`, triggers to `0..=255`.
    pub fn encode(self, value: f64) -> i32 {
        if self.is_trigger() {
            i32::from(encode_trigger(value))
        } else {
            i32::from(encode_stick(value))
        }
    }
}

/// vJoy-style button number (`1..=128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JoystickButton(u8);

impl JoystickButton {
    pub fn from_index(index: i64) -> Result<Self, ControllerError> {
        if RESERVED_BUTTONS.contains(&index) {
            return Err(ControllerError::ReservedButton(index));
        }
        if !(1..=MAX_JOYSTICK_BUTTON).contains(&index) {
            return Err(ControllerError::ButtonOutOfRange(index));
        }
        u8::try_from(index)
            .map(JoystickButton)
            .map_err(|_| ControllerError::ButtonOutOfRange(index))
    }

    #[inline]
    pub fn number(self) -> u8 {
        self.0
    }
}

/// vJoy-style axes keyed by their abstract index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoystickAxis {
    X = 0,
    Y = 1,
    Z = 2,
    Rx = 3,
    Ry = 4,
    Rz = 5,
    Slider = 6,
    Dial = 7,
}

impl JoystickAxis {
    pub const ALL: [JoystickAxis; 8] = [
        JoystickAxis::X,
        JoystickAxis::Y,
        JoystickAxis::Z,
        JoystickAxis::Rx,
        JoystickAxis::Ry,
        JoystickAxis::Rz,
        JoystickAxis::Slider,
        JoystickAxis::Dial,
    ];

    pub fn from_index(index: i64) -> Result<Self, ControllerError> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| *a as i64 == index)
            .ok_or(ControllerError::AxisOutOfRange(index))
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// HID usage on the Generic Desktop page (`HID_USAGE_X` .. `HID_USAGE_SL1`).
    pub fn hid_usage(self) -> u32 {
        0x30 + self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            JoystickAxis::X => "X",
            JoystickAxis::Y => "Y",
            JoystickAxis::Z => "Z",
            JoystickAxis::Rx => "Rx",
            JoystickAxis::Ry => "Ry",
            JoystickAxis::Rz => "Rz",
            JoystickAxis::Slider => "Slider",
            JoystickAxis::Dial => "Dial",
        }
    }
}

/// Map a stick value in `[-1, 1]` onto the full signed 16-bit range.
///
/// `1.0 -> 32767`, `0.0 -> 0`, `-1.0 -> -32768`. The two halves are scaled
/// separately, mirroring how XInput readers normalize thumbsticks.
pub fn encode_stick(value: f64) -> i16 {
    let v = value.clamp(-1.0, 1.0);
    let scaled = if v >= 0.0 { v * 32767.0 } else { v * 32768.0 };
    scaled.round() as i16
}

/// Map a trigger value in `[-1, 1]` onto `0..=255` via `(v + 1) * 127.5`.
pub fn encode_trigger(value: f64) -> u8 {
    let v = value.clamp(-1.0, 1.0);
    ((v + 1.0) * 127.5) as u8
}

/// Map a joystick value in `[0, 1]` onto the vJoy range `0x1..=0x8000`.
pub fn encode_joystick_axis(value: f64) -> i32 {
    let v = value.clamp(0.0, 1.0);
    (v * f64::from(0x7FFF)) as i32 + 1
}
