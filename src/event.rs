//! Channel descriptions and raw input frames.
//!
//! ## Channel descriptions
//! [`ChannelDesc`] publishes the controls a virtual device accepts, using the
//! same abstract indices as `button_down`/`set_axis`, so a host UI can list
//! them without hardcoding the tables in [`mapping`](crate::mapping).
//!
//! ## Raw frames
//! The event-stream backend talks to the kernel in `(type, code, value)`
//! triples. [`RawEvent`] is that triple; every change is written as one event
//! followed by a `SYN_REPORT`.

use crate::mapping::{codes, GamepadAxis, GamepadButton, JoystickAxis, Layout, MAX_JOYSTICK_BUTTON};

/// Category of an input channel on a device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Axis,
    Button,
}

/// Describes a channel exposed by a virtual device.
#[derive(Clone, Debug)]
pub struct ChannelDesc {
    /// Channel category.
    pub kind: ChannelKind,
    /// Abstract index (matches the index passed to the handle).
    pub idx: u16,
    /// Human-friendly name (e.g. `"A"`, `"LX"`, `"Slider"`).
    pub name: String,
    /// Lowest accepted value (normalized domain, not driver units).
    pub logical_min: f64,
    /// Highest accepted value.
    pub logical_max: f64,
}

/// Publish the channel map for a layout.
///
/// `joystick_buttons` bounds the button list for joystick layouts (vJoy slots
/// are configured with fewer than 128 buttons more often than not).
pub fn describe(layout: Layout, joystick_buttons: Option<u8>) -> Vec<ChannelDesc> {
    let mut out = Vec::new();
    let (min, max) = layout.axis_domain();
    match layout {
        Layout::Gamepad => {
            for axis in GamepadAxis::ALL {
                out.push(ChannelDesc {
                    kind: ChannelKind::Axis,
                    idx: axis as u16,
                    name: axis.name().to_string(),
                    logical_min: min,
                    logical_max: max,
                });
            }
            for button in GamepadButton::ALL {
                out.push(ChannelDesc {
                    kind: ChannelKind::Button,
                    idx: button as u16,
                    name: button.name().to_string(),
                    logical_min: 0.0,
                    logical_max: 1.0,
                });
            }
        }
        Layout::Joystick => {
            for axis in JoystickAxis::ALL {
                out.push(ChannelDesc {
                    kind: ChannelKind::Axis,
                    idx: axis as u16,
                    name: axis.name().to_string(),
                    logical_min: min,
                    logical_max: max,
                });
            }
            let count = joystick_buttons.map_or(MAX_JOYSTICK_BUTTON, i64::from);
            for n in (1..=count).filter(|n| ![6, 7].contains(n)) {
                out.push(ChannelDesc {
                    kind: ChannelKind::Button,
                    idx: n as u16,
                    name: format!("Button {n}"),
                    logical_min: 0.0,
                    logical_max: 1.0,
                });
            }
        }
    }
    out
}

/// One kernel input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn key(code: u16, pressed: bool) -> Self {
        Self {
            kind: codes::EV_KEY,
            code,
            value: i32::from(pressed),
        }
    }

    pub fn abs(code: u16, value: i32) -> Self {
        Self {
            kind: codes::EV_ABS,
            code,
            value,
        }
    }

    pub fn syn() -> Self {
        Self {
            kind: codes::EV_SYN,
            code: codes::SYN_REPORT,
            value: 0,
        }
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        self.kind == codes::EV_SYN && self.code == codes::SYN_REPORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamepad_description_matches_tables() {
        let desc = describe(Layout::Gamepad, None);
        let axes = desc.iter().filter(|c| c.kind == ChannelKind::Axis).count();
        let buttons: Vec<u16> = desc
            .iter()
            .filter(|c| c.kind == ChannelKind::Button)
            .map(|c| c.idx)
            .collect();
        assert_eq!(axes, 6);
        assert_eq!(buttons.len(), 15);
        assert!(!buttons.contains(&6) && !buttons.contains(&7));
    }

    #[test]
    fn joystick_description_honours_button_count() {
        let desc = describe(Layout::Joystick, Some(8));
        let buttons: Vec<u16> = desc
            .iter()
            .filter(|c| c.kind == ChannelKind::Button)
            .map(|c| c.idx)
            .collect();
        assert_eq!(buttons, vec![1, 2, 3, 4, 5, 8]);
    }
}
