//! Identity presented by virtual devices.
//!
//! [`DeviceIdentity`] is what the OS sees when a virtual device appears: the
//! product string plus USB vendor/product ids. Backends that cannot choose
//! their identity (vJoy slots) ignore it; ViGEm targets use only the USB ids.
//!
//! # Conventions
//! - The defaults impersonate a wired Xbox 360 controller (`045e:028e`), which
//!   is what most games and SDL mappings recognise without extra setup.
//! - `serial` is only forwarded to backends that expose it (the HID helper).

use serde::{Deserialize, Serialize};

/// USB identity of a virtual device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    /// Product string shown by `evtest`, game controller panels, etc.
    pub name: String,

    /// USB Vendor ID.
    pub vendor_id: u16,

    /// USB Product ID.
    pub product_id: u16,

    /// Device version (`bcdDevice` style).
    pub version: u16,

    /// Serial number, when the backend supports one.
    pub serial: Option<String>,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            name: "Virtual Xbox 360 Controller".to_string(),
            vendor_id: 0x045e,
            product_id: 0x028e,
            version: 1,
            serial: None,
        }
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x})",
            self.name, self.vendor_id, self.product_id
        )
    }
}
