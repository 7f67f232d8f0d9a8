//! Device metadata snapshot.
//!
//! [`DeviceMeta`] is a cloneable description of a dial suitable for logging and
//! for the `--list-devices` diagnostic output. Backends populate what they know;
//! unknown fields remain `None`.
//!
//! # Conventions
//! - `bus` is a short hint: `"usb"` for hidraw/hidapi devices, `"evdev"` for the
//!   fallback input-node path, `"virtual"` for scripted devices.
//! - `path` is an OS path (opaque string) useful for diagnostics only. It is not
//!   an identity; use [`DeviceKey`](crate::device::DeviceKey) inside the process.

use serde::{Deserialize, Serialize};

/// Snapshot of metadata describing a single device.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMeta {
    /// Bus classification (`"usb"`, `"evdev"`, `"virtual"`).
    pub bus: Option<String>,

    /// USB Vendor ID (VID), if known.
    pub vid: Option<u16>,

    /// USB Product ID (PID), if known.
    pub pid: Option<u16>,

    /// Human-readable product name from the firmware/OS.
    pub product_string: Option<String>,

    /// Serial number, if the firmware exposes one.
    pub serial_number: Option<String>,

    /// HID Usage Page of the top-level collection, if known.
    pub usage_page: Option<u16>,

    /// HID Usage of the top-level collection, if known.
    pub usage: Option<u16>,

    /// OS path to the device node.
    pub path: Option<String>,
}
