//! Device identity and the supported device family.
//!
//! The engine only speaks one vendor's report format: Griffin PowerMate style
//! dials, where every input report is `[buttons, delta, ...]` and `delta` is a
//! signed 8-bit rotation count. Two product variants are known.
//!
//! ## Identity
//! [`DeviceKey`] is an in-process handle only. Keys are handed out by backends
//! from a process-wide counter when a device arrives, are never reused, and are
//! deliberately not serializable: a key means nothing after the process exits.

use crate::metadata::DeviceMeta;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Griffin Technology.
pub const POWERMATE_VENDOR_ID: u16 = 0x077d;
/// PowerMate, current USB revision.
pub const POWERMATE_PRODUCT_NEW: u16 = 0x0410;
/// PowerMate, original revision (also sold as SoundKnob).
pub const POWERMATE_PRODUCT_OLD: u16 = 0x04aa;

/// Shortest report that still carries the rotation axis.
pub const MIN_REPORT_LEN: usize = 2;

/// HID usage page "Generic Desktop".
pub const USAGE_PAGE_GENERIC_DESKTOP: u16 = 0x01;
/// HID usage "Rx" on the Generic Desktop page.
pub const USAGE_RX: u16 = 0x33;

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Opaque, in-process identity of one connected device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey(u64);

impl DeviceKey {
    /// Allocate a fresh key. Never returns the same key twice.
    pub(crate) fn next() -> Self {
        DeviceKey(NEXT_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

/// Vendor/product filter applied when opening the device subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: u16,
    pub product_ids: [u16; 2],
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            vendor_id: POWERMATE_VENDOR_ID,
            product_ids: [POWERMATE_PRODUCT_NEW, POWERMATE_PRODUCT_OLD],
        }
    }
}

impl DeviceFilter {
    #[inline]
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        vendor_id == self.vendor_id && self.product_ids.contains(&product_id)
    }
}

/// What a backend knows about a device at arrival time.
#[derive(Clone, Debug)]
pub struct DeviceDescriptor {
    pub key: DeviceKey,
    pub meta: DeviceMeta,
    /// Largest input report the device can emit, in bytes.
    pub max_input_report_len: usize,
    /// `false` when the backend could not register for raw reports and will
    /// deliver rotation through the value callback instead.
    pub raw_reports: bool,
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.meta.product_string.as_deref().unwrap_or("Unknown");
        write!(
            f,
            "{name} [{:04x}:{:04x}] {}",
            self.meta.vid.unwrap_or_default(),
            self.meta.pid.unwrap_or_default(),
            self.key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique() {
        let a = DeviceKey::next();
        let b = DeviceKey::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn default_filter_matches_both_variants_only() {
        let filter = DeviceFilter::default();
        assert!(filter.matches(0x077d, 0x0410));
        assert!(filter.matches(0x077d, 0x04aa));
        assert!(!filter.matches(0x077d, 0x0411));
        assert!(!filter.matches(0x045e, 0x0410));
    }

    #[test]
    fn descriptor_display_uses_product_and_ids() {
        let desc = DeviceDescriptor {
            key: DeviceKey(7),
            meta: DeviceMeta {
                vid: Some(0x077d),
                pid: Some(0x0410),
                product_string: Some("Griffin PowerMate".into()),
                ..DeviceMeta::default()
            },
            max_input_report_len: 6,
            raw_reports: true,
        };
        assert_eq!(desc.to_string(), "Griffin PowerMate [077d:0410] dev#7");
    }
}
