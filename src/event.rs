//! Rotation events and report decoding.
//!
//! Both input paths (raw reports and the Generic Desktop `Rx` value callback)
//! end up as a [`RotationTick`]: a signed delta plus the time since the previous
//! tick of the same device, ready for [`scale`](crate::scaler::scale).

use crate::device::{DeviceKey, MIN_REPORT_LEN};

/// Which callback produced a tick. A device only ever uses one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputPath {
    /// Vendor report, rotation in byte 1.
    RawReport,
    /// Generic Desktop / Rx element value.
    AxisValue,
}

/// One rotation event, after session bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RotationTick {
    pub key: DeviceKey,
    pub delta: i32,
    /// Seconds since this device's previous rotation event (0 for the first one).
    pub elapsed_secs: f64,
    pub path: InputPath,
}

/// Extract the signed rotation delta from a raw report.
///
/// Byte 1 is a two's-complement `i8`. Reports shorter than
/// [`MIN_REPORT_LEN`] carry no rotation and yield `None`.
#[inline]
pub fn decode_rotation(report: &[u8]) -> Option<i32> {
    if report.len() < MIN_REPORT_LEN {
        return None;
    }
    report.get(1).map(|&b| i32::from(b as i8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_byte_is_signed() {
        assert_eq!(decode_rotation(&[0x00, 0x05]), Some(5));
        assert_eq!(decode_rotation(&[0x01, 0xff, 0x00, 0x00, 0x00, 0x00]), Some(-1));
        assert_eq!(decode_rotation(&[0x00, 0x80]), Some(-128));
        assert_eq!(decode_rotation(&[0x00, 0x7f]), Some(127));
    }

    #[test]
    fn short_reports_are_dropped() {
        assert_eq!(decode_rotation(&[]), None);
        assert_eq!(decode_rotation(&[0x03]), None);
    }
}
