//! Minimal HID report-descriptor walk.
//!
//! Only answers one question: how long is the largest input report? hidapi does
//! not expose `MaxInputReportSize`, so the length is summed from the descriptor's
//! Input items (Report Size x Report Count per Report ID, plus the ID prefix
//! byte when the device uses numbered reports).

use std::collections::BTreeMap;

const LONG_ITEM: u8 = 0xfe;

// Item prefixes with the size bits masked off.
const MAIN_INPUT: u8 = 0x80;
const GLOBAL_REPORT_SIZE: u8 = 0x74;
const GLOBAL_REPORT_ID: u8 = 0x84;
const GLOBAL_REPORT_COUNT: u8 = 0x94;
const GLOBAL_PUSH: u8 = 0xa4;
const GLOBAL_POP: u8 = 0xb4;

#[derive(Clone, Copy, Default)]
struct Globals {
    report_size: usize,
    report_count: usize,
    report_id: u8,
}

/// Largest input report in bytes, including the report ID byte if IDs are used.
///
/// `None` for truncated descriptors or descriptors without Input items.
pub fn max_input_report_len(descriptor: &[u8]) -> Option<usize> {
    let mut input_bits: BTreeMap<u8, usize> = BTreeMap::new();
    let mut globals = Globals::default();
    let mut stack: Vec<Globals> = Vec::new();
    let mut uses_report_ids = false;

    let mut i = 0;
    while let Some(&prefix) = descriptor.get(i) {
        if prefix == LONG_ITEM {
            let data_len = usize::from(*descriptor.get(i + 1)?);
            i += 3 + data_len;
            continue;
        }

        let data_len = match prefix & 0x03 {
            3 => 4,
            n => usize::from(n),
        };
        let data = descriptor.get(i + 1..i + 1 + data_len)?;
        let value = data
            .iter()
            .rev()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)) as usize;

        match prefix & 0xfc {
            MAIN_INPUT => {
                *input_bits.entry(globals.report_id).or_default() +=
                    globals.report_size.saturating_mul(globals.report_count);
            }
            GLOBAL_REPORT_SIZE => globals.report_size = value,
            GLOBAL_REPORT_COUNT => globals.report_count = value,
            GLOBAL_REPORT_ID => {
                globals.report_id = value as u8;
                uses_report_ids = true;
            }
            GLOBAL_PUSH => stack.push(globals),
            GLOBAL_POP => {
                if let Some(saved) = stack.pop() {
                    globals = saved;
                }
            }
            _ => {}
        }
        i += 1 + data_len;
    }

    let payload = input_bits.values().map(|bits| bits.div_ceil(8)).max()?;
    Some(payload + usize::from(uses_report_ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Button bit + padding, relative Rx byte, four vendor bytes.
    const DIAL: &[u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x37, // Usage (Dial)
        0xa1, 0x01, // Collection (Application)
        0x05, 0x09, //   Usage Page (Button)
        0x09, 0x01, //   Usage (1)
        0x15, 0x00, 0x25, 0x01, // Logical 0..1
        0x75, 0x01, 0x95, 0x01, 0x81, 0x02, // 1 bit, Input
        0x75, 0x07, 0x81, 0x01, // 7 bits padding, Input (const)
        0x05, 0x01, 0x09, 0x33, // Generic Desktop / Rx
        0x15, 0x81, 0x25, 0x7f, // Logical -127..127
        0x75, 0x08, 0x95, 0x01, 0x81, 0x06, // 8 bits, Input (relative)
        0x06, 0x00, 0xff, 0x09, 0x01, // Vendor page
        0x95, 0x04, 0x81, 0x02, // 4 bytes, Input
        0x95, 0x06, 0x91, 0x02, // 6 bytes, Output (ignored)
        0xc0, // End Collection
    ];

    #[test]
    fn dial_descriptor_is_six_bytes() {
        assert_eq!(max_input_report_len(DIAL), Some(6));
    }

    #[test]
    fn numbered_reports_add_id_byte() {
        let desc = [
            0x85, 0x01, 0x75, 0x08, 0x95, 0x02, 0x81, 0x02, // id 1: 2 bytes
            0x85, 0x02, 0x95, 0x04, 0x81, 0x02, // id 2: 4 bytes
        ];
        assert_eq!(max_input_report_len(&desc), Some(5));
    }

    #[test]
    fn push_pop_restores_globals() {
        let desc = [
            0x75, 0x08, 0x95, 0x02, // 2 bytes
            0xa4, // Push
            0x95, 0x10, 0x91, 0x02, // 16-byte Output
            0xb4, // Pop
            0x81, 0x02, // Input uses restored count
        ];
        assert_eq!(max_input_report_len(&desc), Some(2));
    }

    #[test]
    fn truncated_or_empty() {
        assert_eq!(max_input_report_len(&[0x75]), None);
        assert_eq!(max_input_report_len(&[0x05, 0x01, 0xc0]), None);
        assert_eq!(max_input_report_len(&[]), None);
    }

    #[test]
    fn long_items_are_skipped() {
        let desc = [0xfe, 0x02, 0x10, 0xaa, 0xbb, 0x75, 0x08, 0x95, 0x03, 0x81, 0x02];
        assert_eq!(max_input_report_len(&desc), Some(3));
    }
}
