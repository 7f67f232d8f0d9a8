//! Windows injector: `SendInput` with `MOUSEEVENTF_WHEEL`.
//!
//! Every event is tagged with [`SYNTHETIC_EXTRA_INFO`] in `dwExtraInfo`, which
//! low-level hooks can use to tell these events apart from a real wheel.

use super::ScrollInjector;
use crate::error::InjectError;
use windows_sys::Win32::UI::Input::KeyboardAndMouse::{
    SendInput, INPUT, INPUT_0, INPUT_MOUSE, MOUSEEVENTF_WHEEL, MOUSEINPUT,
};

/// One wheel detent.
const WHEEL_DELTA: i32 = 120;

/// `dwExtraInfo` marker ("DIAL").
pub const SYNTHETIC_EXTRA_INFO: usize = 0x4449_414c;

#[derive(Debug, Default)]
pub struct SendInputInjector;

impl SendInputInjector {
    pub fn new() -> Self {
        SendInputInjector
    }
}

impl ScrollInjector for SendInputInjector {
    fn post_vertical_scroll(&mut self, lines: i32) -> Result<(), InjectError> {
        let input = INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: lines.saturating_mul(WHEEL_DELTA) as _,
                    dwFlags: MOUSEEVENTF_WHEEL,
                    time: 0,
                    dwExtraInfo: SYNTHETIC_EXTRA_INFO,
                },
            },
        };
        // SAFETY: one fully initialised INPUT, size passed matches the struct.
        let sent = unsafe { SendInput(1, &input, std::mem::size_of::<INPUT>() as i32) };
        if sent == 1 {
            Ok(())
        } else {
            Err(InjectError::Rejected(
                std::io::Error::last_os_error().to_string(),
            ))
        }
    }
}
