//! Linux injector: a uinput virtual wheel.
//!
//! Each post emits `REL_WHEEL` (detents) and `REL_WHEEL_HI_RES` (1/120 detent
//! units) in one batch, so both legacy and high-resolution consumers see the
//! same motion. Needs write access to `/dev/uinput`.

use super::{ScrollInjector, SYNTHETIC_DEVICE_NAME};
use crate::error::InjectError;
use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AttributeSet, BusType, EventType, InputEvent, InputId, RelativeAxisType};
use tracing::debug;

/// High-resolution units per detent.
const HI_RES_PER_LINE: i32 = 120;

pub struct UinputInjector {
    device: VirtualDevice,
}

impl UinputInjector {
    pub fn new() -> Result<Self, InjectError> {
        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_WHEEL_HI_RES);

        let device = VirtualDeviceBuilder::new()
            .map_err(|e| InjectError::Unavailable(format!("cannot open /dev/uinput: {e}")))?
            .name(SYNTHETIC_DEVICE_NAME)
            .input_id(InputId::new(BusType::BUS_VIRTUAL, 0, 0, 1))
            .with_relative_axes(&axes)?
            .build()?;

        debug!("created uinput device `{SYNTHETIC_DEVICE_NAME}`");
        Ok(Self { device })
    }
}

impl ScrollInjector for UinputInjector {
    fn post_vertical_scroll(&mut self, lines: i32) -> Result<(), InjectError> {
        let events = [
            InputEvent::new(EventType::RELATIVE, RelativeAxisType::REL_WHEEL.0, lines),
            InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_WHEEL_HI_RES.0,
                lines.saturating_mul(HI_RES_PER_LINE),
            ),
        ];
        // `emit` terminates the batch with SYN_REPORT.
        self.device.emit(&events)?;
        Ok(())
    }
}
