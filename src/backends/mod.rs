//! Device subsystem backends.
//!
//! A backend is the engine's view of the OS device layer. It is always opened
//! *on the worker thread* by a [`BackendFactory`] and never leaves it, which is
//! why [`DeviceBackend`] is not `Send`.
//!
//! Callbacks flow the other way through [`DeviceSink`]: the worker lends the
//! backend `&mut dyn DeviceSink` for the duration of one `enumerate`/`pump` call,
//! so every arrival, removal, report and value callback runs on the worker thread
//! and resolves back to the engine through that borrow. There is no raw context
//! pointer to outlive the engine.
//!
//! # Feature flags
//! - **`hid`** (default): the `hidapi` backend, with an `evdev` value fallback on Linux.
//!
//! [`virtual_dial`] is always available; tests and the `--virtual` demo use it.

use crate::device::{DeviceDescriptor, DeviceFilter, DeviceKey};
use crate::error::EngineError;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod descriptor;
#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;
#[cfg(all(feature = "hid", target_os = "linux"))]
pub mod evdev_axis;
pub mod virtual_dial;

/// Callback surface the backend drives.
pub trait DeviceSink {
    /// A matching device appeared. Return `false` to refuse it; the backend then
    /// releases its handle and never reports it again.
    fn on_arrival(&mut self, device: &DeviceDescriptor) -> bool;

    /// A device went away (unplugged or read failure).
    fn on_removal(&mut self, key: DeviceKey);

    /// Buffer the next raw report of `key` should be written into, or `None` if
    /// the device is not registered for raw reports.
    fn report_buffer(&mut self, key: DeviceKey) -> Option<&mut [u8]>;

    /// `len` bytes of a raw report were written into the buffer of `key`.
    /// `at` is when the report arrived, as close as the backend can tell.
    fn on_report(&mut self, key: DeviceKey, len: usize, at: Instant);

    /// Fallback element-value callback (usage page, usage, signed value).
    fn on_value(&mut self, key: DeviceKey, usage_page: u16, usage: u16, value: i64, at: Instant);
}

/// An open handle to the device subsystem.
pub trait DeviceBackend {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Announce devices that are already connected.
    fn enumerate(&mut self, sink: &mut dyn DeviceSink);

    /// Deliver whatever callbacks are pending. Must not block.
    fn pump(&mut self, sink: &mut dyn DeviceSink);

    /// Release every device handle. The backend is dropped right after.
    fn close_all(&mut self);
}

/// Parameters handed to a [`BackendFactory`].
#[derive(Clone, Copy, Debug)]
pub struct BackendOptions {
    pub filter: DeviceFilter,
    pub rescan_interval: Duration,
}

/// Opens a backend. Called on the worker thread, once per engine start.
pub type BackendFactory =
    Arc<dyn Fn(&BackendOptions) -> Result<Box<dyn DeviceBackend>, EngineError> + Send + Sync>;

/// The platform's real device backend.
#[cfg(feature = "hid")]
pub fn default_backend() -> BackendFactory {
    Arc::new(|options: &BackendOptions| {
        let backend = hid::HidBackend::open(options)?;
        Ok(Box::new(backend) as Box<dyn DeviceBackend>)
    })
}
