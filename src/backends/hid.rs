//! `hidapi` backend.
//!
//! Opens every HID interface that passes the [`DeviceFilter`] and reads raw input
//! reports from it in non-blocking mode. hidapi has no hotplug callback, so
//! arrivals and removals are found by re-listing the bus every
//! `rescan_interval` and diffing against the open set by OS path.
//!
//! On Linux a device that hidraw cannot give us (no permission, interface
//! claimed by a kernel driver) may still be visible as an evdev node; those are
//! picked up by [`EvdevAxis`](super::evdev_axis::EvdevAxis) on the value path.
//!
//! hidraw keeps no arrival time, so each report is stamped when it is read.
//! Reports that queued up behind a late pump are read back to back and look
//! like one fast turn; keep `poll_interval_ms` small to avoid that.

use super::descriptor::max_input_report_len;
use super::{BackendOptions, DeviceBackend, DeviceSink};
use crate::device::{DeviceDescriptor, DeviceFilter, DeviceKey};
use crate::error::EngineError;
use crate::metadata::DeviceMeta;
use hidapi::{DeviceInfo, HidApi, HidDevice};
use std::collections::{HashMap, HashSet};
use std::ffi::CString;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(target_os = "linux")]
use super::evdev_axis::EvdevAxis;

/// Used when the report descriptor is unavailable or unparseable.
const FALLBACK_REPORT_LEN: usize = 64;
/// HID caps report descriptors at 4 KiB.
const MAX_DESCRIPTOR_LEN: usize = 4096;
/// Upper bound on reports drained from one device per pump.
const MAX_REPORTS_PER_PUMP: usize = 32;

struct OpenDial {
    key: DeviceKey,
    ids: (u16, u16),
    device: HidDevice,
}

pub struct HidBackend {
    api: HidApi,
    filter: DeviceFilter,
    rescan_interval: Duration,
    last_scan: Option<Instant>,
    open: HashMap<CString, OpenDial>,
    /// Paths that failed to open or were refused; retried once they disappear.
    ignored: HashSet<CString>,
    #[cfg(target_os = "linux")]
    fallback: EvdevAxis,
}

impl HidBackend {
    pub fn open(options: &BackendOptions) -> Result<Self, EngineError> {
        let api = HidApi::new()?;
        debug!("hidapi initialised");
        Ok(Self {
            api,
            filter: options.filter,
            rescan_interval: options.rescan_interval,
            last_scan: None,
            open: HashMap::new(),
            ignored: HashSet::new(),
            #[cfg(target_os = "linux")]
            fallback: EvdevAxis::new(),
        })
    }

    fn scan(&mut self, sink: &mut dyn DeviceSink) {
        self.last_scan = Some(Instant::now());
        if let Err(e) = self.api.refresh_devices() {
            warn!("HID rescan failed: {e}");
            return;
        }

        let mut present: Vec<DeviceInfo> = Vec::new();
        let mut seen = HashSet::new();
        for info in self.api.device_list() {
            if self.filter.matches(info.vendor_id(), info.product_id())
                && seen.insert(info.path().to_owned())
            {
                present.push(info.clone());
            }
        }

        let gone: Vec<CString> = self
            .open
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        for path in gone {
            if let Some(dial) = self.open.remove(&path) {
                info!(key = %dial.key, "dial disconnected");
                sink.on_removal(dial.key);
            }
        }
        self.ignored.retain(|path| seen.contains(path));

        for info in &present {
            let path = info.path();
            if self.open.contains_key(path) || self.ignored.contains(path) {
                continue;
            }
            self.attach(info, sink);
        }

        #[cfg(target_os = "linux")]
        {
            let raw_ids: HashSet<(u16, u16)> = self.open.values().map(|d| d.ids).collect();
            self.fallback.scan(&self.filter, &raw_ids, sink);
        }
    }

    fn attach(&mut self, info: &DeviceInfo, sink: &mut dyn DeviceSink) {
        let path = info.path().to_owned();
        let device = match info.open_device(&self.api) {
            Ok(device) => device,
            Err(e) => {
                warn!(path = %info.path().to_string_lossy(), "cannot open HID device: {e}");
                self.ignored.insert(path);
                return;
            }
        };
        if let Err(e) = device.set_blocking_mode(false) {
            warn!(path = %info.path().to_string_lossy(), "cannot make HID device non-blocking: {e}");
            self.ignored.insert(path);
            return;
        }

        let descriptor = DeviceDescriptor {
            key: DeviceKey::next(),
            meta: meta(info),
            max_input_report_len: input_report_len(&device),
            raw_reports: true,
        };
        if sink.on_arrival(&descriptor) {
            info!("dial connected: {descriptor}");
            self.open.insert(
                path,
                OpenDial {
                    key: descriptor.key,
                    ids: (info.vendor_id(), info.product_id()),
                    device,
                },
            );
        } else {
            debug!("dial refused: {descriptor}");
            self.ignored.insert(path);
        }
    }
}

impl DeviceBackend for HidBackend {
    fn name(&self) -> &str {
        "hidapi"
    }

    fn enumerate(&mut self, sink: &mut dyn DeviceSink) {
        self.scan(sink);
    }

    fn pump(&mut self, sink: &mut dyn DeviceSink) {
        let due = self
            .last_scan
            .map_or(true, |at| at.elapsed() >= self.rescan_interval);
        if due {
            self.scan(sink);
        }

        let mut failed = Vec::new();
        for (path, dial) in &self.open {
            for _ in 0..MAX_REPORTS_PER_PUMP {
                let Some(buf) = sink.report_buffer(dial.key) else {
                    break;
                };
                match dial.device.read(buf) {
                    Ok(0) => break,
                    Ok(n) => sink.on_report(dial.key, n, Instant::now()),
                    Err(e) => {
                        debug!(key = %dial.key, "read failed: {e}");
                        failed.push(path.clone());
                        break;
                    }
                }
            }
        }
        for path in failed {
            if let Some(dial) = self.open.remove(&path) {
                info!(key = %dial.key, "dial lost");
                sink.on_removal(dial.key);
            }
        }

        #[cfg(target_os = "linux")]
        self.fallback.pump(sink);
    }

    fn close_all(&mut self) {
        let released = self.open.len();
        self.open.clear();
        self.ignored.clear();
        #[cfg(target_os = "linux")]
        self.fallback.close_all();
        debug!(released, "HID handles released");
    }
}

fn input_report_len(device: &HidDevice) -> usize {
    let mut buf = [0u8; MAX_DESCRIPTOR_LEN];
    match device.get_report_descriptor(&mut buf) {
        Ok(n) => max_input_report_len(&buf[..n.min(buf.len())]).unwrap_or(FALLBACK_REPORT_LEN),
        Err(e) => {
            debug!("no report descriptor ({e}), assuming {FALLBACK_REPORT_LEN} bytes");
            FALLBACK_REPORT_LEN
        }
    }
}

/// Build a [`DeviceMeta`] snapshot for a `hidapi` device entry.
fn meta(info: &DeviceInfo) -> DeviceMeta {
    DeviceMeta {
        bus: Some("usb".into()),
        vid: Some(info.vendor_id()),
        pid: Some(info.product_id()),
        product_string: info.product_string().map(|s| s.to_string()),
        serial_number: info.serial_number().map(|s| s.to_string()),
        usage_page: Some(info.usage_page()),
        usage: Some(info.usage()),
        path: Some(info.path().to_string_lossy().to_string()),
    }
}

/// Every HID interface on the bus, or only those matching `filter`.
pub fn list_devices(filter: Option<&DeviceFilter>) -> Result<Vec<DeviceMeta>, EngineError> {
    let api = HidApi::new()?;
    Ok(api
        .device_list()
        .filter(|info| filter.map_or(true, |f| f.matches(info.vendor_id(), info.product_id())))
        .map(meta)
        .collect())
}
