//! evdev value fallback (Linux).
//!
//! When the kernel's `powermate` driver owns a dial, hidraw reads may be denied
//! while the event node stays readable. The driver reports rotation as a
//! relative `REL_DIAL` axis; some firmware revisions surface `REL_RX` instead.
//! Both are forwarded as Generic Desktop `Rx` values through
//! [`DeviceSink::on_value`].
//!
//! Values carry the kernel's event timestamp, so a backlog drained in one pump
//! keeps its real spacing.
//!
//! A node is only attached while no raw-report dial with the same vendor and
//! product is open, so one physical turn never reaches the scaler twice.

use super::DeviceSink;
use crate::device::{
    DeviceDescriptor, DeviceFilter, DeviceKey, MIN_REPORT_LEN, USAGE_PAGE_GENERIC_DESKTOP,
    USAGE_RX,
};
use crate::metadata::DeviceMeta;
use evdev::{Device, InputEventKind, RelativeAxisType};
use std::collections::HashSet;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

struct AxisNode {
    key: DeviceKey,
    ids: (u16, u16),
    path: PathBuf,
    device: Device,
}

#[derive(Default)]
pub struct EvdevAxis {
    nodes: Vec<AxisNode>,
    refused: HashSet<PathBuf>,
}

fn carries_rotation(device: &Device) -> bool {
    device.supported_relative_axes().map_or(false, |axes| {
        axes.contains(RelativeAxisType::REL_DIAL) || axes.contains(RelativeAxisType::REL_RX)
    })
}

/// Map a wall-clock event time onto the monotonic clock. Times from the
/// future (clock steps) collapse to `now`.
fn event_instant(event_time: SystemTime, now: Instant, wall_now: SystemTime) -> Instant {
    wall_now
        .duration_since(event_time)
        .ok()
        .and_then(|age| now.checked_sub(age))
        .unwrap_or(now)
}

fn set_nonblocking(device: &Device) -> io::Result<()> {
    let fd = device.as_raw_fd();
    // SAFETY: `fd` is owned by `device` and stays open for both calls.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl EvdevAxis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile attached nodes with the bus. `raw_ids` are the vendor/product
    /// pairs currently served by raw-report dials.
    pub fn scan(
        &mut self,
        filter: &DeviceFilter,
        raw_ids: &HashSet<(u16, u16)>,
        sink: &mut dyn DeviceSink,
    ) {
        let mut present: Vec<(PathBuf, Device)> = evdev::enumerate()
            .filter(|(_, device)| {
                let id = device.input_id();
                filter.matches(id.vendor(), id.product())
            })
            .collect();
        let paths: HashSet<PathBuf> = present.iter().map(|(p, _)| p.clone()).collect();

        let mut kept = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            if !paths.contains(&node.path) {
                info!(key = %node.key, "dial disconnected");
                sink.on_removal(node.key);
            } else if raw_ids.contains(&node.ids) {
                debug!(key = %node.key, "raw reports available, dropping evdev node");
                sink.on_removal(node.key);
            } else {
                kept.push(node);
            }
        }
        self.nodes = kept;
        self.refused.retain(|p| paths.contains(p));

        for (path, device) in present.drain(..) {
            let id = device.input_id();
            let ids = (id.vendor(), id.product());
            if raw_ids.contains(&ids)
                || self.refused.contains(&path)
                || self.nodes.iter().any(|n| n.path == path)
            {
                continue;
            }
            if !carries_rotation(&device) {
                self.refused.insert(path);
                continue;
            }
            if let Err(e) = set_nonblocking(&device) {
                warn!(path = %path.display(), "cannot make evdev node non-blocking: {e}");
                self.refused.insert(path);
                continue;
            }

            let descriptor = DeviceDescriptor {
                key: DeviceKey::next(),
                meta: DeviceMeta {
                    bus: Some("evdev".into()),
                    vid: Some(ids.0),
                    pid: Some(ids.1),
                    product_string: device.name().map(str::to_string),
                    serial_number: device.unique_name().map(str::to_string),
                    usage_page: None,
                    usage: None,
                    path: Some(path.display().to_string()),
                },
                // No raw reports here; the node is known to carry the axis.
                max_input_report_len: MIN_REPORT_LEN,
                raw_reports: false,
            };
            if sink.on_arrival(&descriptor) {
                info!("dial connected (evdev): {descriptor}");
                self.nodes.push(AxisNode {
                    key: descriptor.key,
                    ids,
                    path,
                    device,
                });
            } else {
                self.refused.insert(path);
            }
        }
    }

    pub fn pump(&mut self, sink: &mut dyn DeviceSink) {
        let mut lost = Vec::new();
        let (now, wall_now) = (Instant::now(), SystemTime::now());
        for (index, node) in self.nodes.iter_mut().enumerate() {
            let values: Vec<(i32, Instant)> = match node.device.fetch_events() {
                Ok(events) => events
                    .filter_map(|ev| match ev.kind() {
                        InputEventKind::RelAxis(RelativeAxisType::REL_DIAL)
                        | InputEventKind::RelAxis(RelativeAxisType::REL_RX) => {
                            Some((ev.value(), event_instant(ev.timestamp(), now, wall_now)))
                        }
                        _ => None,
                    })
                    .collect(),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => {
                    debug!(key = %node.key, "evdev read failed: {e}");
                    lost.push(index);
                    continue;
                }
            };
            for (value, at) in values {
                sink.on_value(
                    node.key,
                    USAGE_PAGE_GENERIC_DESKTOP,
                    USAGE_RX,
                    i64::from(value),
                    at,
                );
            }
        }
        for index in lost.into_iter().rev() {
            let node = self.nodes.remove(index);
            info!(key = %node.key, "dial lost");
            sink.on_removal(node.key);
        }
    }

    pub fn close_all(&mut self) {
        self.nodes.clear();
        self.refused.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn event_times_keep_their_spacing() {
        let now = Instant::now();
        let wall = SystemTime::now();
        let early = event_instant(wall - Duration::from_millis(900), now, wall);
        let late = event_instant(wall - Duration::from_millis(100), now, wall);
        assert_eq!(late - early, Duration::from_millis(800));
        assert_eq!(now - late, Duration::from_millis(100));
    }

    #[test]
    fn future_event_times_collapse_to_now() {
        let now = Instant::now();
        let wall = SystemTime::now();
        assert_eq!(event_instant(wall + Duration::from_secs(5), now, wall), now);
    }
}
