//! Per-device sessions and the registry that owns them.
//!
//! The registry lives on the worker thread and is never shared, so nothing here
//! takes a lock. Each session exclusively owns its [`ReportBuffer`]; the buffer
//! moves into the registry on arrival and is dropped exactly once when the
//! session is removed or the registry is drained.

use crate::device::{DeviceDescriptor, DeviceKey, MIN_REPORT_LEN, USAGE_PAGE_GENERIC_DESKTOP, USAGE_RX};
use crate::event::{decode_rotation, InputPath, RotationTick};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Report-sized scratch storage. Deliberately not `Clone`.
#[derive(Debug)]
pub struct ReportBuffer {
    bytes: Box<[u8]>,
}

impl ReportBuffer {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// First `len` bytes (clamped to the buffer size).
    #[inline]
    pub fn filled(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(self.bytes.len())]
    }
}

/// Registration state of one physical dial.
#[derive(Debug)]
pub struct DeviceSession {
    key: DeviceKey,
    name: String,
    path: InputPath,
    /// `None` on the value path, which needs no scratch storage.
    buffer: Option<ReportBuffer>,
    last_event: Option<Instant>,
}

impl DeviceSession {
    #[inline]
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    #[inline]
    pub fn path(&self) -> InputPath {
        self.path
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buffer_len(&self) -> Option<usize> {
        self.buffer.as_ref().map(ReportBuffer::len)
    }

    #[inline]
    pub fn last_event(&self) -> Option<Instant> {
        self.last_event
    }

    /// Stamp a rotation event and return seconds since the previous one.
    ///
    /// The first event of a session measures against itself, so the scaler's
    /// elapsed-time floor applies.
    fn record(&mut self, now: Instant) -> f64 {
        let last = self.last_event.unwrap_or(now);
        self.last_event = Some(now);
        now.saturating_duration_since(last).as_secs_f64()
    }

    fn tick(&mut self, delta: i32, now: Instant) -> Option<RotationTick> {
        if delta == 0 {
            // Button-only report; not a rotation event.
            return None;
        }
        let elapsed_secs = self.record(now);
        Some(RotationTick {
            key: self.key,
            delta,
            elapsed_secs,
            path: self.path,
        })
    }
}

/// Result of an arrival callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arrival {
    Registered(InputPath),
    /// Key already registered; nothing changed.
    Duplicate,
    /// Reports too short to carry a rotation axis.
    Rejected { report_len: usize },
}

/// Device key → session map, owned by the worker context.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<DeviceKey, DeviceSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly connected device.
    ///
    /// Devices whose maximum input report is shorter than two bytes are ignored
    /// whatever path they would use.
    pub fn on_arrival(&mut self, device: &DeviceDescriptor) -> Arrival {
        if self.sessions.contains_key(&device.key) {
            return Arrival::Duplicate;
        }
        if device.max_input_report_len < MIN_REPORT_LEN {
            debug!(
                "ignoring {device}: input report of {} byte(s) cannot carry rotation",
                device.max_input_report_len
            );
            return Arrival::Rejected {
                report_len: device.max_input_report_len,
            };
        }

        let (path, buffer) = if device.raw_reports {
            (
                InputPath::RawReport,
                Some(ReportBuffer::zeroed(device.max_input_report_len)),
            )
        } else {
            (InputPath::AxisValue, None)
        };

        debug!("registered {device} via {path:?}");
        self.sessions.insert(
            device.key,
            DeviceSession {
                key: device.key,
                name: device.to_string(),
                path,
                buffer,
                last_event: None,
            },
        );
        Arrival::Registered(path)
    }

    /// Unregister a device. Unknown keys are a no-op and return `None`.
    pub fn on_removal(&mut self, key: DeviceKey) -> Option<DeviceSession> {
        let session = self.sessions.remove(&key)?;
        debug!("unregistered {}", session.name);
        Some(session)
    }

    /// Scratch buffer the backend should read the next report of `key` into.
    pub fn report_buffer(&mut self, key: DeviceKey) -> Option<&mut [u8]> {
        self.sessions
            .get_mut(&key)?
            .buffer
            .as_mut()
            .map(ReportBuffer::as_mut_slice)
    }

    /// The backend wrote `len` bytes into the buffer of `key`.
    pub fn on_buffered_report(&mut self, key: DeviceKey, len: usize, now: Instant) -> Option<RotationTick> {
        let session = self.sessions.get_mut(&key)?;
        let delta = decode_rotation(session.buffer.as_ref()?.filled(len))?;
        trace!(%key, delta, "raw report");
        session.tick(delta, now)
    }

    /// A raw report delivered as a slice rather than through the session buffer.
    ///
    /// Short reports and unknown keys are dropped.
    pub fn on_report(&mut self, key: DeviceKey, report: &[u8], now: Instant) -> Option<RotationTick> {
        let session = self.sessions.get_mut(&key)?;
        if session.path != InputPath::RawReport {
            return None;
        }
        let delta = decode_rotation(report)?;
        session.tick(delta, now)
    }

    /// Fallback element-value callback. Only Generic Desktop `Rx` on sessions that
    /// registered for the value path is accepted, so a device never feeds the
    /// scaler through both paths.
    pub fn on_value(
        &mut self,
        key: DeviceKey,
        usage_page: u16,
        usage: u16,
        value: i64,
        now: Instant,
    ) -> Option<RotationTick> {
        if usage_page != USAGE_PAGE_GENERIC_DESKTOP || usage != USAGE_RX {
            return None;
        }
        let session = self.sessions.get_mut(&key)?;
        if session.path != InputPath::AxisValue {
            return None;
        }
        let delta = value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        trace!(%key, delta, "axis value");
        session.tick(delta, now)
    }

    /// Remove every session, handing them back for release.
    pub fn drain(&mut self) -> Vec<DeviceSession> {
        self.sessions.drain().map(|(_, s)| s).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[inline]
    pub fn contains(&self, key: DeviceKey) -> bool {
        self.sessions.contains_key(&key)
    }

    pub fn get(&self, key: DeviceKey) -> Option<&DeviceSession> {
        self.sessions.get(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = DeviceKey> + '_ {
        self.sessions.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScrollConfig;
    use crate::metadata::DeviceMeta;
    use crate::scaler::scale;
    use std::time::Duration;

    fn dial(report_len: usize, raw_reports: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            key: DeviceKey::next(),
            meta: DeviceMeta::default(),
            max_input_report_len: report_len,
            raw_reports,
        }
    }

    #[test]
    fn one_byte_reports_are_rejected() {
        let mut reg = SessionRegistry::new();
        let d = dial(1, true);
        assert_eq!(reg.on_arrival(&d), Arrival::Rejected { report_len: 1 });
        assert!(reg.is_empty());
    }

    #[test]
    fn two_byte_reports_register() {
        let mut reg = SessionRegistry::new();
        let d = dial(2, true);
        assert_eq!(reg.on_arrival(&d), Arrival::Registered(InputPath::RawReport));
        assert_eq!(reg.get(d.key).and_then(DeviceSession::buffer_len), Some(2));
        assert_eq!(reg.report_buffer(d.key).map(|b| b.to_vec()), Some(vec![0, 0]));
    }

    #[test]
    fn duplicate_arrival_is_noop() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        assert_eq!(reg.on_arrival(&d), Arrival::Duplicate);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn arrival_then_removal_leaves_nothing() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        let session = reg.on_removal(d.key).expect("session");
        assert_eq!(session.buffer_len(), Some(6));
        drop(session);
        assert!(reg.is_empty());
        assert!(reg.report_buffer(d.key).is_none());
        assert!(reg.on_removal(d.key).is_none());
    }

    #[test]
    fn report_for_unknown_key_is_dropped() {
        let mut reg = SessionRegistry::new();
        assert!(reg.on_report(DeviceKey::next(), &[0, 5], Instant::now()).is_none());
        assert!(reg.on_buffered_report(DeviceKey::next(), 2, Instant::now()).is_none());
    }

    #[test]
    fn first_report_has_zero_elapsed() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        let tick = reg.on_report(d.key, &[0, 5, 0, 0, 0, 0], Instant::now()).expect("tick");
        assert_eq!(tick.delta, 5);
        assert_eq!(tick.elapsed_secs, 0.0);
    }

    #[test]
    fn elapsed_tracks_previous_event() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        let t0 = Instant::now();
        reg.on_report(d.key, &[0, 1], t0);
        let tick = reg
            .on_report(d.key, &[0, 5], t0 + Duration::from_millis(50))
            .expect("tick");
        assert!((tick.elapsed_secs - 0.05).abs() < 1e-9);
        // Matches the documented scenario once scaled.
        let cfg = ScrollConfig::new(1.6, 0.55, 24.0, 2.0, false);
        assert_eq!(scale(tick.delta, tick.elapsed_secs, &cfg), 17);
    }

    #[test]
    fn buttons_only_do_not_touch_timestamp() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        let t0 = Instant::now();
        reg.on_report(d.key, &[0, 1], t0);
        assert!(reg.on_report(d.key, &[1, 0], t0 + Duration::from_millis(10)).is_none());
        assert_eq!(reg.get(d.key).and_then(DeviceSession::last_event), Some(t0));
    }

    #[test]
    fn buffered_report_reads_session_buffer() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, true);
        reg.on_arrival(&d);
        let buf = reg.report_buffer(d.key).expect("buffer");
        buf[..2].copy_from_slice(&[0x00, 0xfd]);
        let tick = reg.on_buffered_report(d.key, 6, Instant::now()).expect("tick");
        assert_eq!(tick.delta, -3);
        assert_eq!(tick.path, InputPath::RawReport);
        assert!(reg.on_buffered_report(d.key, 1, Instant::now()).is_none());
    }

    #[test]
    fn paths_are_mutually_exclusive() {
        let mut reg = SessionRegistry::new();
        let raw = dial(6, true);
        let value = dial(6, false);
        reg.on_arrival(&raw);
        assert_eq!(reg.on_arrival(&value), Arrival::Registered(InputPath::AxisValue));

        let now = Instant::now();
        assert!(reg.on_value(raw.key, USAGE_PAGE_GENERIC_DESKTOP, USAGE_RX, 2, now).is_none());
        assert!(reg.on_report(value.key, &[0, 2], now).is_none());
        assert!(reg.report_buffer(value.key).is_none());

        let tick = reg
            .on_value(value.key, USAGE_PAGE_GENERIC_DESKTOP, USAGE_RX, -4, now)
            .expect("tick");
        assert_eq!(tick.delta, -4);
        assert_eq!(tick.path, InputPath::AxisValue);
    }

    #[test]
    fn value_callback_ignores_other_usages() {
        let mut reg = SessionRegistry::new();
        let d = dial(6, false);
        reg.on_arrival(&d);
        assert!(reg.on_value(d.key, USAGE_PAGE_GENERIC_DESKTOP, 0x30, 3, Instant::now()).is_none());
        assert!(reg.on_value(d.key, 0x0c, USAGE_RX, 3, Instant::now()).is_none());
    }

    #[test]
    fn drain_releases_everything() {
        let mut reg = SessionRegistry::new();
        for _ in 0..3 {
            reg.on_arrival(&dial(6, true));
        }
        assert_eq!(reg.drain().len(), 3);
        assert!(reg.is_empty());
    }
}
