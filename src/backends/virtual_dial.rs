//! Scripted in-process dial source.
//!
//! [`VirtualDial`] is a cloneable handle: keep one clone to plug devices and feed
//! reports, and hand [`VirtualDial::factory`] to the engine. Everything fed goes
//! through the same [`DeviceSink`] callbacks a real backend uses, on the worker
//! thread, the next time the engine pumps.
//!
//! Dials plugged before the backend opens are announced by `enumerate`; events
//! queued while no backend is open are discarded when the next one opens.

use crate::backends::{BackendFactory, BackendOptions, DeviceBackend, DeviceSink};
use crate::device::{DeviceDescriptor, DeviceKey, USAGE_PAGE_GENERIC_DESKTOP, USAGE_RX};
use crate::error::EngineError;
use crate::metadata::DeviceMeta;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug)]
enum Pending {
    Arrive(DeviceDescriptor),
    Remove(DeviceKey),
    Report(DeviceKey, Vec<u8>, Instant),
    Value(DeviceKey, u16, u16, i64, Instant),
}

#[derive(Debug, Default)]
struct Script {
    connected: Vec<DeviceDescriptor>,
    pending: VecDeque<Pending>,
    fail_open: Option<String>,
    opened: usize,
    closed: usize,
}

/// Handle to a scripted set of dials.
#[derive(Clone, Debug, Default)]
pub struct VirtualDial {
    script: Arc<Mutex<Script>>,
}

impl VirtualDial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a dial with raw reports of `report_len` bytes.
    pub fn plug(&self, report_len: usize) -> DeviceKey {
        self.plug_device(report_len, true)
    }

    /// Connect a dial that only surfaces Generic Desktop `Rx` values.
    pub fn plug_value_only(&self) -> DeviceKey {
        self.plug_device(6, false)
    }

    fn plug_device(&self, report_len: usize, raw_reports: bool) -> DeviceKey {
        let key = DeviceKey::next();
        let device = DeviceDescriptor {
            key,
            meta: DeviceMeta {
                bus: Some("virtual".into()),
                product_string: Some("Virtual Dial".into()),
                ..DeviceMeta::default()
            },
            max_input_report_len: report_len,
            raw_reports,
        };
        let mut script = self.script.lock();
        script.connected.push(device.clone());
        script.pending.push_back(Pending::Arrive(device));
        key
    }

    pub fn unplug(&self, key: DeviceKey) {
        let mut script = self.script.lock();
        script.connected.retain(|d| d.key != key);
        script.pending.push_back(Pending::Remove(key));
    }

    /// Queue a raw report exactly as given, arriving now.
    pub fn feed_report(&self, key: DeviceKey, report: &[u8]) {
        self.feed_report_at(key, report, Instant::now());
    }

    /// Queue a raw report that arrived at `at`.
    pub fn feed_report_at(&self, key: DeviceKey, report: &[u8], at: Instant) {
        self.script
            .lock()
            .pending
            .push_back(Pending::Report(key, report.to_vec(), at));
    }

    /// Convenience: a `[buttons = 0, delta]` report.
    pub fn turn(&self, key: DeviceKey, delta: i8) {
        self.feed_report(key, &[0x00, delta as u8]);
    }

    /// Queue a Generic Desktop `Rx` value, arriving now.
    pub fn feed_value(&self, key: DeviceKey, value: i64) {
        self.feed_value_at(key, value, Instant::now());
    }

    pub fn feed_value_at(&self, key: DeviceKey, value: i64, at: Instant) {
        self.script.lock().pending.push_back(Pending::Value(
            key,
            USAGE_PAGE_GENERIC_DESKTOP,
            USAGE_RX,
            value,
            at,
        ));
    }

    /// Make subsequent backend opens fail with `reason` (`None` to recover).
    pub fn fail_open(&self, reason: Option<&str>) {
        self.script.lock().fail_open = reason.map(str::to_string);
    }

    /// How many times a backend was opened.
    pub fn open_count(&self) -> usize {
        self.script.lock().opened
    }

    /// How many times a backend released its handles.
    pub fn close_count(&self) -> usize {
        self.script.lock().closed
    }

    pub fn factory(&self) -> BackendFactory {
        let script = Arc::clone(&self.script);
        Arc::new(move |_options: &BackendOptions| {
            let mut guard = script.lock();
            if let Some(reason) = guard.fail_open.clone() {
                return Err(EngineError::BackendOpen(reason));
            }
            guard.opened += 1;
            // `enumerate` covers what is connected; anything else is stale.
            guard.pending.clear();
            drop(guard);
            Ok(Box::new(VirtualDialBackend {
                script: Arc::clone(&script),
            }) as Box<dyn DeviceBackend>)
        })
    }
}

struct VirtualDialBackend {
    script: Arc<Mutex<Script>>,
}

impl DeviceBackend for VirtualDialBackend {
    fn name(&self) -> &str {
        "virtual"
    }

    fn enumerate(&mut self, sink: &mut dyn DeviceSink) {
        let connected = self.script.lock().connected.clone();
        for device in &connected {
            sink.on_arrival(device);
        }
    }

    fn pump(&mut self, sink: &mut dyn DeviceSink) {
        // Take the queue first; callbacks must not run under the script lock.
        let pending: Vec<Pending> = self.script.lock().pending.drain(..).collect();
        for event in pending {
            match event {
                Pending::Arrive(device) => {
                    sink.on_arrival(&device);
                }
                Pending::Remove(key) => sink.on_removal(key),
                Pending::Report(key, bytes, at) => {
                    let Some(buf) = sink.report_buffer(key) else {
                        continue;
                    };
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    sink.on_report(key, n, at);
                }
                Pending::Value(key, usage_page, usage, value, at) => {
                    sink.on_value(key, usage_page, usage, value, at)
                }
            }
        }
    }

    fn close_all(&mut self) {
        self.script.lock().closed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionRegistry;
    use std::time::Duration;

    /// Sink that records ticks straight from a registry.
    #[derive(Default)]
    struct Recorder {
        registry: SessionRegistry,
        deltas: Vec<i32>,
        arrivals: Vec<Instant>,
        removed: Vec<DeviceKey>,
    }

    impl DeviceSink for Recorder {
        fn on_arrival(&mut self, device: &DeviceDescriptor) -> bool {
            !matches!(
                self.registry.on_arrival(device),
                crate::session::Arrival::Rejected { .. }
            )
        }
        fn on_removal(&mut self, key: DeviceKey) {
            self.removed.push(key);
            self.registry.on_removal(key);
        }
        fn report_buffer(&mut self, key: DeviceKey) -> Option<&mut [u8]> {
            self.registry.report_buffer(key)
        }
        fn on_report(&mut self, key: DeviceKey, len: usize, at: Instant) {
            self.arrivals.push(at);
            if let Some(t) = self.registry.on_buffered_report(key, len, at) {
                self.deltas.push(t.delta);
            }
        }
        fn on_value(&mut self, key: DeviceKey, page: u16, usage: u16, value: i64, at: Instant) {
            self.arrivals.push(at);
            if let Some(t) = self.registry.on_value(key, page, usage, value, at) {
                self.deltas.push(t.delta);
            }
        }
    }

    fn open(dial: &VirtualDial) -> Box<dyn DeviceBackend> {
        let options = BackendOptions {
            filter: Default::default(),
            rescan_interval: Duration::from_millis(10),
        };
        match (dial.factory())(&options) {
            Ok(backend) => backend,
            Err(e) => panic!("open failed: {e}"),
        }
    }

    #[test]
    fn reports_flow_through_session_buffer() {
        let dial = VirtualDial::new();
        let key = dial.plug(6);
        let mut backend = open(&dial);
        let mut sink = Recorder::default();
        backend.enumerate(&mut sink);

        dial.turn(key, 3);
        dial.turn(key, -2);
        dial.feed_report(key, &[0x01]);
        backend.pump(&mut sink);
        assert_eq!(sink.deltas, vec![3, -2]);
    }

    #[test]
    fn scripted_arrival_times_reach_the_sink() {
        let dial = VirtualDial::new();
        let key = dial.plug(6);
        let mut backend = open(&dial);
        let mut sink = Recorder::default();
        backend.enumerate(&mut sink);

        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(250);
        dial.feed_report_at(key, &[0, 1], t0);
        dial.feed_report_at(key, &[0, 1], t1);
        backend.pump(&mut sink);
        assert_eq!(sink.arrivals, vec![t0, t1]);
    }

    #[test]
    fn events_queued_while_closed_are_not_replayed() {
        let dial = VirtualDial::new();
        let key = dial.plug(6);
        dial.turn(key, 5);
        dial.feed_value(key, 2);

        let mut backend = open(&dial);
        let mut sink = Recorder::default();
        backend.enumerate(&mut sink);
        assert!(sink.registry.contains(key));
        backend.pump(&mut sink);
        assert!(sink.deltas.is_empty());
        assert!(sink.arrivals.is_empty());

        // A second open discards what piled up in between.
        backend.close_all();
        dial.turn(key, 7);
        let mut backend = open(&dial);
        backend.pump(&mut sink);
        assert!(sink.deltas.is_empty());
    }

    #[test]
    fn enumerate_announces_connected_devices() {
        let dial = VirtualDial::new();
        let a = dial.plug(6);
        let b = dial.plug(1);
        let mut backend = open(&dial);
        let mut sink = Recorder::default();
        backend.enumerate(&mut sink);
        assert!(sink.registry.contains(a));
        assert!(!sink.registry.contains(b));

        dial.unplug(a);
        backend.pump(&mut sink);
        assert_eq!(sink.removed, vec![a]);
        assert!(sink.registry.is_empty());
    }

    #[test]
    fn value_only_dials_use_value_path() {
        let dial = VirtualDial::new();
        let key = dial.plug_value_only();
        let mut backend = open(&dial);
        let mut sink = Recorder::default();
        backend.enumerate(&mut sink);
        dial.feed_value(key, 4);
        dial.turn(key, 9);
        backend.pump(&mut sink);
        assert_eq!(sink.deltas, vec![4]);
    }

    #[test]
    fn open_failure_is_scripted() {
        let dial = VirtualDial::new();
        dial.fail_open(Some("no access"));
        let options = BackendOptions {
            filter: Default::default(),
            rescan_interval: Duration::from_millis(10),
        };
        assert!(matches!(
            (dial.factory())(&options),
            Err(EngineError::BackendOpen(_))
        ));
        assert_eq!(dial.open_count(), 0);
    }
}
