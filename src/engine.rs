//! The HID engine: lifecycle, shared config and status.
//!
//! [`HidEngine`] is driven from any thread. Lifecycle calls are serialised by an
//! internal lock and marshalled onto the worker context (see [`crate::worker`]);
//! [`HidEngine::update_config`] only swaps the shared config under its own lock
//! and never waits on the worker.
//!
//! ## State machine
//! ```text
//! Stopped --start()--> Starting --setup done--> Running
//! Running --stop()---> Stopping --joined-----> Stopped
//! ```
//! Startup failures (worker spawn, backend open, injector creation) do not
//! unwind: they land in [`EngineStatus::last_error`] and the engine stays
//! `Running` with no active device path until [`HidEngine::restart`].

use crate::backends::{BackendFactory, BackendOptions};
use crate::config::{ScrollConfig, Settings};
use crate::device::DeviceFilter;
use crate::injector::InjectorFactory;
use crate::worker::{PumpTiming, Worker};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);
const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum EngineState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineState::Stopped => "stopped",
            EngineState::Starting => "starting",
            EngineState::Running => "running",
            EngineState::Stopping => "stopping",
        })
    }
}

/// Point-in-time view of the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    pub active_sessions: usize,
    /// Most recent startup or device-layer failure since the last `start()`.
    pub last_error: Option<String>,
    /// Reports that produced a rotation tick.
    pub reports_processed: u64,
    /// Reports from registered dials that carried no rotation (button-only,
    /// too short, other usages). Traffic for unknown devices is not counted.
    pub reports_ignored: u64,
    pub injection_failures: u64,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | sessions: {} | processed: {} | ignored: {} | injection failures: {}",
            self.state,
            self.active_sessions,
            self.reports_processed,
            self.reports_ignored,
            self.injection_failures
        )?;
        if let Some(err) = &self.last_error {
            write!(f, " | last error: {err}")?;
        }
        Ok(())
    }
}

/// Everything the engine needs to build its worker context.
#[derive(Clone)]
pub struct EngineOptions {
    pub filter: DeviceFilter,
    pub poll_interval: Duration,
    pub rescan_interval: Duration,
    pub initial_config: ScrollConfig,
    pub backend: BackendFactory,
    pub injector: InjectorFactory,
}

impl EngineOptions {
    pub fn new(backend: BackendFactory, injector: InjectorFactory) -> Self {
        Self {
            filter: DeviceFilter::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
            initial_config: ScrollConfig::default(),
            backend,
            injector,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        backend: BackendFactory,
        injector: InjectorFactory,
    ) -> Self {
        Self {
            filter: settings.device.filter(),
            poll_interval: settings.device.poll_interval(),
            rescan_interval: settings.device.rescan_interval(),
            initial_config: settings.scroll,
            backend,
            injector,
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("filter", &self.filter)
            .field("poll_interval", &self.poll_interval)
            .field("rescan_interval", &self.rescan_interval)
            .field("initial_config", &self.initial_config)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub active_sessions: AtomicUsize,
    pub reports_processed: AtomicU64,
    pub reports_ignored: AtomicU64,
    pub injection_failures: AtomicU64,
}

/// State shared between the caller side and the worker context.
#[derive(Debug)]
pub(crate) struct Shared {
    pub config: Mutex<ScrollConfig>,
    pub state: Mutex<EngineState>,
    pub last_error: Mutex<Option<String>>,
    pub stats: Stats,
}

impl Shared {
    pub(crate) fn new(config: ScrollConfig) -> Self {
        Self {
            config: Mutex::new(config),
            state: Mutex::new(EngineState::Stopped),
            last_error: Mutex::new(None),
            stats: Stats::default(),
        }
    }
}

pub struct HidEngine {
    options: EngineOptions,
    shared: Arc<Shared>,
    /// Also serialises `start`/`stop`.
    worker: Mutex<Option<Worker>>,
}

impl HidEngine {
    pub fn new(options: EngineOptions) -> Self {
        let shared = Arc::new(Shared::new(options.initial_config));
        Self {
            options,
            shared,
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state.lock()
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.lock() = state;
    }

    fn record_error(&self, message: String) {
        warn!("{message}");
        *self.shared.last_error.lock() = Some(message);
    }

    /// Spawn the worker context and open the device subsystem on it.
    /// No-op unless the engine is stopped.
    pub fn start(&self) {
        let mut slot = self.worker.lock();
        let state = self.state();
        if state != EngineState::Stopped {
            debug!(%state, "start ignored");
            return;
        }

        self.set_state(EngineState::Starting);
        *self.shared.last_error.lock() = None;
        info!("starting HID engine");

        let timing = PumpTiming {
            poll_interval: self.options.poll_interval,
            idle_interval: self.options.rescan_interval,
        };
        let worker = match Worker::spawn(Arc::downgrade(&self.shared), timing) {
            Ok(worker) => worker,
            Err(e) => {
                self.record_error(e.to_string());
                self.set_state(EngineState::Running);
                return;
            }
        };

        let backend = Arc::clone(&self.options.backend);
        let injector = Arc::clone(&self.options.injector);
        let backend_options = BackendOptions {
            filter: self.options.filter,
            rescan_interval: self.options.rescan_interval,
        };
        match worker.run_sync(move |ctx| ctx.setup(&backend, &backend_options, &injector)) {
            Ok(outcome) => {
                for error in outcome.errors {
                    self.record_error(error);
                }
                info!(sessions = outcome.sessions, "HID engine running");
            }
            Err(e) => self.record_error(e.to_string()),
        }

        *slot = Some(worker);
        self.set_state(EngineState::Running);
    }

    /// Tear down every session on the worker context, then join it.
    /// No-op when already stopped.
    pub fn stop(&self) {
        let mut slot = self.worker.lock();
        if self.state() == EngineState::Stopped {
            debug!("stop ignored: already stopped");
            return;
        }

        self.set_state(EngineState::Stopping);
        info!("stopping HID engine");
        if let Some(worker) = slot.take() {
            match worker.run_sync(|ctx| ctx.teardown()) {
                Ok(released) => debug!(released, "sessions released"),
                Err(e) => warn!("teardown: {e}"),
            }
            if let Err(e) = worker.shutdown() {
                warn!("worker shutdown: {e}");
            }
        }
        self.shared.stats.active_sessions.store(0, Ordering::Relaxed);
        self.set_state(EngineState::Stopped);
        info!("HID engine stopped");
    }

    /// `stop()` then `start()`; the only retry path after a startup failure.
    pub fn restart(&self) {
        self.stop();
        self.start();
    }

    /// Replace the live config. Takes effect on the next processed report.
    pub fn update_config(&self, config: ScrollConfig) {
        *self.shared.config.lock() = config;
        debug!(?config, "config updated");
    }

    pub fn config(&self) -> ScrollConfig {
        *self.shared.config.lock()
    }

    pub fn status(&self) -> EngineStatus {
        let stats = &self.shared.stats;
        EngineStatus {
            state: self.state(),
            active_sessions: stats.active_sessions.load(Ordering::Relaxed),
            last_error: self.shared.last_error.lock().clone(),
            reports_processed: stats.reports_processed.load(Ordering::Relaxed),
            reports_ignored: stats.reports_ignored.load(Ordering::Relaxed),
            injection_failures: stats.injection_failures.load(Ordering::Relaxed),
        }
    }

    /// Pump the backend once on the worker context and wait for it.
    /// Returns `false` when there is no worker to pump.
    pub fn poll_now(&self) -> bool {
        let slot = self.worker.lock();
        match slot.as_ref() {
            Some(worker) => worker.run_sync(|ctx| ctx.pump_devices()).is_ok(),
            None => false,
        }
    }
}

impl Drop for HidEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::virtual_dial::VirtualDial;
    use crate::injector::RecordingInjector;

    fn engine() -> (HidEngine, VirtualDial, RecordingInjector) {
        let dial = VirtualDial::new();
        let rec = RecordingInjector::new();
        let mut options = EngineOptions::new(dial.factory(), rec.factory());
        options.poll_interval = Duration::from_millis(1);
        options.rescan_interval = Duration::from_millis(5);
        (HidEngine::new(options), dial, rec)
    }

    #[test]
    fn starts_stopped() {
        let (engine, _, _) = engine();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.poll_now());
    }

    #[test]
    fn update_config_works_while_stopped() {
        let (engine, _, _) = engine();
        let cfg = ScrollConfig::default().with_invert(true);
        engine.update_config(cfg);
        assert_eq!(engine.config(), cfg);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[test]
    fn status_display_includes_error() {
        let status = EngineStatus {
            state: EngineState::Running,
            active_sessions: 0,
            last_error: Some("no access".into()),
            reports_processed: 0,
            reports_ignored: 0,
            injection_failures: 0,
        };
        let text = status.to_string();
        assert!(text.starts_with("running"));
        assert!(text.ends_with("last error: no access"));
    }

    #[test]
    fn drop_releases_backend() {
        let (engine, dial, _) = engine();
        engine.start();
        assert_eq!(dial.open_count(), 1);
        drop(engine);
        assert_eq!(dial.close_count(), 1);
    }
}
