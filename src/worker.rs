//! The worker context.
//!
//! One dedicated thread owns the device backend, every [`DeviceSession`] and the
//! scroll injector. Nothing else touches them: the engine marshals closures onto
//! the worker with [`Worker::run_sync`] and blocks on a one-shot reply, which is
//! how setup, teardown and manual pumps run.
//!
//! Between tasks the thread pumps the backend. With sessions open it wakes every
//! `poll_interval`; with none it only wakes every `rescan_interval`, which is
//! enough to notice new devices.
//!
//! [`DeviceSession`]: crate::session::DeviceSession

use crate::backends::{BackendFactory, BackendOptions, DeviceBackend, DeviceSink};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::engine::Shared;
use crate::error::EngineError;
use crate::event::RotationTick;
use crate::injector::{InjectorFactory, LogInjector, ScrollInjector};
use crate::priority::{self, Elevation};
use crate::scaler::scale;
use crate::session::{Arrival, SessionRegistry};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub(crate) const WORKER_THREAD_NAME: &str = "dialscroll-hid";

type Task = Box<dyn FnOnce(&mut WorkerContext) + Send>;

enum WorkerMessage {
    Run(Task),
    Shutdown,
}

/// Wake-up cadence of the pump loop.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PumpTiming {
    pub poll_interval: Duration,
    pub idle_interval: Duration,
}

/// Handle to the running worker thread.
pub(crate) struct Worker {
    tx: Sender<WorkerMessage>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the thread and wait until its loop is running.
    pub(crate) fn spawn(shared: Weak<Shared>, timing: PumpTiming) -> Result<Self, EngineError> {
        let (tx, rx) = channel::unbounded::<WorkerMessage>();
        let (ready_tx, ready_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let elevation = match priority::elevate_current_thread() {
                    Ok(elevation) => {
                        debug!("worker priority raised: {elevation}");
                        Some(elevation)
                    }
                    Err(e) => {
                        warn!("worker priority unchanged: {e}");
                        None
                    }
                };
                let mut ctx = WorkerContext::new(shared, elevation);
                // The spawner is blocked on this; a send error means it gave up.
                let _ = ready_tx.send(());
                run_loop(&mut ctx, &rx, timing);
                ctx.teardown();
            })
            .map_err(EngineError::WorkerSpawn)?;

        ready_rx.recv().map_err(|_| EngineError::WorkerGone)?;
        debug!("worker context ready");
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    /// Run `task` on the worker and block until it returns.
    pub(crate) fn run_sync<F, R>(&self, task: F) -> Result<R, EngineError>
    where
        F: FnOnce(&mut WorkerContext) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = channel::bounded::<R>(1);
        let task: Task = Box::new(move |ctx| {
            let _ = reply_tx.send(task(ctx));
        });
        self.tx
            .send(WorkerMessage::Run(task))
            .map_err(|_| EngineError::WorkerGone)?;
        reply_rx.recv().map_err(|_| EngineError::WorkerGone)
    }

    /// Stop the loop and join the thread.
    pub(crate) fn shutdown(mut self) -> Result<(), EngineError> {
        self.join()
    }

    fn join(&mut self) -> Result<(), EngineError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // Already gone if the thread panicked; join reports that below.
        let _ = self.tx.send(WorkerMessage::Shutdown);
        thread.join().map_err(|_| EngineError::WorkerPanicked)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.join() {
            error!("worker context: {e}");
        }
    }
}

fn run_loop(ctx: &mut WorkerContext, rx: &Receiver<WorkerMessage>, timing: PumpTiming) {
    loop {
        let wait = if ctx.is_idle() {
            timing.idle_interval
        } else {
            timing.poll_interval
        };
        match rx.recv_timeout(wait) {
            Ok(WorkerMessage::Run(task)) => task(ctx),
            Ok(WorkerMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        loop {
            match rx.try_recv() {
                Ok(WorkerMessage::Run(task)) => task(ctx),
                Ok(WorkerMessage::Shutdown) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
        ctx.pump_devices();
    }
}

/// What setup managed to bring up.
#[derive(Debug, Default)]
pub(crate) struct SetupOutcome {
    pub sessions: usize,
    pub errors: Vec<String>,
}

/// State owned by the worker thread.
pub(crate) struct WorkerContext {
    backend: Option<Box<dyn DeviceBackend>>,
    dispatch: Dispatcher,
    elevation: Option<Elevation>,
}

impl WorkerContext {
    fn new(shared: Weak<Shared>, elevation: Option<Elevation>) -> Self {
        Self {
            backend: None,
            elevation,
            dispatch: Dispatcher {
                registry: SessionRegistry::new(),
                injector: None,
                shared,
            },
        }
    }

    /// Create the injector, open the backend and register present devices.
    /// Failures are collected, not fatal: the context keeps running either way.
    pub(crate) fn setup(
        &mut self,
        backend: &BackendFactory,
        options: &BackendOptions,
        injector: &InjectorFactory,
    ) -> SetupOutcome {
        let mut outcome = SetupOutcome::default();

        match injector() {
            Ok(injector) => self.dispatch.injector = Some(injector),
            Err(e) => {
                warn!("scroll injector unavailable, logging scrolls instead: {e}");
                outcome.errors.push(e.to_string());
                self.dispatch.injector = Some(Box::new(LogInjector));
            }
        }

        match backend(options) {
            Ok(mut backend) => {
                backend.enumerate(&mut self.dispatch);
                info!(backend = backend.name(), "device subsystem open");
                self.backend = Some(backend);
            }
            Err(e) => {
                warn!("{e}");
                outcome.errors.push(e.to_string());
            }
        }

        outcome.sessions = self.dispatch.registry.len();
        outcome
    }

    /// Deliver pending backend callbacks.
    pub(crate) fn pump_devices(&mut self) {
        if let Some(backend) = self.backend.as_mut() {
            backend.pump(&mut self.dispatch);
        }
    }

    /// Release every session, close the backend and drop the injector.
    /// Returns how many sessions were released. Safe to call twice.
    pub(crate) fn teardown(&mut self) -> usize {
        let released = self.dispatch.registry.drain();
        for session in &released {
            trace!(key = %session.key(), "session released");
        }
        if let Some(mut backend) = self.backend.take() {
            backend.close_all();
        }
        self.dispatch.injector = None;
        self.dispatch.publish_session_count();
        released.len()
    }

    /// Scheduling boost obtained at spawn, `None` if the OS refused.
    pub(crate) fn elevation(&self) -> Option<Elevation> {
        self.elevation
    }

    pub(crate) fn session_count(&self) -> usize {
        self.dispatch.registry.len()
    }

    fn is_idle(&self) -> bool {
        self.dispatch.registry.is_empty()
    }
}

/// The [`DeviceSink`] the backend drives: sessions in, scroll lines out.
struct Dispatcher {
    registry: SessionRegistry,
    injector: Option<Box<dyn ScrollInjector>>,
    shared: Weak<Shared>,
}

impl Dispatcher {
    fn publish_session_count(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared
                .stats
                .active_sessions
                .store(self.registry.len(), Ordering::Relaxed);
        }
    }

    /// `tick` is `None` when a registered dial sent something without rotation.
    fn forward(&mut self, tick: Option<RotationTick>) {
        // Engine gone: drop the report.
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let Some(tick) = tick else {
            shared.stats.reports_ignored.fetch_add(1, Ordering::Relaxed);
            return;
        };
        shared.stats.reports_processed.fetch_add(1, Ordering::Relaxed);

        let config = *shared.config.lock();
        let lines = scale(tick.delta, tick.elapsed_secs, &config);
        trace!(key = %tick.key, delta = tick.delta, elapsed = tick.elapsed_secs, lines, "tick");
        if lines == 0 {
            return;
        }
        let Some(injector) = self.injector.as_mut() else {
            return;
        };
        if let Err(e) = injector.post_vertical_scroll(lines) {
            shared.stats.injection_failures.fetch_add(1, Ordering::Relaxed);
            warn!(lines, "scroll injection failed: {e}");
        }
    }
}

impl DeviceSink for Dispatcher {
    fn on_arrival(&mut self, device: &DeviceDescriptor) -> bool {
        let accepted = match self.registry.on_arrival(device) {
            Arrival::Registered(path) => {
                debug!(key = %device.key, ?path, "session opened");
                true
            }
            Arrival::Duplicate => true,
            Arrival::Rejected { report_len } => {
                warn!(%device, report_len, "report too short for a rotation byte, ignoring");
                false
            }
        };
        self.publish_session_count();
        accepted
    }

    fn on_removal(&mut self, key: DeviceKey) {
        if self.registry.on_removal(key).is_some() {
            debug!(%key, "session closed");
        }
        self.publish_session_count();
    }

    fn report_buffer(&mut self, key: DeviceKey) -> Option<&mut [u8]> {
        self.registry.report_buffer(key)
    }

    fn on_report(&mut self, key: DeviceKey, len: usize, at: Instant) {
        if !self.registry.contains(key) {
            return;
        }
        let tick = self.registry.on_buffered_report(key, len, at);
        self.forward(tick);
    }

    fn on_value(&mut self, key: DeviceKey, usage_page: u16, usage: u16, value: i64, at: Instant) {
        if !self.registry.contains(key) {
            return;
        }
        let tick = self.registry.on_value(key, usage_page, usage, value, at);
        self.forward(tick);
    }
}
