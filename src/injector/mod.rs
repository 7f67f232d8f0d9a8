//! Synthetic scroll output.
//!
//! The engine moves its injector into the worker thread at start and only ever
//! calls it from there, so implementations need `Send` but not `Sync`, and never
//! see two calls at once. A line count of `0` is never passed.
//!
//! Injected events carry a stable synthetic source (a named virtual device on
//! Linux, a fixed `dwExtraInfo` tag on Windows) that never matches the dial
//! filter, so they cannot loop back into the engine.

use crate::error::InjectError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

#[cfg(target_os = "linux")]
pub mod uinput;
#[cfg(windows)]
pub mod windows;

/// Name the synthetic wheel shows up under.
pub const SYNTHETIC_DEVICE_NAME: &str = "dialscroll virtual wheel";

/// Posts vertical wheel motion into the OS input stream.
pub trait ScrollInjector: Send {
    /// Positive scrolls up (away from the user), negative scrolls down.
    fn post_vertical_scroll(&mut self, lines: i32) -> Result<(), InjectError>;
}

/// Creates the injector; called on the worker thread at engine start.
pub type InjectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn ScrollInjector>, InjectError> + Send + Sync>;

/// The real injector for this platform.
pub fn platform_injector() -> InjectorFactory {
    Arc::new(|| {
        #[cfg(target_os = "linux")]
        {
            let injector = uinput::UinputInjector::new()?;
            Ok(Box::new(injector) as Box<dyn ScrollInjector>)
        }
        #[cfg(windows)]
        {
            Ok(Box::new(windows::SendInputInjector::new()) as Box<dyn ScrollInjector>)
        }
        #[cfg(not(any(target_os = "linux", windows)))]
        {
            Err(InjectError::Unavailable(
                "no scroll injector for this platform".to_string(),
            ))
        }
    })
}

/// Logs each scroll instead of injecting it.
#[derive(Debug, Default)]
pub struct LogInjector;

impl ScrollInjector for LogInjector {
    fn post_vertical_scroll(&mut self, lines: i32) -> Result<(), InjectError> {
        info!(lines, "scroll");
        Ok(())
    }
}

impl LogInjector {
    pub fn factory() -> InjectorFactory {
        Arc::new(|| Ok(Box::new(LogInjector) as Box<dyn ScrollInjector>))
    }
}

#[derive(Debug, Default)]
struct Recording {
    lines: Vec<i32>,
    failing: bool,
}

/// Keeps every posted line count; clones share one log.
#[derive(Clone, Debug, Default)]
pub struct RecordingInjector {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything posted so far, in order.
    pub fn lines(&self) -> Vec<i32> {
        self.inner.lock().lines.clone()
    }

    pub fn clear(&self) {
        self.inner.lock().lines.clear();
    }

    /// While `true`, every post fails with [`InjectError::Rejected`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    pub fn factory(&self) -> InjectorFactory {
        let recorder = self.clone();
        Arc::new(move || Ok(Box::new(recorder.clone()) as Box<dyn ScrollInjector>))
    }
}

impl ScrollInjector for RecordingInjector {
    fn post_vertical_scroll(&mut self, lines: i32) -> Result<(), InjectError> {
        let mut inner = self.inner.lock();
        if inner.failing {
            return Err(InjectError::Rejected("recording injector set to fail".into()));
        }
        inner.lines.push(lines);
        Ok(())
    }
}
