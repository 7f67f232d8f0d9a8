//! Error types.
//!
//! None of these ever unwind out of [`HidEngine::start`](crate::engine::HidEngine::start):
//! device-layer and startup failures are recorded in the engine status and logged,
//! and the engine keeps running with no active device path.

use thiserror::Error;

/// Failures of the worker context or the device subsystem.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The worker dropped its end of a channel before answering.
    #[error("worker context exited unexpectedly")]
    WorkerGone,

    #[error("worker context panicked")]
    WorkerPanicked,

    #[error("failed to open device subsystem: {0}")]
    BackendOpen(String),

    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),
}

/// Failures while posting a synthetic scroll event.
#[derive(Debug, Error)]
pub enum InjectError {
    #[error("scroll injection unavailable: {0}")]
    Unavailable(String),

    #[error("scroll injection rejected by the OS: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failures while reading, writing or editing settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("unknown setting `{0}`")]
    UnknownField(String),

    #[error("invalid value `{value}` for `{field}`")]
    InvalidValue { field: String, value: String },
}
