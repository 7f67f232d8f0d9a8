//! dialscroll: turn a USB rotary dial into an accelerated scroll wheel.
//!
//! Rotation reports are read on a dedicated worker thread, scaled by a
//! velocity-dependent gain curve and injected back into the OS as vertical
//! wheel events. [`HidEngine`] is the entry point; [`ScrollConfig`] is the
//! live-tunable curve.
//!
//! ```no_run
//! use dialscroll::{backends, injector, EngineOptions, HidEngine, ScrollConfig};
//!
//! let engine = HidEngine::new(EngineOptions::new(
//!     backends::default_backend(),
//!     injector::platform_injector(),
//! ));
//! engine.start();
//! engine.update_config(ScrollConfig::default().with_invert(true));
//! println!("{}", engine.status());
//! engine.stop();
//! ```

pub mod backends;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod event;
pub mod injector;
pub mod logger;
pub mod metadata;
mod priority;
pub mod scaler;
pub mod session;
mod worker;

pub use config::{ScrollConfig, Settings};
pub use device::*;
pub use engine::*;
pub use error::*;
pub use event::*;
pub use metadata::DeviceMeta;
