#![doc = include_str!("../README.md")]

mod engine;
mod error;
mod lifecycle;
mod options;
mod signal;

pub use engine::Engine;
pub use error::{Error, Result};
pub use lifecycle::{ServerLifecycle, ShutdownHook, State};
pub use options::{ConfigureFn, EngineOption, InterceptorChain, InterceptorFn};
pub use signal::{ManualTrigger, OsSignals, SignalSource, Termination};
