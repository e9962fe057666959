//! Bundle lifecycle and watermark coordination for a streaming operator.
//!
//! An operator groups consecutive elements into bundles to amortize per-bundle overhead. Because
//! the output of an element may resolve asynchronously, a bundle is only finished once every
//! output of its elements has resolved, and a watermark is not propagated downstream before every
//! output that could precede it has been emitted.
//!
//! - [`BundleManager`] decides when bundles start and close, and holds/releases watermarks.
//! - [`FutureCollector`] seals the output handles of the current element(s).
//! - [`BundleProgressListener`] is notified about the bundle lifecycle.
//! - [`BundleOperator`] hosts a [`Processor`] and drives the manager from a single task.

pub use crate::error::{Error, Result};

/// Error and Result types.
mod error;

/// Bundle settings loaded from the environment.
pub mod config;

/// Event-time watermark.
pub mod watermark;

/// Aggregate result handles.
pub mod output;

/// Output Emitter and the ordered downstream reader.
pub mod emitter;

/// Future Collector.
pub mod collector;

/// Progress Listener.
pub mod listener;

/// Processing-time timer scheduling.
pub mod timer;

/// Bundle Manager.
pub mod bundle;

/// Operator hosting the user processing logic.
pub mod operator;

#[cfg(test)]
mod test_utils;

pub use crate::bundle::BundleManager;
pub use crate::collector::{FutureCollector, OutputFutureCollector};
pub use crate::config::{BundleConfig, Settings};
pub use crate::emitter::{ChannelEmitter, OrderedOutput, Output, OutputEmitter, OutputEvent};
pub use crate::listener::BundleProgressListener;
pub use crate::operator::{BundleOperator, InputEvent, Processor};
pub use crate::output::{OutputFuture, Outputs};
pub use crate::timer::{TimerEvent, TimerScheduler, TokioTimerScheduler};
pub use crate::watermark::Watermark;
