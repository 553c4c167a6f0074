#![forbid(unsafe_code)]
//! sluice-exec: drives closed pipelines and records what happened.
//!
//! - `executor`: [`LocalExecutor`], a lazy sequence of steps over one run.
//! - `detached`: worker threads for operators that block on I/O.
//! - `metrics`: per-operator counters and phase timings.
//! - `runtime`: [`Engine`], which optimizes, runs, and emits a manifest.

pub mod detached;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod runtime;

pub use error::{ExecError, Result};
pub use executor::LocalExecutor;
pub use metrics::{OperatorMeasurement, OperatorMetric};
pub use runtime::Engine;
