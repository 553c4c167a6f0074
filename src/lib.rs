#![forbid(unsafe_code)]
//! sluice: streaming pipelines of composable operators.
//!
//! This crate re-exports the workspace crates under one name:
//! - [`core`]: batch kinds, events, expressions, diagnostics, config.
//! - [`operators`]: the operator trait, adapters, and builtin operators.
//! - [`pipeline`]: pipelines, optimization, and the YAML format.
//! - [`exec`]: the local executor and the engine.

pub use sluice_core as core;
pub use sluice_exec as exec;
pub use sluice_operators as operators;
pub use sluice_pipeline as pipeline;

pub use sluice_exec::{Engine, LocalExecutor};
pub use sluice_operators::{BoxedOperator, Operator, OperatorExt};
pub use sluice_pipeline::Pipeline;
