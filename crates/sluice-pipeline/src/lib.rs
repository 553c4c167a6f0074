#![forbid(unsafe_code)]
//! sluice-pipeline: operator sequences as a single operator.
//!
//! - `Pipeline` composes operators, flattening nested pipelines, and is an
//!   `Operator` itself.
//! - `Pipeline::optimize` folds predicate/order pushdown right to left;
//!   `optimize_if_closed` applies it to runnable pipelines only.
//! - `dsl::yaml` reads and writes pipeline definitions.

pub mod dsl;
pub mod error;
pub mod pipeline;

pub use dsl::yaml::{parse_yaml_pipeline, to_yaml, ParsedPipeline, PipelineDoc};
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
