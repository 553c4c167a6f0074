#![forbid(unsafe_code)]
//! sluice-core: shared data model for the sluice pipeline engine.
//!
//! This crate holds everything operators, pipelines, and the executor agree
//! on without depending on each other:
//! - the closed set of batch kinds (`kind`) and the two batch types
//!   (`types::EventBatch`, `chunk::ByteChunk`),
//! - schemas and scalar values,
//! - the filter expressions used by predicate pushdown (`expr`),
//! - structured diagnostics (`diagnostics`),
//! - engine configuration, run manifests, and stable hashing.
//!
//! No threads, no I/O, no operator logic lives here.

pub mod chunk;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod expr;
pub mod hash;
pub mod id;
pub mod kind;
pub mod manifest;
pub mod prelude;
pub mod schema;
pub mod types;

/// Engine version recorded in run manifests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
