//! Convenient re-exports for downstream crates.

pub use crate::chunk::ByteChunk;
pub use crate::config::EngineConfig;
pub use crate::diagnostics::{Diagnostic, DiagnosticHandler, Severity};
pub use crate::error::{Error, Result};
pub use crate::expr::{CmpOp, Expression, Operand};
pub use crate::id::RunId;
pub use crate::kind::BatchKind;
pub use crate::manifest::{ManifestId, RunManifest, RunOutcome};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, EventBatch, Scalar};
