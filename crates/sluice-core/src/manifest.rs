//! Run manifest for audit/replay.
//!
//! The engine emits a manifest after a pipeline run ends, successfully or
//! not. It ties the run to the exact (optimized) pipeline definition that was
//! executed and carries the per-operator metrics of the run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::Hash256;
use crate::id::RunId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(pub Uuid);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Failed,
    /// The step limit was hit and the run was abandoned.
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest<M = serde_json::Value> {
    pub id: ManifestId,
    pub run_id: RunId,

    /// Hash of the serialized pipeline that was executed. `None` when the
    /// pipeline contains operators that cannot be serialized.
    pub pipeline_hash: Option<Hash256>,

    /// Human-readable form of the executed pipeline.
    pub definition: String,

    /// Engine version string for provenance.
    pub engine_version: String,

    /// Milliseconds since Unix epoch (UTC).
    pub started_ms: u64,
    pub finished_ms: u64,

    pub steps: u64,
    pub outcome: RunOutcome,
    pub error: Option<String>,

    /// Per-operator metrics, in pipeline order.
    pub metrics: Vec<M>,
}

impl<M> RunManifest<M> {
    pub fn new(
        run_id: RunId,
        pipeline_hash: Option<Hash256>,
        definition: String,
        started_ms: u64,
    ) -> Self {
        Self {
            id: ManifestId(Uuid::new_v4()),
            run_id,
            pipeline_hash,
            definition,
            engine_version: crate::VERSION.to_string(),
            started_ms,
            finished_ms: started_ms,
            steps: 0,
            outcome: RunOutcome::Completed,
            error: None,
            metrics: Vec::new(),
        }
    }

    pub fn finish(
        mut self,
        finished_ms: u64,
        steps: u64,
        outcome: RunOutcome,
        error: Option<String>,
        metrics: Vec<M>,
    ) -> Self {
        self.finished_ms = finished_ms;
        self.steps = steps;
        self.outcome = outcome;
        self.error = error;
        self.metrics = metrics;
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.finished_ms.saturating_sub(self.started_ms)
    }
}
