//! Engine: optimize a pipeline, run it, and emit a `RunManifest`.

use std::time::{SystemTime, UNIX_EPOCH};

use sluice_core::config::EngineConfig;
use sluice_core::hash::{hash_serde, Hash256};
use sluice_core::manifest::{RunManifest, RunOutcome};
use sluice_pipeline::Pipeline;

use crate::error::{ExecError, Result};
use crate::executor::LocalExecutor;
use crate::metrics::OperatorMetric;

/// Owns the engine configuration and runs pipelines under it.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    cfg: EngineConfig,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// The pipeline as it will be executed: optimized if enabled.
    pub fn prepare(&self, pipeline: &Pipeline) -> Pipeline {
        if self.cfg.optimize {
            pipeline.optimize_if_closed()
        } else {
            pipeline.clone()
        }
    }

    /// A step-wise executor for `pipeline`. Rejects open pipelines.
    pub fn executor(&self, pipeline: &Pipeline) -> Result<LocalExecutor> {
        self.cfg
            .validate()
            .map_err(|e| ExecError::Config(e.to_string()))?;
        LocalExecutor::new(self.prepare(pipeline), &self.cfg)
    }

    /// Run `pipeline` to the end.
    ///
    /// Construction errors (invalid config, open pipeline) are returned as
    /// `Err`. Once the run has started, its outcome is recorded in the
    /// manifest instead: a failing step yields `RunOutcome::Failed`.
    pub fn run(&self, pipeline: &Pipeline) -> Result<RunManifest<OperatorMetric>> {
        let mut executor = self.executor(pipeline)?;
        let pipeline_hash = pipeline_hash(executor.pipeline())?;
        let manifest = RunManifest::new(
            executor.run_id(),
            pipeline_hash,
            executor.pipeline().to_string(),
            now_millis(),
        );

        let error = executor.run_to_end().err();
        let outcome = match (&error, executor.abandoned()) {
            (Some(_), _) => RunOutcome::Failed,
            (None, true) => RunOutcome::Abandoned,
            (None, false) => RunOutcome::Completed,
        };
        if let Some(e) = &error {
            tracing::error!(error = %e, "pipeline run failed");
        }
        tracing::info!(
            run_id = %executor.run_id(),
            steps = executor.steps(),
            outcome = ?outcome,
            "pipeline run finished"
        );

        Ok(manifest.finish(
            now_millis(),
            executor.steps(),
            outcome,
            error.map(|e| e.to_string()),
            executor.take_metrics(),
        ))
    }
}

/// Hash of the serialized pipeline; `None` if any operator cannot be
/// serialized.
fn pipeline_hash(pipeline: &Pipeline) -> Result<Option<Hash256>> {
    match pipeline.to_specs() {
        Ok(specs) => hash_serde(&specs)
            .map(Some)
            .map_err(|e| ExecError::Hash(e.to_string())),
        Err(_) => Ok(None),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::types::EventBatch;
    use sluice_operators::filter::Where;
    use sluice_operators::sink::Discard;
    use sluice_operators::{from_map, from_source, BoxedOperator};

    fn discard() -> BoxedOperator {
        Box::new(Discard)
    }

    #[test]
    fn open_pipeline_is_rejected() {
        let engine = Engine::default();
        let open = Pipeline::new([Where::boxed("x == 1".parse().unwrap())]);
        assert!(matches!(engine.run(&open), Err(ExecError::NotClosed(_))));
    }

    #[test]
    fn manifest_for_serializable_pipeline() {
        let engine = Engine::default();
        let pipeline = Pipeline::new([
            sluice_operators::source::FromEvents::new(vec![]).boxed(),
            discard(),
        ]);
        let manifest = engine.run(&pipeline).unwrap();
        assert_eq!(manifest.outcome, RunOutcome::Completed);
        assert!(manifest.pipeline_hash.is_some());
        assert_eq!(manifest.metrics.len(), 2);
        assert!(manifest.finished_ms >= manifest.started_ms);
        assert_eq!(manifest.engine_version, sluice_core::VERSION);
    }

    #[test]
    fn closures_have_no_hash() {
        let engine = Engine::default();
        let pipeline = Pipeline::new([
            from_source("empty", || Vec::<EventBatch>::new()),
            from_map("drop", |_: EventBatch| ()),
        ]);
        let manifest = engine.run(&pipeline).unwrap();
        assert_eq!(manifest.outcome, RunOutcome::Completed);
        assert!(manifest.pipeline_hash.is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let engine = Engine::new(EngineConfig {
            detached_queue_capacity: 0,
            ..Default::default()
        });
        let pipeline = Pipeline::new([
            sluice_operators::source::FromEvents::new(vec![]).boxed(),
            discard(),
        ]);
        assert!(matches!(engine.run(&pipeline), Err(ExecError::Config(_))));
    }
}
