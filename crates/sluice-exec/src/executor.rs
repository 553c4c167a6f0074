//! Cooperative, single-threaded execution of a closed pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sluice_core::config::EngineConfig;
use sluice_core::diagnostics::Diagnostic;
use sluice_core::id::RunId;
use sluice_operators::{
    ControlHandle, ControlPlane, DemandSettings, Generator, LocalControlPlane, OpError, Operator,
    OperatorInput, OperatorOutput,
};
use sluice_pipeline::Pipeline;

use crate::detached::instantiate_detached;
use crate::error::{ExecError, Result};
use crate::metrics::{meter_input, meter_output, MetricHandle, OperatorMetric};

enum State {
    Pending,
    Running(Generator<()>),
    Done,
}

/// Drives a closed pipeline one step at a time.
///
/// Each call to `next` advances the sink once. The sequence ends when the
/// pipeline is exhausted, after the first error, or when `max_steps` is
/// reached. Dropping the executor mid-run cancels it: every generator is
/// dropped, and detached workers are stopped and joined.
pub struct LocalExecutor {
    pipeline: Pipeline,
    ctrl: Arc<LocalControlPlane>,
    capacity: usize,
    max_steps: Option<u64>,
    idle_after: Duration,
    backoff: Backoff,
    last_progress: Instant,
    state: State,
    handles: Vec<MetricHandle>,
    metrics: Vec<OperatorMetric>,
    progress: Arc<AtomicU64>,
    has_detached: bool,
    steps: u64,
    abandoned: bool,
}

impl LocalExecutor {
    /// Fails with [`ExecError::NotClosed`] unless the pipeline is void -> void.
    pub fn new(pipeline: Pipeline, cfg: &EngineConfig) -> Result<Self> {
        if !pipeline.is_closed() {
            return Err(ExecError::NotClosed(pipeline.to_string()));
        }
        let ctrl = LocalControlPlane::shared(pipeline.to_string());
        let ops = pipeline.operators();
        let has_detached = ops.iter().any(|op| op.detached());
        // The pipeline is idle once every operator has been quiet for as
        // long as it asked for.
        let idle_after = ops
            .iter()
            .map(|op| op.idle_after())
            .max()
            .unwrap_or(Duration::ZERO);
        let backoff = Backoff::new(
            Duration::from_micros(cfg.idle_backoff_us),
            ops.iter().map(|op| op.demand()),
        );
        Ok(Self {
            pipeline,
            ctrl,
            capacity: cfg.detached_queue_capacity.max(1),
            max_steps: cfg.max_steps,
            idle_after,
            backoff,
            last_progress: Instant::now(),
            state: State::Pending,
            handles: Vec::new(),
            metrics: Vec::new(),
            progress: Arc::new(AtomicU64::new(0)),
            has_detached,
            steps: 0,
            abandoned: false,
        })
    }

    pub fn run_id(&self) -> RunId {
        self.ctrl.run_id()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The step limit was reached before the pipeline finished.
    pub fn abandoned(&self) -> bool {
        self.abandoned
    }

    /// Final metrics, available once the sequence has ended.
    pub fn metrics(&self) -> &[OperatorMetric] {
        &self.metrics
    }

    pub fn take_metrics(&mut self) -> Vec<OperatorMetric> {
        std::mem::take(&mut self.metrics)
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.ctrl.collected()
    }

    /// Drive to completion, returning the first error.
    pub fn run_to_end(&mut self) -> Result<()> {
        for step in self.by_ref() {
            step?;
        }
        Ok(())
    }

    fn start(&mut self) -> Result<Generator<()>> {
        tracing::debug!(pipeline = %self.pipeline, run_id = %self.ctrl.run_id(), "starting run");
        let ctrl: ControlHandle = self.ctrl.clone();
        let ops = self.pipeline.operators();
        let mut input = OperatorInput::Void;
        for (index, op) in ops.iter().enumerate() {
            let handle = MetricHandle::new(index, op.name(), op.internal());
            self.handles.push(handle.clone());
            let output = if op.detached() {
                instantiate_detached(
                    op.as_ref(),
                    input,
                    ctrl.clone(),
                    queue_bound(op.as_ref(), self.capacity),
                    &handle,
                    &self.progress,
                )?
            } else {
                let started = Instant::now();
                let output = op.instantiate(meter_input(input, &handle), ctrl.clone())?;
                handle.record_starting(started.elapsed());
                meter_output(output, &handle, &self.progress)
            };
            if index + 1 == ops.len() {
                return match output {
                    OperatorOutput::Void(sink) => Ok(sink),
                    other => Err(ExecError::Pipeline(format!(
                        "pipeline ends in {} instead of void",
                        other.kind()
                    ))),
                };
            }
            input = output.into_input().map_err(|_| {
                OpError::TypeClash(format!(
                    "pipeline continues with '{}' after sink",
                    ops[index + 1].name()
                ))
            })?;
        }
        // empty pipeline
        Ok(Box::new(std::iter::empty()))
    }

    fn finish(&mut self) {
        self.state = State::Done;
        let dropped = self.ctrl.dropped_diagnostics();
        if dropped > 0 {
            tracing::warn!(dropped, "diagnostics beyond the collection limit were only logged");
        }
        let mut upstream: Option<&MetricHandle> = None;
        for handle in &self.handles {
            let metric = handle.snapshot(upstream);
            tracing::debug!(
                operator = %metric.operator_name,
                index = metric.operator_index,
                inbound = metric.inbound.num_elements,
                outbound = metric.outbound.num_elements,
                runs = metric.num_runs,
                processing_us = metric.time_processing.as_micros() as u64,
                "operator metrics"
            );
            self.metrics.push(metric);
            upstream = Some(handle);
        }
        self.handles.clear();
    }

    fn abandon(&mut self) {
        tracing::debug!(steps = self.steps, "step limit reached, abandoning run");
        self.abandoned = true;
        self.ctrl.cancel();
        self.finish();
    }
}

impl Iterator for LocalExecutor {
    type Item = Result<()>;

    fn next(&mut self) -> Option<Self::Item> {
        if let State::Pending = self.state {
            match self.start() {
                Ok(sink) => self.state = State::Running(sink),
                Err(e) => {
                    self.finish();
                    return Some(Err(e));
                }
            }
        }
        if self.max_steps.is_some_and(|max| self.steps >= max) {
            if let State::Running(_) = self.state {
                self.abandon();
            }
            return None;
        }
        let State::Running(sink) = &mut self.state else {
            return None;
        };

        let before = self.progress.load(Ordering::Relaxed);
        let item = sink.next();
        if let Some(err) = self.ctrl.take_abort() {
            self.finish();
            return Some(Err(err.into()));
        }
        match item {
            None => {
                tracing::debug!(steps = self.steps, "pipeline exhausted");
                self.finish();
                None
            }
            Some(()) => {
                self.steps += 1;
                if self.progress.load(Ordering::Relaxed) != before {
                    self.last_progress = Instant::now();
                    self.backoff.reset();
                } else if self.has_detached && self.last_progress.elapsed() >= self.idle_after {
                    std::thread::sleep(self.backoff.next_delay());
                }
                Some(Ok(()))
            }
        }
    }
}

/// Queue bound for a detached operator: the engine's capacity, lowered by
/// the operator's own demand.
fn queue_bound(op: &dyn Operator, capacity: usize) -> usize {
    match op.demand().max_batches {
        Some(max) => capacity.min(usize::try_from(max).unwrap_or(usize::MAX)).max(1),
        None => capacity,
    }
}

/// Sleep between idle steps, growing by `rate` from `min` up to `max` and
/// starting over as soon as anything makes progress.
#[derive(Debug, Clone, PartialEq)]
struct Backoff {
    min: Duration,
    max: Duration,
    rate: f64,
    current: Duration,
}

impl Backoff {
    /// `base` applies unless an operator asks for something else. Among
    /// operators, the shortest backoff and the gentlest growth win.
    fn new(base: Duration, demands: impl Iterator<Item = DemandSettings>) -> Self {
        let mut min: Option<Duration> = None;
        let mut max: Option<Duration> = None;
        let mut rate: Option<f64> = None;
        for demand in demands {
            min = min_of(min, demand.min_backoff);
            max = min_of(max, demand.max_backoff);
            if let Some(r) = demand.backoff_rate.filter(|r| r.is_finite() && *r >= 1.0) {
                rate = Some(rate.map_or(r, |current: f64| current.min(r)));
            }
        }
        let min = min.unwrap_or(base);
        let max = max.unwrap_or(min).max(min);
        Self {
            min,
            max,
            rate: rate.unwrap_or(1.0),
            current: min,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = (self.current.as_nanos() as f64 * self.rate).round();
        self.current = if grown >= self.max.as_nanos() as f64 {
            self.max
        } else {
            Duration::from_nanos(grown as u64).max(self.min)
        };
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

fn min_of(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

impl Drop for LocalExecutor {
    fn drop(&mut self) {
        if let State::Running(_) = self.state {
            self.ctrl.cancel();
        }
    }
}
