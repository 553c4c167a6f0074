//! Per-operator accounting.
//!
//! Every operator of a run gets a [`MetricHandle`]. The executor wraps the
//! operator's input and output generators so that each pull is counted and
//! timed; nothing here is visible to the operator itself. Once the run ends
//! the handles are frozen into plain [`OperatorMetric`] values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use sluice_core::kind::BatchKind;
use sluice_operators::{Element, Generator, OperatorInput, OperatorOutput};

/// Totals for one side of an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorMeasurement {
    pub unit: BatchKind,
    /// Rows for events, bytes for byte chunks.
    pub num_elements: u64,
    pub num_batches: u64,
    pub num_approx_bytes: u64,
}

impl OperatorMeasurement {
    pub fn new(unit: BatchKind) -> Self {
        Self {
            unit,
            num_elements: 0,
            num_batches: 0,
            num_approx_bytes: 0,
        }
    }

    fn record<T: Element>(&mut self, item: &T) {
        if item.is_noop() {
            return;
        }
        self.num_batches += 1;
        self.num_elements += item.units();
        self.num_approx_bytes += item.approx_bytes();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorMetric {
    pub operator_index: u64,
    pub operator_name: String,
    pub inbound: OperatorMeasurement,
    pub outbound: OperatorMeasurement,
    /// Time spent in `instantiate`.
    pub time_starting: Duration,
    /// From the start of instantiation to the first pull of the input.
    pub time_to_first_input: Option<Duration>,
    /// Time spent inside this operator, excluding its upstream.
    pub time_processing: Duration,
    pub time_total: Duration,
    /// Number of times the output was advanced.
    pub num_runs: u64,
    /// Runs that pulled input or produced output.
    pub num_runs_processing: u64,
    pub num_runs_processing_input: u64,
    pub num_runs_processing_output: u64,
    pub internal: bool,
}

#[derive(Debug)]
struct MeterState {
    metric: OperatorMetric,
    created: Instant,
    /// Output time including everything pulled from upstream.
    inclusive: Duration,
    input_pulls: u64,
}

/// Shared, mutable view on one operator's metric while the run is live.
#[derive(Debug, Clone)]
pub struct MetricHandle {
    state: Arc<Mutex<MeterState>>,
}

impl MetricHandle {
    pub fn new(index: usize, name: impl Into<String>, internal: bool) -> Self {
        let metric = OperatorMetric {
            operator_index: index as u64,
            operator_name: name.into(),
            inbound: OperatorMeasurement::new(BatchKind::Void),
            outbound: OperatorMeasurement::new(BatchKind::Void),
            time_starting: Duration::ZERO,
            time_to_first_input: None,
            time_processing: Duration::ZERO,
            time_total: Duration::ZERO,
            num_runs: 0,
            num_runs_processing: 0,
            num_runs_processing_input: 0,
            num_runs_processing_output: 0,
            internal,
        };
        Self {
            state: Arc::new(Mutex::new(MeterState {
                metric,
                created: Instant::now(),
                inclusive: Duration::ZERO,
                input_pulls: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MeterState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn record_starting(&self, elapsed: Duration) {
        self.lock().metric.time_starting = elapsed;
    }

    fn inclusive(&self) -> Duration {
        self.lock().inclusive
    }

    /// Snapshot of the metric. `upstream` is the handle of the previous
    /// operator, whose time is subtracted from ours.
    pub fn snapshot(&self, upstream: Option<&MetricHandle>) -> OperatorMetric {
        let upstream_time = upstream.map(MetricHandle::inclusive).unwrap_or_default();
        let state = self.lock();
        let mut metric = state.metric.clone();
        metric.time_processing = state.inclusive.saturating_sub(upstream_time);
        metric.time_total = state.created.elapsed();
        metric
    }
}

/// Count every pull of the operator's input.
pub fn meter_input(input: OperatorInput, handle: &MetricHandle) -> OperatorInput {
    handle.lock().metric.inbound.unit = input.kind();
    match input {
        OperatorInput::Void => OperatorInput::Void,
        OperatorInput::Events(g) => OperatorInput::Events(metered_input(g, handle.clone())),
        OperatorInput::Bytes(g) => OperatorInput::Bytes(metered_input(g, handle.clone())),
    }
}

/// Count and time every advance of the operator's output. Non-empty
/// elements bump `progress`.
pub fn meter_output(
    output: OperatorOutput,
    handle: &MetricHandle,
    progress: &Arc<AtomicU64>,
) -> OperatorOutput {
    handle.lock().metric.outbound.unit = output.kind();
    match output {
        OperatorOutput::Void(g) => {
            OperatorOutput::Void(metered_output(g, handle.clone(), progress.clone()))
        }
        OperatorOutput::Events(g) => {
            OperatorOutput::Events(metered_output(g, handle.clone(), progress.clone()))
        }
        OperatorOutput::Bytes(g) => {
            OperatorOutput::Bytes(metered_output(g, handle.clone(), progress.clone()))
        }
    }
}

fn metered_input<T: Element>(mut inner: Generator<T>, handle: MetricHandle) -> Generator<T> {
    Box::new(std::iter::from_fn(move || {
        let item = inner.next();
        let mut state = handle.lock();
        state.input_pulls += 1;
        if state.metric.time_to_first_input.is_none() {
            let elapsed = state.created.elapsed();
            state.metric.time_to_first_input = Some(elapsed);
        }
        if let Some(item) = &item {
            state.metric.inbound.record(item);
        }
        item
    }))
}

fn metered_output<T: Element>(
    mut inner: Generator<T>,
    handle: MetricHandle,
    progress: Arc<AtomicU64>,
) -> Generator<T> {
    Box::new(std::iter::from_fn(move || {
        let pulls_before = handle.lock().input_pulls;
        let started = Instant::now();
        let item = inner.next();
        let elapsed = started.elapsed();

        let mut state = handle.lock();
        state.inclusive += elapsed;
        let pulled = state.input_pulls > pulls_before;
        let produced = item.as_ref().map_or(false, |i| !i.is_noop());
        let metric = &mut state.metric;
        metric.num_runs += 1;
        if pulled {
            metric.num_runs_processing_input += 1;
        }
        if produced {
            metric.num_runs_processing_output += 1;
            progress.fetch_add(1, Ordering::Relaxed);
        }
        if pulled || produced {
            metric.num_runs_processing += 1;
        }
        if let Some(item) = &item {
            metric.outbound.record(item);
        }
        item
    }))
}
