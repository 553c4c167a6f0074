//! Per-schema stateful operators.
//!
//! State is created lazily the first time a schema shows up and is owned by
//! one instantiation. An `initialize` failure is reported as an error
//! diagnostic and ends the output early.

use std::collections::HashMap;
use std::time::Duration;

use sluice_core::chunk::ByteChunk;
use sluice_core::diagnostics::Diagnostic;
use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;
use sluice_core::schema::Schema;
use sluice_core::types::EventBatch;

use crate::adapter::Describe;
use crate::control::{ControlHandle, ControlPlane};
use crate::error::OpError;
use crate::optimize::{EventOrder, OptimizeResult};
use crate::registry::OperatorSpec;
use crate::stream::{Element, Generator, OperatorInput, OperatorOutput};
use crate::traits::{BoxedOperator, DemandSettings, Location, Operator};

/// What `process` may return: a single element, or several that are
/// yielded one at a time.
pub trait ProcessOutput: Send + 'static {
    type Item: Element;
    type Iter: Iterator<Item = Self::Item> + Send + 'static;

    fn into_yields(self) -> Self::Iter;
}

impl ProcessOutput for EventBatch {
    type Item = EventBatch;
    type Iter = std::iter::Once<EventBatch>;

    fn into_yields(self) -> Self::Iter {
        std::iter::once(self)
    }
}

impl ProcessOutput for ByteChunk {
    type Item = ByteChunk;
    type Iter = std::iter::Once<ByteChunk>;

    fn into_yields(self) -> Self::Iter {
        std::iter::once(self)
    }
}

impl<T: Element> ProcessOutput for Vec<T> {
    type Item = T;
    type Iter = std::vec::IntoIter<T>;

    fn into_yields(self) -> Self::Iter {
        self.into_iter()
    }
}

impl<T: Element> ProcessOutput for Generator<T> {
    type Item = T;
    type Iter = Generator<T>;

    fn into_yields(self) -> Self::Iter {
        self
    }
}

pub trait SchematicFn: Describe {
    type State: Send + 'static;
    type Output: ProcessOutput;

    fn initialize(&self, schema: &Schema, ctrl: &dyn ControlPlane) -> Result<Self::State, OpError>;

    fn process(&self, batch: EventBatch, state: &mut Self::State) -> Self::Output;
}

type Item<L> = <<L as SchematicFn>::Output as ProcessOutput>::Item;

#[derive(Debug, Clone)]
pub struct Schematic<L>(pub L);

impl<L: SchematicFn> Schematic<L> {
    pub fn new(logic: L) -> Self {
        Self(logic)
    }

    pub fn boxed(logic: L) -> BoxedOperator {
        Box::new(Self(logic))
    }
}

impl<L: SchematicFn> Operator for Schematic<L> {
    fn name(&self) -> String {
        self.0.name()
    }

    fn instantiate(
        &self,
        input: OperatorInput,
        ctrl: ControlHandle,
    ) -> Result<OperatorOutput, OpError> {
        let input = match input {
            OperatorInput::Events(input) => input,
            other => return Err(OpError::kind_mismatch(self.0.name(), other.kind())),
        };
        let run = PerSchema {
            logic: self.0.clone(),
            ctrl,
            input,
            states: HashMap::new(),
            pending: None,
            started: false,
            done: false,
        };
        Ok(<Item<L> as Element>::into_output(Box::new(run)))
    }

    fn copy(&self) -> BoxedOperator {
        Box::new(self.clone())
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        let rewrite = self.0.optimize(filter, order);
        OptimizeResult::new(
            rewrite.filter,
            rewrite.order,
            rewrite
                .replacement
                .map(|logic| Box::new(Schematic(logic)) as BoxedOperator),
        )
    }

    fn location(&self) -> Location {
        self.0.location()
    }

    fn detached(&self) -> bool {
        self.0.detached()
    }

    fn internal(&self) -> bool {
        self.0.internal()
    }

    fn input_independent(&self) -> bool {
        self.0.input_independent()
    }

    fn idle_after(&self) -> Duration {
        self.0.idle_after()
    }

    fn demand(&self) -> DemandSettings {
        self.0.demand()
    }

    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        if input != BatchKind::Events {
            return Err(OpError::kind_mismatch(self.0.name(), input));
        }
        Ok(<Item<L> as Element>::KIND)
    }

    fn spec(&self) -> Result<OperatorSpec, OpError> {
        OperatorSpec::from_config(self.0.name(), self.0.config()?)
    }
}

/// One instantiation's output stream.
struct PerSchema<L: SchematicFn> {
    logic: L,
    ctrl: ControlHandle,
    input: Generator<EventBatch>,
    states: HashMap<Schema, L::State>,
    pending: Option<<L::Output as ProcessOutput>::Iter>,
    started: bool,
    done: bool,
}

impl<L: SchematicFn> Iterator for PerSchema<L> {
    type Item = Item<L>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        // Hand control back once before touching the input.
        if !self.started {
            self.started = true;
            return Some(Element::noop());
        }
        // Drain what the last `process` produced before pulling again.
        if let Some(pending) = &mut self.pending {
            if let Some(item) = pending.next() {
                return Some(item);
            }
            self.pending = None;
        }
        let Some(batch) = self.input.next() else {
            self.done = true;
            return None;
        };
        if batch.is_empty() {
            return Some(Element::noop());
        }
        let state = match self.states.entry(batch.schema.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                match self.logic.initialize(&batch.schema, &*self.ctrl) {
                    Ok(state) => entry.insert(state),
                    Err(err) => {
                        Diagnostic::error(err.to_string())
                            .primary(self.logic.name(), format!("schema `{}`", batch.schema.name))
                            .emit(self.ctrl.diagnostics());
                        self.done = true;
                        return None;
                    }
                }
            }
        };
        let mut yields = self.logic.process(batch, state).into_yields();
        match yields.next() {
            Some(item) => {
                self.pending = Some(yields);
                Some(item)
            }
            None => Some(Element::noop()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::generator;
    use sluice_core::schema::{DataType, Field};
    use sluice_core::types::Scalar;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts rows per schema; refuses schemas named "bad".
    #[derive(Debug, Clone)]
    struct RunningCount {
        inits: Arc<AtomicUsize>,
    }

    impl Describe for RunningCount {
        fn name(&self) -> String {
            "running_count".into()
        }
    }

    impl SchematicFn for RunningCount {
        type State = usize;
        type Output = Vec<EventBatch>;

        fn initialize(&self, schema: &Schema, _ctrl: &dyn ControlPlane) -> Result<usize, OpError> {
            if schema.name == "bad" {
                return Err(OpError::config("running_count", "unsupported schema"));
            }
            self.inits.fetch_add(1, Ordering::Relaxed);
            Ok(0)
        }

        fn process(&self, batch: EventBatch, state: &mut usize) -> Vec<EventBatch> {
            *state += batch.rows();
            // One output per row, to exercise flattening.
            (0..batch.rows()).map(|i| batch.slice(i, 1)).collect()
        }
    }

    fn batch(schema: &str, rows: i64) -> EventBatch {
        let schema = Schema::new(schema, vec![Field::new("x", DataType::Int64, false)]);
        EventBatch::from_rows(schema, (0..rows).map(|i| vec![Scalar::I64(i)]).collect()).unwrap()
    }

    fn run(batches: Vec<EventBatch>) -> (Vec<EventBatch>, usize, Arc<LocalControlPlane>) {
        let inits = Arc::new(AtomicUsize::new(0));
        let op = Schematic::new(RunningCount {
            inits: inits.clone(),
        });
        let ctrl = LocalControlPlane::shared("running_count");
        let out = op
            .instantiate(OperatorInput::Events(generator(batches.into_iter())), ctrl.clone())
            .unwrap();
        let OperatorOutput::Events(out) = out else {
            panic!("expected events");
        };
        (out.collect(), inits.load(Ordering::Relaxed), ctrl)
    }

    #[test]
    fn initializes_once_per_schema_and_flattens() {
        let (out, inits, _) = run(vec![batch("a", 2), batch("b", 1), batch("a", 1)]);
        assert_eq!(inits, 2);
        let rows: usize = out.iter().map(EventBatch::rows).sum();
        assert_eq!(rows, 4);
        // Leading no-op, then one yield per row.
        assert!(out[0].is_empty());
        assert_eq!(out.iter().filter(|b| !b.is_empty()).count(), 4);
    }

    #[test]
    fn empty_batches_yield_without_processing() {
        let (out, inits, _) = run(vec![EventBatch::empty(), EventBatch::empty()]);
        assert_eq!(inits, 0);
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(EventBatch::is_empty));
    }

    #[test]
    fn initialize_failure_ends_output_with_diagnostic() {
        let (out, _, ctrl) = run(vec![batch("a", 1), batch("bad", 1), batch("a", 1)]);
        assert_eq!(out.iter().map(EventBatch::rows).sum::<usize>(), 1);
        assert_eq!(ctrl.error_count(), 1);
        assert!(ctrl.collected()[0].message.contains("unsupported schema"));
    }

    #[test]
    fn rejects_non_event_input() {
        let op = Schematic::new(RunningCount {
            inits: Arc::default(),
        });
        for kind in [BatchKind::Void, BatchKind::Bytes] {
            let ctrl = LocalControlPlane::shared("x");
            let err = op.instantiate(OperatorInput::empty(kind), ctrl).unwrap_err();
            assert!(err.is_kind_mismatch());
            assert!(op.infer_type(kind).is_err());
        }
        assert_eq!(op.infer_type(BatchKind::Events).ok(), Some(BatchKind::Events));
    }
}
