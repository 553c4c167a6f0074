//! Ordered operator sequences.

use std::fmt;
use std::time::Duration;

use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;
use sluice_operators::filter::Where;
use sluice_operators::{
    BoxedOperator, ControlHandle, DemandSettings, EventOrder, Location, OpError, Operator,
    OperatorExt, OperatorInput, OperatorOutput, OperatorSpec, OptimizeResult, Registry,
};

/// A sequence of operators that behaves as one operator.
///
/// Invariant: no element is itself a pipeline. Every constructor flattens,
/// so `(a | b) | c` and `a | b | c` hold the same sequence.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    operators: Vec<BoxedOperator>,
}

impl Pipeline {
    pub fn new(operators: impl IntoIterator<Item = BoxedOperator>) -> Self {
        let mut pipeline = Self::default();
        for op in operators {
            pipeline.append(op);
        }
        pipeline
    }

    pub fn append(&mut self, mut op: BoxedOperator) {
        match op.take_sequence() {
            Some(ops) => self.operators.extend(ops),
            None => self.operators.push(op),
        }
    }

    pub fn prepend(&mut self, mut op: BoxedOperator) {
        match op.take_sequence() {
            Some(ops) => {
                self.operators.splice(0..0, ops);
            }
            None => self.operators.insert(0, op),
        }
    }

    pub fn operators(&self) -> &[BoxedOperator] {
        &self.operators
    }

    pub fn into_operators(self) -> Vec<BoxedOperator> {
        self.operators
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Runnable on its own: void in, void out.
    pub fn is_closed(&self) -> bool {
        self.check_type(BatchKind::Void, BatchKind::Void).is_ok()
    }

    /// Optimize with an empty filter and full order, but only when the
    /// pipeline is closed. Falls back to a copy of `self` if the rewrite
    /// leaves a filter behind or stops being closed.
    pub fn optimize_if_closed(&self) -> Pipeline {
        if !self.is_closed() {
            return self.clone();
        }
        let result = self.optimize(&Expression::trivially_true(), EventOrder::Ordered);
        if let Some(filter) = result.filter.as_ref().filter(|f| !f.is_trivially_true()) {
            tracing::error!(
                pipeline = %self,
                filter = %filter,
                "optimization of a closed pipeline left a filter behind"
            );
            return self.clone();
        }
        let optimized = match result.replacement {
            Some(replacement) => Pipeline::new([replacement]),
            None => Pipeline::default(),
        };
        if !optimized.is_closed() {
            tracing::error!(
                pipeline = %self,
                optimized = %optimized,
                "optimized pipeline is no longer closed"
            );
            return self.clone();
        }
        tracing::debug!(before = %self, after = %optimized, "optimized pipeline");
        optimized
    }

    /// Push `filter` as far upstream as possible. Returns the filter that
    /// has to be applied before the pipeline and the rewritten pipeline.
    pub fn optimize_into_filter(&self, filter: &Expression) -> (Expression, Pipeline) {
        let result = self.optimize(filter, EventOrder::Ordered);
        let pipeline = match result.replacement {
            Some(replacement) => Pipeline::new([replacement]),
            None => Pipeline::default(),
        };
        (
            result.filter.unwrap_or_else(Expression::trivially_true),
            pipeline,
        )
    }

    /// Split into pipelines that each end in a sink. A trailing part without
    /// a sink is returned last.
    pub fn split_at_void(self) -> Result<Vec<Pipeline>, OpError> {
        let mut result = Vec::new();
        let mut current = Pipeline::default();
        let mut kind = BatchKind::Void;
        for op in self.operators {
            kind = op.infer_type(kind)?;
            current.operators.push(op);
            if kind.is_void() {
                result.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            result.push(current);
        }
        Ok(result)
    }

    /// The one location all operators agree on, or `None` on a conflict
    /// between `local` and `remote`.
    pub fn infer_location(&self) -> Option<Location> {
        let mut result = Location::Anywhere;
        for op in &self.operators {
            let location = op.location();
            if location == Location::Anywhere {
                continue;
            }
            if result != Location::Anywhere && location != result {
                return None;
            }
            result = location;
        }
        Some(result)
    }

    /// Serializable form, one spec per operator.
    pub fn to_specs(&self) -> Result<Vec<OperatorSpec>, OpError> {
        self.operators.iter().map(|op| op.spec()).collect()
    }

    pub fn from_specs(specs: &[OperatorSpec], registry: &Registry) -> Result<Pipeline, OpError> {
        let ops = specs
            .iter()
            .map(|spec| registry.make(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline::new(ops))
    }
}

impl From<Vec<BoxedOperator>> for Pipeline {
    fn from(operators: Vec<BoxedOperator>) -> Self {
        Pipeline::new(operators)
    }
}

impl FromIterator<BoxedOperator> for Pipeline {
    fn from_iter<I: IntoIterator<Item = BoxedOperator>>(iter: I) -> Self {
        Pipeline::new(iter)
    }
}

fn describe(op: &dyn Operator) -> String {
    match op.spec() {
        Ok(spec) if !spec.config.is_empty() => match serde_json::to_string(&spec.config) {
            Ok(config) => format!("{} {config}", spec.op),
            Err(_) => spec.op,
        },
        _ => op.name(),
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operators.is_empty() {
            return f.write_str("pass");
        }
        for (i, op) in self.operators.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            f.write_str(&describe(op.as_ref()))?;
        }
        Ok(())
    }
}

impl Operator for Pipeline {
    fn name(&self) -> String {
        "pipeline".into()
    }

    fn instantiate(&self, input: OperatorInput, ctrl: ControlHandle) -> Result<OperatorOutput, OpError> {
        tracing::debug!(pipeline = %self, input = %input.kind(), "instantiating pipeline");
        let Some((last, init)) = self.operators.split_last() else {
            return Ok(match input {
                OperatorInput::Void => OperatorOutput::Void(Box::new(std::iter::empty())),
                OperatorInput::Events(g) => OperatorOutput::Events(g),
                OperatorInput::Bytes(g) => OperatorOutput::Bytes(g),
            });
        };
        let mut current = input;
        for (idx, op) in init.iter().enumerate() {
            let output = op.instantiate(current, ctrl.clone())?;
            current = output.into_input().map_err(|_| {
                let next = &self.operators[idx + 1];
                OpError::TypeClash(format!(
                    "pipeline continues with '{}' after sink",
                    next.name()
                ))
            })?;
        }
        last.instantiate(current, ctrl)
    }

    fn copy(&self) -> BoxedOperator {
        Box::new(self.clone())
    }

    /// Fold right to left. Wherever an operator does not take the
    /// accumulated filter upstream, an explicit `where` is left behind.
    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        let mut current_filter = filter.clone();
        let mut current_order = order;
        let mut rewritten: Vec<BoxedOperator> = Vec::with_capacity(self.operators.len());
        for op in self.operators.iter().rev() {
            let result = op.optimize(&current_filter, current_order);
            match result.filter {
                Some(filter) => current_filter = filter,
                None => {
                    if !current_filter.is_trivially_true() {
                        let leftover = std::mem::replace(
                            &mut current_filter,
                            Expression::trivially_true(),
                        );
                        rewritten.push(Where::boxed(leftover));
                    }
                }
            }
            if let Some(replacement) = result.replacement {
                rewritten.push(replacement);
            }
            current_order = result.order;
        }
        rewritten.reverse();
        OptimizeResult::new(
            Some(current_filter),
            current_order,
            Some(Box::new(Pipeline::new(rewritten))),
        )
    }

    fn location(&self) -> Location {
        panic!("location() is not defined for a pipeline; use infer_location()");
    }

    fn detached(&self) -> bool {
        panic!("detached() is not defined for a pipeline");
    }

    fn internal(&self) -> bool {
        panic!("internal() is not defined for a pipeline");
    }

    fn idle_after(&self) -> Duration {
        panic!("idle_after() is not defined for a pipeline");
    }

    fn demand(&self) -> DemandSettings {
        panic!("demand() is not defined for a pipeline");
    }

    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        let mut current = input;
        for (idx, op) in self.operators.iter().enumerate() {
            if idx > 0 && current.is_void() {
                return Err(OpError::TypeClash(format!(
                    "pipeline continues with '{}' after sink",
                    op.name()
                )));
            }
            current = op.infer_type(current)?;
        }
        Ok(current)
    }

    fn take_sequence(&mut self) -> Option<Vec<BoxedOperator>> {
        Some(std::mem::take(&mut self.operators))
    }
}
