//! The operator capability trait.
//!
//! An operator is a value that can be instantiated any number of times.
//! Instantiation wires it to an input stream and returns the output
//! stream; nothing runs until the output is pulled. Per-run state lives
//! inside the returned stream, never in the operator, so copies of one
//! operator can run concurrently.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;

use crate::control::{ControlHandle, LocalControlPlane};
use crate::error::OpError;
use crate::optimize::{EventOrder, OptimizeResult};
use crate::registry::OperatorSpec;
use crate::stream::{OperatorInput, OperatorOutput};

/// Where an operator has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Local,
    Remote,
    Anywhere,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Location::Local => "local",
            Location::Remote => "remote",
            Location::Anywhere => "anywhere",
        })
    }
}

/// Which roles an operator can play in a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Accepts void input and produces data.
    pub source: bool,
    /// Accepts data and produces data.
    pub transformation: bool,
    /// Accepts data and produces void.
    pub sink: bool,
}

/// Limits on how much an operator asks of its upstream, and how the
/// executor backs off while it waits. Unset fields leave the engine
/// configuration in charge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DemandSettings {
    /// Upper bound on batches queued in front of a detached operator.
    pub max_batches: Option<u64>,
    pub min_backoff: Option<Duration>,
    pub max_backoff: Option<Duration>,
    /// Growth factor of the backoff between consecutive idle steps.
    pub backoff_rate: Option<f64>,
}

pub type BoxedOperator = Box<dyn Operator>;

pub trait Operator: Send + Sync + fmt::Debug + 'static {
    /// Stable operator name, used in diagnostics and serialization.
    fn name(&self) -> String;

    /// Wire the operator to `input` and return its lazy output.
    ///
    /// Fails with [`OpError::KindMismatch`] when the operator does not
    /// accept the input's kind.
    fn instantiate(&self, input: OperatorInput, ctrl: ControlHandle)
        -> Result<OperatorOutput, OpError>;

    /// Deep copy. Copies share no per-run state.
    fn copy(&self) -> BoxedOperator;

    /// Take part in predicate and order pushdown. See [`OptimizeResult`].
    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult;

    fn location(&self) -> Location {
        Location::Anywhere
    }

    /// Run on a dedicated worker instead of the cooperative executor.
    fn detached(&self) -> bool {
        false
    }

    /// Hidden from user-facing metrics.
    fn internal(&self) -> bool {
        false
    }

    /// The output does not depend on the input's contents.
    fn input_independent(&self) -> bool {
        false
    }

    /// How long the operator may go without output before the executor
    /// treats it as idle and starts backing off. `Duration::MAX` asks to be
    /// polled continuously.
    fn idle_after(&self) -> Duration {
        Duration::ZERO
    }

    fn demand(&self) -> DemandSettings {
        DemandSettings::default()
    }

    /// Output kind for `input`, or the error `instantiate` would return.
    ///
    /// The default instantiates against an empty input and drops the
    /// output unpulled. Operators with side effects at instantiation must
    /// override this.
    fn infer_type(&self, input: BatchKind) -> Result<BatchKind, OpError> {
        let ctrl = LocalControlPlane::shared(self.name());
        let output = self.instantiate(OperatorInput::empty(input), ctrl)?;
        Ok(output.kind())
    }

    /// Serializable description; see [`crate::registry::Registry`].
    fn spec(&self) -> Result<OperatorSpec, OpError> {
        Err(OpError::NotSerializable(self.name()))
    }

    /// Compound operators hand over their parts so that containers can
    /// flatten them, leaving themselves empty. Everything else returns
    /// `None`.
    fn take_sequence(&mut self) -> Option<Vec<BoxedOperator>> {
        None
    }
}

impl Clone for BoxedOperator {
    fn clone(&self) -> Self {
        self.copy()
    }
}

/// Derived queries available on every operator.
pub trait OperatorExt: Operator {
    /// Check that `input` produces exactly `output`.
    fn check_type(&self, input: BatchKind, output: BatchKind) -> Result<(), OpError> {
        let actual = self.infer_type(input)?;
        if actual != output {
            return Err(OpError::TypeClash(format!(
                "'{}' produces {actual} for {input} input, expected {output}",
                self.name()
            )));
        }
        Ok(())
    }

    fn infer_signature(&self) -> Signature {
        let mut sig = Signature::default();
        if let Ok(out) = self.infer_type(BatchKind::Void) {
            sig.source = !out.is_void();
        }
        for input in [BatchKind::Events, BatchKind::Bytes] {
            match self.infer_type(input) {
                Ok(BatchKind::Void) => sig.sink = true,
                Ok(_) => sig.transformation = true,
                Err(_) => {}
            }
        }
        sig
    }
}

impl<T: Operator + ?Sized> OperatorExt for T {}
