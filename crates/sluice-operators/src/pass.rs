//! `pass`: forward the input unchanged.

use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;

use crate::control::ControlHandle;
use crate::error::OpError;
use crate::optimize::{EventOrder, OptimizeResult};
use crate::registry::{OperatorSpec, Registry};
use crate::stream::{OperatorInput, OperatorOutput};
use crate::traits::{BoxedOperator, Operator};

/// Identity on events and bytes. Disappears during optimization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pass;

impl Operator for Pass {
    fn name(&self) -> String {
        "pass".into()
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: ControlHandle) -> Result<OperatorOutput, OpError> {
        match input {
            OperatorInput::Void => Err(OpError::kind_mismatch(self.name(), BatchKind::Void)),
            OperatorInput::Events(g) => Ok(OperatorOutput::Events(g)),
            OperatorInput::Bytes(g) => Ok(OperatorOutput::Bytes(g)),
        }
    }

    fn copy(&self) -> BoxedOperator {
        Box::new(*self)
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        OptimizeResult::new(Some(filter.clone()), order, None)
    }

    fn spec(&self) -> Result<OperatorSpec, OpError> {
        Ok(OperatorSpec::new(self.name()))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("pass", |_spec: &OperatorSpec| {
        Ok(Box::new(Pass) as BoxedOperator)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::OperatorExt;

    #[test]
    fn identity_on_both_kinds() {
        assert_eq!(Pass.infer_type(BatchKind::Events).ok(), Some(BatchKind::Events));
        assert_eq!(Pass.infer_type(BatchKind::Bytes).ok(), Some(BatchKind::Bytes));
        assert!(Pass.infer_type(BatchKind::Void).unwrap_err().is_kind_mismatch());
        let sig = Pass.infer_signature();
        assert!(sig.transformation && !sig.source && !sig.sink);
    }

    #[test]
    fn optimizes_away() {
        let f: Expression = "x == 1".parse().unwrap();
        let res = Pass.optimize(&f, EventOrder::Schema);
        assert_eq!(res.filter, Some(f));
        assert_eq!(res.order, EventOrder::Schema);
        assert!(res.replacement.is_none());
    }
}
