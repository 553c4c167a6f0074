//! `discard`: consume and drop everything.

use sluice_core::expr::Expression;
use sluice_core::kind::BatchKind;

use crate::control::ControlHandle;
use crate::error::OpError;
use crate::optimize::{order_invariant, EventOrder, OptimizeResult};
use crate::registry::{OperatorSpec, Registry};
use crate::stream::{OperatorInput, OperatorOutput};
use crate::traits::{BoxedOperator, Operator};

#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Operator for Discard {
    fn name(&self) -> String {
        "discard".into()
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: ControlHandle) -> Result<OperatorOutput, OpError> {
        let steps: Box<dyn Iterator<Item = ()> + Send> = match input {
            OperatorInput::Void => return Err(OpError::kind_mismatch(self.name(), BatchKind::Void)),
            OperatorInput::Events(g) => Box::new(g.map(drop)),
            OperatorInput::Bytes(g) => Box::new(g.map(drop)),
        };
        Ok(OperatorOutput::Void(steps))
    }

    fn copy(&self) -> BoxedOperator {
        Box::new(*self)
    }

    /// Dropping does not depend on order, but the input may be bytes, so
    /// no weaker order than the one given is handed upstream.
    fn optimize(&self, _filter: &Expression, order: EventOrder) -> OptimizeResult {
        order_invariant(self, order)
    }

    fn spec(&self) -> Result<OperatorSpec, OpError> {
        Ok(OperatorSpec::new(self.name()))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("discard", |_spec: &OperatorSpec| {
        Ok(Box::new(Discard) as BoxedOperator)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::generator;
    use crate::traits::OperatorExt;
    use sluice_core::chunk::ByteChunk;

    #[test]
    fn one_step_per_element() {
        let input = OperatorInput::Bytes(generator(
            vec![ByteChunk::from("a"), ByteChunk::empty()].into_iter(),
        ));
        let OperatorOutput::Void(steps) = Discard
            .instantiate(input, LocalControlPlane::shared("discard"))
            .unwrap()
        else {
            panic!("expected void");
        };
        assert_eq!(steps.count(), 2);
    }

    #[test]
    fn is_a_sink_for_both_kinds() {
        assert_eq!(Discard.infer_type(BatchKind::Events).ok(), Some(BatchKind::Void));
        assert_eq!(Discard.infer_type(BatchKind::Bytes).ok(), Some(BatchKind::Void));
        let sig = Discard.infer_signature();
        assert!(sig.sink && !sig.source && !sig.transformation);
    }

    #[test]
    fn hands_upstream_the_order_it_was_given() {
        for order in [EventOrder::Ordered, EventOrder::Schema, EventOrder::Unordered] {
            let res = Discard.optimize(&Expression::trivially_true(), order);
            assert!(res.filter.is_none());
            assert_eq!(res.order, order);
            assert!(res.replacement.is_some());
        }
    }
}
