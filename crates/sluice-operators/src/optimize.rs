//! Predicate and ordering pushdown results.

use serde::{Deserialize, Serialize};
use sluice_core::expr::Expression;

use crate::traits::{BoxedOperator, Operator};

/// How much of the event order downstream operators depend on.
///
/// - `Ordered`: the full order is observable.
/// - `Schema`: only the order among events of the same schema matters, so
///   events of different schemas may be interleaved freely.
/// - `Unordered`: any permutation is indistinguishable downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrder {
    Ordered,
    Schema,
    Unordered,
}

impl std::fmt::Display for EventOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventOrder::Ordered => "ordered",
            EventOrder::Schema => "schema",
            EventOrder::Unordered => "unordered",
        })
    }
}

/// Answer of [`Operator::optimize`].
///
/// Given a filter `f` and an order `o` requested by everything downstream,
/// the operator `op` promises:
///
/// ```text
/// op | where f | sink  ==  where filter | replacement | sink
/// ```
///
/// where the left side's sink only observes `o`, the right side's sink is
/// preceded by an operator that permutes events as `order` allows, a missing
/// `filter` means "nothing can be pushed past me", and a missing
/// `replacement` means the operator can be dropped.
#[derive(Debug)]
pub struct OptimizeResult {
    pub filter: Option<Expression>,
    pub order: EventOrder,
    pub replacement: Option<BoxedOperator>,
}

impl OptimizeResult {
    pub fn new(
        filter: Option<Expression>,
        order: EventOrder,
        replacement: Option<BoxedOperator>,
    ) -> Self {
        Self {
            filter,
            order,
            replacement,
        }
    }

    /// Keep the operator unchanged and push nothing.
    pub fn do_not_optimize<O: Operator + ?Sized>(op: &O) -> Self {
        Self::new(None, EventOrder::Ordered, Some(op.copy()))
    }

    /// Keep the operator unchanged and pass the downstream order through.
    pub fn order_invariant<O: Operator + ?Sized>(op: &O, order: EventOrder) -> Self {
        Self::new(None, order, Some(op.copy()))
    }
}

/// Shorthand for [`OptimizeResult::do_not_optimize`].
pub fn do_not_optimize<O: Operator + ?Sized>(op: &O) -> OptimizeResult {
    OptimizeResult::do_not_optimize(op)
}

/// Shorthand for [`OptimizeResult::order_invariant`].
pub fn order_invariant<O: Operator + ?Sized>(op: &O, order: EventOrder) -> OptimizeResult {
    OptimizeResult::order_invariant(op, order)
}
