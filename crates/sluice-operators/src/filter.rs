//! `where`: keep the events matching an expression.
//!
//! Fields the expression names but a schema lacks evaluate as null; the
//! first batch of such a schema triggers a warning.

use serde::{Deserialize, Serialize};
use sluice_core::diagnostics::Diagnostic;
use sluice_core::expr::{Expression, Resolved};
use sluice_core::schema::Schema;
use sluice_core::types::EventBatch;

use crate::adapter::{Describe, Rewrite};
use crate::control::ControlPlane;
use crate::error::OpError;
use crate::optimize::EventOrder;
use crate::registry::{OperatorSpec, Registry};
use crate::schematic::{Schematic, SchematicFn};
use crate::traits::BoxedOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Where {
    pub expr: Expression,
}

impl Where {
    pub fn new(expr: Expression) -> Self {
        Self { expr }
    }

    pub fn boxed(expr: Expression) -> BoxedOperator {
        Schematic::boxed(Self::new(expr))
    }
}

impl Describe for Where {
    fn name(&self) -> String {
        "where".into()
    }

    /// Absorbed into the filter pushed upstream.
    fn optimize(&self, filter: &Expression, order: EventOrder) -> Rewrite<Self> {
        Rewrite {
            filter: Some(Expression::and(self.expr.clone(), filter.clone())),
            order,
            replacement: None,
        }
    }

    fn config(&self) -> Result<serde_json::Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl SchematicFn for Where {
    type State = Resolved;
    type Output = EventBatch;

    fn initialize(&self, schema: &Schema, ctrl: &dyn ControlPlane) -> Result<Resolved, OpError> {
        let resolved = self.expr.resolve(schema);
        for field in resolved.unresolved_fields() {
            Diagnostic::warning(format!(
                "field `{field}` does not exist in schema `{}`",
                schema.name
            ))
            .primary(format!("where {}", self.expr), "evaluates as null")
            .emit(ctrl.diagnostics());
        }
        Ok(resolved)
    }

    fn process(&self, batch: EventBatch, state: &mut Resolved) -> EventBatch {
        let mask = state.evaluate(&batch);
        batch.filter_rows(&mask)
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("where", |spec: &OperatorSpec| {
        Ok(Where::boxed(spec.parse::<Where>()?.expr))
    });
}
