//! `from_events`: emit a fixed list of events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sluice_core::expr::Expression;
use sluice_core::types::EventBatch;

use crate::adapter::{Describe, Rewrite, Source, SourceFn};
use crate::control::ControlHandle;
use crate::error::OpError;
use crate::optimize::EventOrder;
use crate::registry::{OperatorSpec, Registry};
use crate::stream::Generator;
use crate::traits::BoxedOperator;

/// Emits its batches in order, each filtered by `filter`.
///
/// Accepts predicate pushdown: a downstream filter is evaluated here, so
/// the rows it rejects are never emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FromEvents {
    pub batches: Vec<EventBatch>,
    pub filter: Expression,
}

fn default_schema() -> String {
    "event".into()
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Config {
    Batches {
        batches: Vec<EventBatch>,
        #[serde(default, skip_serializing_if = "Expression::is_trivially_true")]
        filter: Expression,
    },
    Rows {
        #[serde(default = "default_schema")]
        schema: String,
        events: Vec<Map<String, Value>>,
        #[serde(default)]
        filter: Expression,
    },
}

impl FromEvents {
    pub fn new(batches: Vec<EventBatch>) -> Self {
        Self {
            batches,
            filter: Expression::trivially_true(),
        }
    }

    /// Events given as JSON objects; schemas are inferred per object.
    pub fn from_json(schema: &str, events: Vec<Map<String, Value>>) -> Self {
        Self::new(EventBatch::from_json_rows(schema, events))
    }

    pub fn boxed(self) -> BoxedOperator {
        Source::boxed(self)
    }
}

impl Describe for FromEvents {
    fn name(&self) -> String {
        "from_events".into()
    }

    fn optimize(&self, filter: &Expression, _order: EventOrder) -> Rewrite<Self> {
        Rewrite {
            filter: Some(Expression::trivially_true()),
            order: EventOrder::Ordered,
            replacement: Some(Self {
                batches: self.batches.clone(),
                filter: Expression::and(self.filter.clone(), filter.clone()),
            }),
        }
    }

    fn input_independent(&self) -> bool {
        true
    }

    fn config(&self) -> Result<Value, OpError> {
        let config = Config::Batches {
            batches: self.batches.clone(),
            filter: self.filter.clone(),
        };
        Ok(serde_json::to_value(config).map_err(sluice_core::error::Error::from)?)
    }
}

impl SourceFn for FromEvents {
    type Output = EventBatch;

    fn produce(&self, _ctrl: ControlHandle) -> Result<Generator<EventBatch>, OpError> {
        let filter = self.filter.clone();
        let batches = self.batches.clone();
        Ok(Box::new(
            batches.into_iter().map(move |batch| filter.filter(&batch)),
        ))
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("from_events", |spec: &OperatorSpec| {
        let op = match spec.parse::<Config>()? {
            Config::Batches { batches, filter } => FromEvents { batches, filter },
            Config::Rows {
                schema,
                events,
                filter,
            } => FromEvents {
                filter,
                ..FromEvents::from_json(&schema, events)
            },
        };
        Ok(op.boxed())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::{OperatorInput, OperatorOutput};
    use serde_json::json;

    fn rows(values: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(values).unwrap()
    }

    fn collect(op: &BoxedOperator) -> Vec<Map<String, Value>> {
        let OperatorOutput::Events(out) = op
            .instantiate(OperatorInput::Void, LocalControlPlane::shared("from_events"))
            .unwrap()
        else {
            panic!("expected events");
        };
        out.flat_map(|b| b.to_json_rows()).collect()
    }

    #[test]
    fn absorbs_pushed_filter() {
        let src = FromEvents::from_json(
            "flow",
            rows(json!([{"port": 80}, {"port": 443}, {"port": 8080}])),
        )
        .boxed();
        let res = src.optimize(&"port > 100".parse().unwrap(), EventOrder::Unordered);
        assert_eq!(res.filter, Some(Expression::trivially_true()));
        assert_eq!(res.order, EventOrder::Ordered);
        let replacement = res.replacement.unwrap();
        assert_eq!(collect(&replacement), rows(json!([{"port": 443}, {"port": 8080}])));
        assert_eq!(collect(&src).len(), 3);
    }

    #[test]
    fn accepts_rows_or_batches() {
        let spec = OperatorSpec::from_config(
            "from_events",
            json!({"schema": "s", "events": [{"a": 1}, {"a": 2}], "filter": "a == 2"}),
        )
        .unwrap();
        let op = crate::registry::builtins().make(&spec).unwrap();
        assert_eq!(collect(&op), rows(json!([{"a": 2}])));

        let again = crate::registry::builtins().make(&op.spec().unwrap()).unwrap();
        assert_eq!(collect(&again), rows(json!([{"a": 2}])));
    }

    #[test]
    fn rejects_misaligned_batches() {
        let batch = EventBatch::from_json_rows("s", rows(json!([{"x": 1, "y": 2}]))).remove(0);
        let mut config = json!({"batches": [batch], "filter": "y == 2"});
        config["batches"][0]["columns"].as_array_mut().unwrap().pop();
        let spec = OperatorSpec::from_config("from_events", config).unwrap();
        let err = crate::registry::builtins().make(&spec).unwrap_err();
        assert!(matches!(err, OpError::Config { .. }), "{err}");
    }
}
