//! `sort`: buffer all events and emit them sorted.
//!
//! Events of different schemas cannot share a batch, so each schema is
//! sorted on its own and the groups are emitted ordered by schema name.
//! The sort is stable.

use serde::{Deserialize, Serialize};
use sluice_core::diagnostics::Diagnostic;
use sluice_core::expr::Expression;
use sluice_core::schema::Schema;
use sluice_core::types::EventBatch;

use crate::adapter::{Describe, Rewrite, Stream, StreamFn};
use crate::control::ControlHandle;
use crate::error::OpError;
use crate::optimize::EventOrder;
use crate::registry::{OperatorSpec, Registry};
use crate::stream::Generator;
use crate::traits::BoxedOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub keys: Vec<String>,
    #[serde(default)]
    pub descending: bool,
}

impl Sort {
    pub fn new<I, S>(keys: I, descending: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            descending,
        }
    }

    pub fn boxed(self) -> BoxedOperator {
        Stream::boxed(self)
    }
}

impl Describe for Sort {
    fn name(&self) -> String {
        "sort".into()
    }

    /// Filtering commutes with a stable sort. Nothing downstream can see
    /// the input order of events within a schema after sorting, except
    /// through ties, so upstream may interleave schemas; if downstream does
    /// not care about order at all the sort is dropped.
    fn optimize(&self, filter: &Expression, order: EventOrder) -> Rewrite<Self> {
        if order == EventOrder::Unordered {
            return Rewrite {
                filter: Some(filter.clone()),
                order: EventOrder::Unordered,
                replacement: None,
            };
        }
        Rewrite {
            filter: Some(filter.clone()),
            order: EventOrder::Schema,
            replacement: Some(self.clone()),
        }
    }

    fn config(&self) -> Result<serde_json::Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl StreamFn for Sort {
    type Input = EventBatch;
    type Output = EventBatch;

    fn transform(
        &self,
        mut input: Generator<EventBatch>,
        ctrl: ControlHandle,
    ) -> Result<Generator<EventBatch>, OpError> {
        let logic = self.clone();
        let mut groups: Vec<(Schema, Vec<EventBatch>)> = Vec::new();
        let mut sorted: Option<std::vec::IntoIter<EventBatch>> = None;
        Ok(Box::new(std::iter::from_fn(move || {
            if let Some(out) = sorted.as_mut() {
                return out.next();
            }
            match input.next() {
                Some(batch) => {
                    if !batch.is_empty() {
                        match groups.iter_mut().find(|(s, _)| *s == batch.schema) {
                            Some((_, batches)) => batches.push(batch),
                            None => groups.push((batch.schema.clone(), vec![batch])),
                        }
                    }
                    Some(EventBatch::empty())
                }
                None => {
                    let mut out = logic.finish(std::mem::take(&mut groups), &ctrl);
                    let first = out.next();
                    sorted = Some(out);
                    first
                }
            }
        })))
    }
}

impl Sort {
    fn finish(
        &self,
        mut groups: Vec<(Schema, Vec<EventBatch>)>,
        ctrl: &ControlHandle,
    ) -> std::vec::IntoIter<EventBatch> {
        groups.sort_by(|(a, _), (b, _)| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.to_string().cmp(&b.to_string()))
        });
        let mut out = Vec::with_capacity(groups.len());
        for (schema, batches) in groups {
            match EventBatch::concat(&batches) {
                Ok(mut merged) => {
                    merged.sort_by_columns(&self.keys, self.descending);
                    out.push(merged);
                }
                Err(err) => Diagnostic::error(format!("cannot sort schema `{}`: {err}", schema.name))
                    .primary("sort", self.keys.join(", "))
                    .emit(ctrl.diagnostics()),
            }
        }
        out.into_iter()
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("sort", |spec: &OperatorSpec| {
        let sort = spec.parse::<Sort>()?;
        if sort.keys.is_empty() {
            return Err(OpError::config("sort", "at least one key is required"));
        }
        Ok(sort.boxed())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::stream::{generator, OperatorInput, OperatorOutput};
    use sluice_core::schema::{DataType, Field};
    use sluice_core::types::Scalar;

    fn batch(schema: &str, xs: &[i64]) -> EventBatch {
        let schema = Schema::new(schema, vec![Field::new("x", DataType::Int64, false)]);
        EventBatch::from_rows(schema, xs.iter().map(|x| vec![Scalar::I64(*x)]).collect()).unwrap()
    }

    fn values(b: &EventBatch) -> Vec<i64> {
        b.columns[0]
            .values
            .iter()
            .map(|v| match v {
                Scalar::I64(x) => *x,
                _ => panic!("unexpected value"),
            })
            .collect()
    }

    fn run(input: Vec<EventBatch>) -> Vec<EventBatch> {
        let op = Sort::new(["x"], false).boxed();
        let OperatorOutput::Events(out) = op
            .instantiate(
                OperatorInput::Events(generator(input.into_iter())),
                LocalControlPlane::shared("sort x"),
            )
            .unwrap()
        else {
            panic!("expected events");
        };
        out.collect()
    }

    #[test]
    fn yields_once_per_pull_then_sorted_groups() {
        let out = run(vec![batch("b", &[3, 1]), batch("a", &[2]), batch("b", &[0])]);
        assert_eq!(out.len(), 5);
        assert!(out[..3].iter().all(EventBatch::is_empty));
        assert_eq!(out[3].schema.name, "a");
        assert_eq!(values(&out[4]), vec![0, 1, 3]);
    }

    #[test]
    fn group_order_ignores_arrival_order() {
        let a = run(vec![batch("b", &[1]), batch("a", &[2])]);
        let b = run(vec![batch("a", &[2]), batch("b", &[1])]);
        assert_eq!(a, b);
    }

    #[test]
    fn optimize_relaxes_or_drops() {
        let op = Sort::new(["x"], true).boxed();
        let f: Expression = "x > 1".parse().unwrap();
        let keep = op.optimize(&f, EventOrder::Ordered);
        assert_eq!(keep.filter.as_ref(), Some(&f));
        assert_eq!(keep.order, EventOrder::Schema);
        assert!(keep.replacement.is_some());
        let drop = op.optimize(&f, EventOrder::Unordered);
        assert_eq!(drop.order, EventOrder::Unordered);
        assert!(drop.replacement.is_none());
    }

    #[test]
    fn requires_keys() {
        let spec = OperatorSpec::from_config("sort", serde_json::json!({"keys": []})).unwrap();
        assert!(crate::registry::builtins().make(&spec).is_err());
    }
}
