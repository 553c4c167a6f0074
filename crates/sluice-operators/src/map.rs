//! `rename`: rename event fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sluice_core::expr::Expression;
use sluice_core::schema::Schema;
use sluice_core::types::{Column, EventBatch};

use crate::adapter::{Describe, Map, MapFn, Rewrite};
use crate::control::ControlPlane;
use crate::error::OpError;
use crate::optimize::EventOrder;
use crate::registry::{OperatorSpec, Registry};
use crate::traits::BoxedOperator;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rename {
    /// Field rename map: old_name -> new_name
    pub fields: BTreeMap<String, String>,
}

impl Rename {
    pub fn new<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn boxed(self) -> BoxedOperator {
        Map::boxed(self)
    }

    fn target<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields.get(name).map(String::as_str).unwrap_or(name)
    }
}

impl Describe for Rename {
    fn name(&self) -> String {
        "rename".into()
    }

    fn optimize(&self, _filter: &Expression, order: EventOrder) -> Rewrite<Self> {
        Rewrite::order_invariant(self, order)
    }

    fn config(&self) -> Result<serde_json::Value, OpError> {
        Ok(serde_json::to_value(self).map_err(sluice_core::error::Error::from)?)
    }
}

impl MapFn for Rename {
    type Input = EventBatch;
    type Output = EventBatch;

    fn apply(&self, input: EventBatch, _ctrl: &dyn ControlPlane) -> EventBatch {
        // If no renames, pass through
        if self.fields.is_empty() || input.is_empty() {
            return input;
        }

        let mut schema: Schema = input.schema;
        for field in &mut schema.fields {
            field.name = self.target(&field.name).to_string();
        }
        let columns = input
            .columns
            .into_iter()
            .map(|col| Column {
                name: self.target(&col.name).to_string(),
                values: col.values,
            })
            .collect();
        EventBatch { schema, columns }
    }
}

pub(crate) fn register(registry: &mut Registry) {
    registry.register("rename", |spec: &OperatorSpec| {
        Ok(spec.parse::<Rename>()?.boxed())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::LocalControlPlane;
    use crate::traits::Operator;
    use sluice_core::schema::{DataType, Field};
    use sluice_core::types::Scalar;

    #[test]
    fn renames_schema_and_columns() {
        let schema = Schema::new(
            "conn",
            vec![
                Field::new("src", DataType::Utf8, false),
                Field::new("n", DataType::Int64, false),
            ],
        );
        let batch = EventBatch::from_rows(
            schema,
            vec![vec![Scalar::Str("a".into()), Scalar::I64(1)]],
        )
        .unwrap();
        let rename = Rename::new([("src", "source")]);
        let ctrl = LocalControlPlane::new("rename");
        let out = rename.apply(batch, &ctrl);
        assert_eq!(out.schema.fields[0].name, "source");
        assert_eq!(out.columns[0].name, "source");
        assert_eq!(out.columns[1].name, "n");
        assert_eq!(out.schema.name, "conn");
    }

    #[test]
    fn is_order_invariant() {
        let op = Rename::new([("a", "b")]).boxed();
        let res = op.optimize(&"b == 1".parse().unwrap(), EventOrder::Unordered);
        assert!(res.filter.is_none());
        assert_eq!(res.order, EventOrder::Unordered);
        assert_eq!(res.replacement.map(|r| r.name()).as_deref(), Some("rename"));
    }

    #[test]
    fn config_round_trip() {
        let op = Rename::new([("a", "b")]).boxed();
        let spec = op.spec().unwrap();
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            serde_json::json!({"op": "rename", "fields": {"a": "b"}})
        );
    }
}
