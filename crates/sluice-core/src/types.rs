//! Lightweight logical value/column containers for event batches.
//!
//! An `EventBatch` carries rows of exactly one schema in columnar form. The
//! representation is deliberately simple (`Vec<Scalar>` per column); it is
//! the contract between operators, not a performance format.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Null,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
            Scalar::Bin(_) => DataType::Binary,
        }
    }

    /// Rough in-memory size, used for byte accounting in metrics.
    pub fn approx_bytes(&self) -> u64 {
        match self {
            Scalar::Null => 0,
            Scalar::Bool(_) => 1,
            Scalar::I64(_) | Scalar::F64(_) => 8,
            Scalar::Str(s) => s.len() as u64,
            Scalar::Bin(b) => b.len() as u64,
        }
    }

    /// Comparison used by predicates. Numbers compare across int/double,
    /// everything else only within its own type. `None` means incomparable.
    pub fn partial_compare(&self, other: &Scalar) -> Option<Ordering> {
        use Scalar::*;
        match (self, other) {
            (Null, Null) => Some(Ordering::Equal),
            (Bool(a), Bool(b)) => Some(a.cmp(b)),
            (I64(a), I64(b)) => Some(a.cmp(b)),
            (F64(a), F64(b)) => a.partial_cmp(b),
            (I64(a), F64(b)) => (*a as f64).partial_cmp(b),
            (F64(a), I64(b)) => a.partial_cmp(&(*b as f64)),
            (Str(a), Str(b)) => Some(a.cmp(b)),
            (Bin(a), Bin(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::I64(i) => Value::from(*i),
            Scalar::F64(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Bin(b) => Value::Array(b.iter().map(|x| Value::from(*x)).collect()),
        }
    }

    /// Nested JSON values are kept as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::I64(i),
                None => Scalar::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Str(s.clone()),
            other => Scalar::Str(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A batch of events that all share one schema.
///
/// Invariant: `columns[i].name == schema.fields[i].name` and all columns have
/// the same length. A batch with zero rows is the "no-op" element operators
/// yield to hand control back without producing data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEventBatch")]
pub struct EventBatch {
    pub schema: Schema,
    pub columns: Vec<Column>,
}

/// Wire form of [`EventBatch`]; checked by [`EventBatch::new`] on the way in.
#[derive(Deserialize)]
struct RawEventBatch {
    schema: Schema,
    columns: Vec<Column>,
}

impl TryFrom<RawEventBatch> for EventBatch {
    type Error = Error;

    fn try_from(raw: RawEventBatch) -> Result<Self> {
        EventBatch::new(raw.schema, raw.columns)
    }
}

impl Default for EventBatch {
    fn default() -> Self {
        Self::empty()
    }
}

impl EventBatch {
    /// Build a batch, checking that columns line up with the schema.
    pub fn new(schema: Schema, columns: Vec<Column>) -> Result<Self> {
        if schema.fields.len() != columns.len() {
            return Err(Error::Schema(format!(
                "schema `{}` has {} fields but {} columns were given",
                schema.name,
                schema.fields.len(),
                columns.len()
            )));
        }
        for (field, column) in schema.fields.iter().zip(&columns) {
            if field.name != column.name {
                return Err(Error::Schema(format!(
                    "column `{}` does not match field `{}`",
                    column.name, field.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            if columns.iter().any(|c| c.len() != first.len()) {
                return Err(Error::Schema("columns have different lengths".into()));
            }
        }
        Ok(Self { schema, columns })
    }

    /// Build a batch from row-major values.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        let mut columns: Vec<Column> = schema
            .fields
            .iter()
            .map(|f| Column::new(f.name.clone(), Vec::with_capacity(rows.len())))
            .collect();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::Schema(format!(
                    "row {} has {} values, expected {}",
                    row_idx,
                    row.len(),
                    columns.len()
                )));
            }
            for (col, value) in columns.iter_mut().zip(row) {
                col.values.push(value);
            }
        }
        Self::new(schema, columns)
    }

    pub fn empty() -> Self {
        Self {
            schema: Schema::empty(),
            columns: vec![],
        }
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of one row in schema order.
    pub fn row(&self, idx: usize) -> Option<Vec<Scalar>> {
        if idx >= self.rows() {
            return None;
        }
        Some(self.columns.iter().map(|c| c.values[idx].clone()).collect())
    }

    pub fn approx_bytes(&self) -> u64 {
        self.columns
            .iter()
            .flat_map(|c| c.values.iter())
            .map(Scalar::approx_bytes)
            .sum()
    }

    /// Keep the rows whose mask entry is `true`.
    pub fn filter_rows(&self, mask: &[bool]) -> EventBatch {
        let columns = self
            .columns
            .iter()
            .map(|col| Column {
                name: col.name.clone(),
                values: col
                    .values
                    .iter()
                    .zip(mask)
                    .filter(|(_, keep)| **keep)
                    .map(|(v, _)| v.clone())
                    .collect(),
            })
            .collect();
        EventBatch {
            schema: self.schema.clone(),
            columns,
        }
    }

    /// Rows `[offset, offset + len)`, clamped to the batch.
    pub fn slice(&self, offset: usize, len: usize) -> EventBatch {
        let begin = offset.min(self.rows());
        let end = offset.saturating_add(len).min(self.rows());
        let columns = self
            .columns
            .iter()
            .map(|col| Column {
                name: col.name.clone(),
                values: col.values[begin..end].to_vec(),
            })
            .collect();
        EventBatch {
            schema: self.schema.clone(),
            columns,
        }
    }

    /// Concatenate batches of the same schema.
    pub fn concat(batches: &[EventBatch]) -> Result<EventBatch> {
        let Some(first) = batches.first() else {
            return Ok(EventBatch::empty());
        };
        let mut out = EventBatch {
            schema: first.schema.clone(),
            columns: first
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), Vec::new()))
                .collect(),
        };
        for batch in batches {
            if batch.schema != out.schema {
                return Err(Error::Schema(format!(
                    "cannot concat `{}` with `{}`",
                    out.schema.name, batch.schema.name
                )));
            }
            for (dst, src) in out.columns.iter_mut().zip(&batch.columns) {
                dst.values.extend(src.values.iter().cloned());
            }
        }
        Ok(out)
    }

    /// Sort rows by the specified columns (in order).
    ///
    /// Creates a vector of (sort_key_tuple, original_index), sorts it stably,
    /// then reorders all columns accordingly. Missing key columns sort as null.
    pub fn sort_by_columns(&mut self, sort_keys: &[String], descending: bool) {
        let num_rows = self.rows();
        if num_rows == 0 {
            return;
        }
        let key_indices: Vec<Option<usize>> = sort_keys
            .iter()
            .map(|key| self.columns.iter().position(|c| &c.name == key))
            .collect();

        let mut indices: Vec<(Vec<Scalar>, usize)> = (0..num_rows)
            .map(|row_idx| {
                let sort_tuple: Vec<Scalar> = key_indices
                    .iter()
                    .map(|idx| match idx {
                        Some(col_idx) => self.columns[*col_idx].values[row_idx].clone(),
                        None => Scalar::Null,
                    })
                    .collect();
                (sort_tuple, row_idx)
            })
            .collect();

        indices.sort_by(|(a, _), (b, _)| {
            let ord = scalar_tuple_cmp(a, b);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });

        for col in &mut self.columns {
            let original = std::mem::take(&mut col.values);
            col.values = indices
                .iter()
                .map(|(_, idx)| original[*idx].clone())
                .collect();
        }
    }

    /// Render each row as a JSON object.
    pub fn to_json_rows(&self) -> Vec<Map<String, Value>> {
        (0..self.rows())
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.values[row].to_json()))
                    .collect()
            })
            .collect()
    }

    /// Build batches from JSON objects.
    ///
    /// The schema of each object is inferred from its keys and value types;
    /// consecutive objects with the same inferred schema share one batch, so
    /// input order is preserved across the returned batches.
    pub fn from_json_rows<I>(schema_name: &str, rows: I) -> Vec<EventBatch>
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        let mut out: Vec<EventBatch> = Vec::new();
        for object in rows {
            let fields: Vec<Field> = object
                .iter()
                .map(|(k, v)| {
                    let dt = Scalar::from_json(v).data_type();
                    Field::new(k.clone(), dt, true)
                })
                .collect();
            let schema = Schema::new(schema_name, fields);
            let values: Vec<Scalar> = object.values().map(Scalar::from_json).collect();
            match out.last_mut() {
                Some(last) if last.schema == schema => {
                    for (col, v) in last.columns.iter_mut().zip(values) {
                        col.values.push(v);
                    }
                }
                _ => {
                    let columns = schema
                        .fields
                        .iter()
                        .zip(values)
                        .map(|(f, v)| Column::new(f.name.clone(), vec![v]))
                        .collect();
                    out.push(EventBatch { schema, columns });
                }
            }
        }
        out
    }
}

/// Compare two scalar tuples lexicographically for sorting.
fn scalar_tuple_cmp(a: &[Scalar], b: &[Scalar]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match scalar_cmp(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Total order for sorting: nulls first, numbers across int/double, NaN last
/// among numbers, mixed types by variant order.
fn scalar_cmp(a: &Scalar, b: &Scalar) -> Ordering {
    use Scalar::*;
    match (a, b) {
        (F64(x), F64(y)) => float_cmp(*x, *y),
        (I64(x), F64(y)) => float_cmp(*x as f64, *y),
        (F64(x), I64(y)) => float_cmp(*x, *y as f64),
        _ => match a.partial_compare(b) {
            Some(ord) => ord,
            None => scalar_type_order(a).cmp(&scalar_type_order(b)),
        },
    }
}

fn float_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Assign a numeric order to scalar types for mixed-type comparisons.
fn scalar_type_order(s: &Scalar) -> u8 {
    use Scalar::*;
    match s {
        Null => 0,
        Bool(_) => 1,
        I64(_) | F64(_) => 2,
        Str(_) => 3,
        Bin(_) => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn(rows: Vec<(i64, &str)>) -> EventBatch {
        let schema = Schema::new(
            "zeek.conn",
            vec![
                Field::new("port", DataType::Int64, false),
                Field::new("host", DataType::Utf8, false),
            ],
        );
        let rows = rows
            .into_iter()
            .map(|(p, h)| vec![Scalar::I64(p), Scalar::Str(h.into())])
            .collect();
        EventBatch::from_rows(schema, rows).unwrap()
    }

    #[test]
    fn new_rejects_misaligned_columns() {
        let schema = Schema::new("x", vec![Field::new("a", DataType::Int64, false)]);
        let err = EventBatch::new(schema, vec![Column::new("b", vec![])]).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn filter_and_slice() {
        let batch = conn(vec![(80, "a"), (443, "b"), (22, "c")]);
        let kept = batch.filter_rows(&[true, false, true]);
        assert_eq!(kept.rows(), 2);
        assert_eq!(kept.row(1).unwrap()[0], Scalar::I64(22));
        let tail = batch.slice(1, 10);
        assert_eq!(tail.rows(), 2);
        assert!(batch.slice(5, 1).is_empty());
    }

    #[test]
    fn sort_is_stable_and_respects_direction() {
        let mut batch = conn(vec![(443, "a"), (22, "b"), (443, "c")]);
        batch.sort_by_columns(&["port".to_string()], false);
        let hosts: Vec<_> = batch.columns[1].values.clone();
        assert_eq!(
            hosts,
            vec![
                Scalar::Str("b".into()),
                Scalar::Str("a".into()),
                Scalar::Str("c".into())
            ]
        );
        batch.sort_by_columns(&["port".to_string()], true);
        assert_eq!(batch.columns[0].values[0], Scalar::I64(443));
    }

    #[test]
    fn concat_requires_same_schema() {
        let a = conn(vec![(1, "a")]);
        let b = conn(vec![(2, "b")]);
        assert_eq!(EventBatch::concat(&[a.clone(), b]).unwrap().rows(), 2);
        let other = EventBatch::from_rows(
            Schema::new("other", vec![Field::new("x", DataType::Int64, false)]),
            vec![vec![Scalar::I64(1)]],
        )
        .unwrap();
        assert!(EventBatch::concat(&[a, other]).is_err());
    }

    #[test]
    fn json_rows_group_consecutive_schemas() {
        let rows = vec![
            json!({"a": 1, "b": "x"}),
            json!({"a": 2, "b": "y"}),
            json!({"c": true}),
            json!({"a": 3, "b": "z"}),
        ];
        let rows = rows.into_iter().map(|v| v.as_object().unwrap().clone());
        let batches = EventBatch::from_json_rows("json", rows);
        let sizes: Vec<_> = batches.iter().map(EventBatch::rows).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
        assert_eq!(batches[0].schema, batches[2].schema);
        assert_eq!(batches[0].to_json_rows()[1]["b"], json!("y"));
    }

    #[test]
    fn deserialization_checks_columns_against_schema() {
        let batch = conn(vec![(80, "a"), (443, "b")]);
        let mut value = serde_json::to_value(&batch).unwrap();
        assert_eq!(serde_json::from_value::<EventBatch>(value.clone()).unwrap(), batch);

        value["columns"].as_array_mut().unwrap().pop();
        assert!(serde_json::from_value::<EventBatch>(value).is_err());

        let mut ragged = serde_json::to_value(&batch).unwrap();
        ragged["columns"][1]["values"].as_array_mut().unwrap().pop();
        let err = serde_json::from_value::<EventBatch>(ragged).unwrap_err();
        assert!(err.to_string().contains("different lengths"), "{err}");
    }
}
