//! Operator (de)serialization.
//!
//! An operator serializes to an [`OperatorSpec`]: its name under `op` and
//! its configuration flattened next to it, e.g.
//! `{"op": "where", "expr": "port > 1024"}`. The [`Registry`] maps names
//! back to constructors.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OpError;
use crate::traits::BoxedOperator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSpec {
    pub op: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl OperatorSpec {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            config: Map::new(),
        }
    }

    /// Build from a configuration value, which must be an object or null.
    pub fn from_config(op: impl Into<String>, config: Value) -> Result<Self, OpError> {
        let op = op.into();
        match config {
            Value::Object(config) => Ok(Self { op, config }),
            Value::Null => Ok(Self::new(op)),
            other => Err(OpError::config(
                op,
                format!("configuration must be an object, got `{other}`"),
            )),
        }
    }

    /// Deserialize the configuration into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, OpError> {
        serde_json::from_value(Value::Object(self.config.clone()))
            .map_err(|e| OpError::config(&self.op, e))
    }
}

pub type Factory = fn(&OperatorSpec) -> Result<BoxedOperator, OpError>;

#[derive(Clone, Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing every builtin operator.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::source::register(&mut registry);
        crate::filter::register(&mut registry);
        crate::map::register(&mut registry);
        crate::pass::register(&mut registry);
        crate::head::register(&mut registry);
        crate::sort::register(&mut registry);
        crate::json::register(&mut registry);
        crate::file::register(&mut registry);
        crate::sink::register(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, factory: Factory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn make(&self, spec: &OperatorSpec) -> Result<BoxedOperator, OpError> {
        let factory = self
            .factories
            .get(&spec.op)
            .ok_or_else(|| OpError::UnknownOperator(spec.op.clone()))?;
        factory(spec)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

static BUILTINS: Lazy<Registry> = Lazy::new(Registry::with_builtins);

/// Shared registry of builtin operators.
pub fn builtins() -> &'static Registry {
    &BUILTINS
}
