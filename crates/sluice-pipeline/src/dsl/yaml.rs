//! YAML pipeline definitions.
//!
//! Example:
//! ```yaml
//! config:
//!   optimize: true
//! steps:
//!   - op: load_file
//!     path: "data/flows.ndjson"
//!   - op: read_json
//!     schema: flow
//!   - op: where
//!     expr: 'port > 1024 && proto == "tcp"'
//!   - op: write_json
//!   - op: save_file
//!     path: "out/filtered.ndjson"
//! ```
//!
//! Each step is an operator spec: the operator name under `op`, its
//! configuration next to it.

use serde::{Deserialize, Serialize};
use sluice_core::config::ConfigOverrides;
use sluice_operators::{OperatorSpec, Registry};

use crate::error::{PipelineError, Result};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigOverrides>,
    pub steps: Vec<OperatorSpec>,
}

#[derive(Debug, Clone)]
pub struct ParsedPipeline {
    pub pipeline: Pipeline,
    pub config: ConfigOverrides,
}

/// Parse a YAML document using the builtin operators.
pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<ParsedPipeline> {
    parse_yaml_pipeline_with(yaml_src, sluice_operators::builtins())
}

pub fn parse_yaml_pipeline_with(yaml_src: &str, registry: &Registry) -> Result<ParsedPipeline> {
    let doc: PipelineDoc = serde_yaml::from_str(yaml_src)?;
    if doc.steps.is_empty() {
        return Err(PipelineError::Invalid("pipeline has no steps".into()));
    }
    let pipeline = Pipeline::from_specs(&doc.steps, registry)?;
    Ok(ParsedPipeline {
        pipeline,
        config: doc.config.unwrap_or_default(),
    })
}

/// Render `pipeline` as a YAML document. Fails if an operator cannot be
/// serialized.
pub fn to_yaml(pipeline: &Pipeline, config: Option<&ConfigOverrides>) -> Result<String> {
    let doc = PipelineDoc {
        config: config.cloned(),
        steps: pipeline.to_specs()?,
    };
    Ok(serde_yaml::to_string(&doc)?)
}
