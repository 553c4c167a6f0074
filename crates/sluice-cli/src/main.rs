//! sluice CLI: run, validate, and explain YAML pipelines.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use sluice_core::config::{ConfigOverrides, EngineConfig};
use sluice_core::manifest::RunOutcome;
use sluice_exec::Engine;
use sluice_operators::{Operator, OperatorExt};
use sluice_pipeline::{parse_yaml_pipeline, ParsedPipeline};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "sluice: streaming pipelines of composable operators", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline from a YAML file
    Run {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        #[command(flatten)]
        overrides: EngineFlags,

        /// Write the run manifest as JSON to this path
        #[arg(long)]
        manifest: Option<PathBuf>,
    },

    /// Validate a pipeline YAML file (syntax, operators, and types)
    Validate {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Show the pipeline as it would be executed
    Explain {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        #[command(flatten)]
        overrides: EngineFlags,
    },
}

/// Engine settings that take precedence over the environment and the
/// pipeline's `config:` block.
#[derive(Args, Debug, Default)]
struct EngineFlags {
    /// Skip predicate and order pushdown
    #[arg(long)]
    no_optimize: bool,

    /// Abandon the run after this many steps
    #[arg(long)]
    max_steps: Option<u64>,

    /// Queue bound between detached operators and the executor
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log filter, e.g. `debug` or `sluice_exec=trace`
    #[arg(long)]
    log: Option<String>,
}

impl EngineFlags {
    fn to_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            optimize: self.no_optimize.then_some(false),
            detached_queue_capacity: self.queue_capacity,
            max_steps: self.max_steps,
            idle_backoff_us: None,
            log_filter: self.log.clone(),
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            pipeline,
            overrides,
            manifest,
        } => run_pipeline(&pipeline, &overrides, manifest.as_deref()),
        Commands::Validate { pipeline } => validate_pipeline(&pipeline),
        Commands::Explain {
            pipeline,
            overrides,
        } => explain_pipeline(&pipeline, &overrides),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load(path: &Path) -> Result<ParsedPipeline, Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(path)?;
    Ok(parse_yaml_pipeline(&yaml_content)?)
}

/// Environment first, then the pipeline's `config:` block, then CLI flags.
fn resolve_config(doc: &ConfigOverrides, flags: &EngineFlags) -> EngineConfig {
    let mut config = EngineConfig::from_env();
    config.apply(doc);
    config.apply(&flags.to_overrides());
    config
}

fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    // a second init (e.g. in tests) is not an error worth reporting
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
}

fn run_pipeline(
    pipeline_path: &Path,
    flags: &EngineFlags,
    manifest_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;
    let config = resolve_config(&parsed.config, flags);
    init_tracing(&config.log_filter);
    tracing::debug!(?config, "resolved engine config");

    let engine = Engine::new(config);
    let manifest = engine.run(&parsed.pipeline)?;

    if let Some(path) = manifest_path {
        fs::write(path, serde_json::to_vec_pretty(&manifest)?)?;
    }

    eprintln!("Run {} finished: {:?}", manifest.run_id, manifest.outcome);
    eprintln!("  Duration: {}ms", manifest.duration_ms());
    eprintln!("  Steps: {}", manifest.steps);
    if let Some(hash) = &manifest.pipeline_hash {
        eprintln!("  Pipeline hash: {}", hash.short());
    }
    for metric in manifest.metrics.iter().filter(|m| !m.internal) {
        eprintln!(
            "  {:>2}. {:<12} in: {} {}  out: {} {}",
            metric.operator_index,
            metric.operator_name,
            metric.inbound.num_elements,
            metric.inbound.unit,
            metric.outbound.num_elements,
            metric.outbound.unit,
        );
    }

    match (manifest.outcome, manifest.error) {
        (RunOutcome::Failed, Some(error)) => Err(error.into()),
        (RunOutcome::Failed, None) => Err("pipeline run failed".into()),
        _ => Ok(()),
    }
}

fn validate_pipeline(pipeline_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;
    parsed
        .pipeline
        .infer_type(sluice_core::kind::BatchKind::Void)?;
    println!("✓ Pipeline is valid");
    if !parsed.pipeline.is_closed() {
        println!("  note: the pipeline is not closed and cannot be run on its own");
    }
    Ok(())
}

fn explain_pipeline(
    pipeline_path: &Path,
    flags: &EngineFlags,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;
    let config = resolve_config(&parsed.config, flags);
    let engine = Engine::new(config);
    let pipeline = &parsed.pipeline;
    let prepared = engine.prepare(pipeline);

    println!("Pipeline");
    println!("========");
    println!();
    println!("Definition: {pipeline}");
    if engine.config().optimize {
        println!("Optimized:  {prepared}");
    }
    println!("Closed:     {}", prepared.is_closed());
    let location = prepared
        .infer_location()
        .map(|l| l.to_string())
        .unwrap_or_else(|| "conflict (local and remote)".into());
    println!("Location:   {location}");
    let sig = prepared.infer_signature();
    println!(
        "Signature:  source={} transformation={} sink={}",
        sig.source, sig.transformation, sig.sink
    );
    println!();
    println!("Operators:");
    for (i, op) in prepared.operators().iter().enumerate() {
        let mut flags = Vec::new();
        if op.detached() {
            flags.push("detached");
        }
        if op.internal() {
            flags.push("internal");
        }
        println!(
            "  {}. {} [{}]{}",
            i + 1,
            op.name(),
            op.location(),
            if flags.is_empty() {
                String::new()
            } else {
                format!(" ({})", flags.join(", "))
            }
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_config_overrides_defaults() {
        let doc = ConfigOverrides {
            max_steps: Some(100),
            detached_queue_capacity: Some(4),
            ..Default::default()
        };
        let config = resolve_config(&doc, &EngineFlags::default());
        assert_eq!(config.max_steps, Some(100));
        assert_eq!(config.detached_queue_capacity, 4);
    }

    #[test]
    fn cli_flags_take_precedence_over_pipeline_config() {
        let doc = ConfigOverrides {
            max_steps: Some(100),
            optimize: Some(true),
            ..Default::default()
        };
        let flags = EngineFlags {
            no_optimize: true,
            max_steps: Some(5),
            ..Default::default()
        };
        let config = resolve_config(&doc, &flags);
        assert_eq!(config.max_steps, Some(5));
        assert!(!config.optimize);
    }

    #[test]
    fn runs_a_yaml_pipeline_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.ndjson");
        let yaml = format!(
            r#"
steps:
  - op: from_events
    schema: user
    events:
      - {{ id: 1, name: "a" }}
      - {{ id: 2, name: "b" }}
  - op: where
    expr: "id == 2"
  - op: write_json
  - op: save_file
    path: "{}"
"#,
            out.display()
        );
        let yaml_path = dir.path().join("pipeline.yaml");
        fs::write(&yaml_path, yaml).unwrap();
        let manifest_path = dir.path().join("manifest.json");

        run_pipeline(&yaml_path, &EngineFlags::default(), Some(&manifest_path)).unwrap();

        let written = fs::read_to_string(&out).unwrap();
        assert_eq!(written.lines().count(), 1);
        assert!(written.contains("\"b\""));
        let manifest: serde_json::Value =
            serde_json::from_slice(&fs::read(&manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["outcome"], "completed");
    }
}
