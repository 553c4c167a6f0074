//! End-to-end integration tests

use std::fs;
use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use sluice_core::config::EngineConfig;
use sluice_core::manifest::RunOutcome;
use sluice_core::types::EventBatch;
use sluice_exec::{Engine, ExecError, LocalExecutor};
use sluice_operators::file::{LoadFile, SaveFile};
use sluice_operators::filter::Where;
use sluice_operators::json::{ReadJson, WriteJson};
use sluice_operators::sort::Sort;
use sluice_operators::source::FromEvents;
use sluice_operators::{from_map, BoxedOperator};
use sluice_pipeline::Pipeline;

type Rows = Arc<Mutex<Vec<Map<String, Value>>>>;

fn object(v: Value) -> Map<String, Value> {
    match v {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// e1 and e2 share schema `s1`; e3 has schema `s2`.
fn scenario_source() -> BoxedOperator {
    let mut batches = EventBatch::from_json_rows(
        "s1",
        vec![
            object(json!({"field": "x", "n": 1})),
            object(json!({"field": "y", "n": 2})),
        ],
    );
    batches.extend(EventBatch::from_json_rows(
        "s2",
        vec![object(json!({"field": "x", "flag": true}))],
    ));
    FromEvents::new(batches).boxed()
}

fn collect(rows: Rows) -> BoxedOperator {
    from_map("collect", move |batch: EventBatch| {
        rows.lock().unwrap().extend(batch.to_json_rows());
    })
}

fn run_scenario(optimize: bool) -> (Pipeline, Vec<Map<String, Value>>) {
    let rows: Rows = Arc::default();
    let pipeline = Pipeline::new([
        scenario_source(),
        Where::boxed(r#"field == "x""#.parse().unwrap()),
        collect(rows.clone()),
    ]);
    let engine = Engine::new(EngineConfig {
        optimize,
        ..Default::default()
    });
    let executed = engine.prepare(&pipeline);
    let manifest = engine.run(&pipeline).unwrap();
    assert_eq!(manifest.outcome, RunOutcome::Completed);
    let out = rows.lock().unwrap().clone();
    (executed, out)
}

#[test]
fn optimization_is_observationally_transparent() {
    let (plain, plain_rows) = run_scenario(false);
    let (optimized, optimized_rows) = run_scenario(true);

    let names = |p: &Pipeline| p.operators().iter().map(|op| op.name()).collect::<Vec<_>>();
    assert_eq!(names(&plain), ["from_events", "where", "collect"]);
    // the filter moved into the source
    assert_eq!(names(&optimized), ["from_events", "collect"]);

    assert_eq!(plain_rows, optimized_rows);
    assert_eq!(
        plain_rows,
        vec![
            object(json!({"field": "x", "n": 1})),
            object(json!({"field": "x", "flag": true})),
        ]
    );
}

#[test]
fn open_pipelines_are_rejected_before_running() {
    let source_only = Pipeline::new([scenario_source()]);
    assert!(matches!(
        Engine::default().run(&source_only),
        Err(ExecError::NotClosed(_))
    ));
    assert!(matches!(
        LocalExecutor::new(source_only, &EngineConfig::default()),
        Err(ExecError::NotClosed(_))
    ));
}

#[test]
fn file_to_file_with_detached_operators() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.ndjson");
    let output = dir.path().join("out.ndjson");
    fs::write(
        &input,
        "{\"port\": 443, \"host\": \"b\"}\n\
         {\"port\": 22, \"host\": \"a\"}\n\
         not json\n\
         {\"port\": 8080, \"host\": \"c\"}\n",
    )
    .unwrap();

    let pipeline = Pipeline::new([
        LoadFile {
            path: input.clone(),
            chunk_size: 16,
        }
        .boxed(),
        ReadJson::default().boxed(),
        Where::boxed("port > 100".parse().unwrap()),
        Sort::new(["port"], false).boxed(),
        WriteJson::default().boxed(),
        SaveFile::new(&output).boxed(),
    ]);
    let engine = Engine::new(EngineConfig {
        detached_queue_capacity: 2,
        ..Default::default()
    });
    let manifest = engine.run(&pipeline).unwrap();
    assert_eq!(manifest.outcome, RunOutcome::Completed, "{:?}", manifest.error);
    assert!(manifest.pipeline_hash.is_some());

    let written: Vec<Value> = fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(
        written,
        vec![
            json!({"port": 443, "host": "b"}),
            json!({"port": 8080, "host": "c"}),
        ]
    );

    let load = &manifest.metrics[0];
    assert_eq!(load.operator_name, "load_file");
    assert!(load.outbound.num_elements > 0);
}

#[test]
fn missing_input_file_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new([
        LoadFile::new(dir.path().join("absent")).boxed(),
        Box::new(sluice_operators::sink::Discard) as BoxedOperator,
    ]);
    let manifest = Engine::default().run(&pipeline).unwrap();
    assert_eq!(manifest.outcome, RunOutcome::Failed);
    assert!(manifest.error.is_some());
}

#[test]
fn step_limit_is_recorded_as_abandoned() {
    let rows: Rows = Arc::default();
    let batches = (0..50)
        .flat_map(|i| EventBatch::from_json_rows("n", vec![object(json!({ "i": i }))]))
        .collect();
    let pipeline = Pipeline::new([FromEvents::new(batches).boxed(), collect(rows.clone())]);
    let engine = Engine::new(EngineConfig {
        max_steps: Some(5),
        ..Default::default()
    });
    let manifest = engine.run(&pipeline).unwrap();
    assert_eq!(manifest.outcome, RunOutcome::Abandoned);
    assert_eq!(manifest.steps, 5);
    assert!(rows.lock().unwrap().len() <= 5);
}
