use criterion::{criterion_group, criterion_main, Criterion};
use sluice_core::config::EngineConfig;
use sluice_core::schema::{DataType, Field, Schema};
use sluice_core::types::{EventBatch, Scalar};
use sluice_exec::Engine;
use sluice_operators::filter::Where;
use sluice_operators::map::Rename;
use sluice_operators::sink::Discard;
use sluice_operators::source::FromEvents;
use sluice_operators::BoxedOperator;
use sluice_pipeline::Pipeline;

fn make_batches(batches: usize, rows: usize) -> Vec<EventBatch> {
    let schema = Schema::new(
        "flow",
        vec![
            Field::new("port", DataType::Int64, false),
            Field::new("proto", DataType::Utf8, false),
        ],
    );
    (0..batches)
        .map(|b| {
            let rows = (0..rows)
                .map(|i| {
                    let proto = if i % 3 == 0 { "udp" } else { "tcp" };
                    vec![
                        Scalar::I64(((b * rows + i) % 65536) as i64),
                        Scalar::Str(proto.into()),
                    ]
                })
                .collect();
            EventBatch::from_rows(schema.clone(), rows).unwrap()
        })
        .collect()
}

fn flow_pipeline(batches: Vec<EventBatch>) -> Pipeline {
    Pipeline::new([
        FromEvents::new(batches).boxed(),
        Rename::new([("proto", "protocol")]).boxed(),
        Where::boxed(r#"port > 1024 && protocol == "tcp""#.parse().unwrap()),
        Box::new(Discard) as BoxedOperator,
    ])
}

fn bench_filter_pipeline(c: &mut Criterion) {
    let pipeline = flow_pipeline(make_batches(64, 1024));
    let mut group = c.benchmark_group("filter_pipeline");
    for optimize in [false, true] {
        let engine = Engine::new(EngineConfig {
            optimize,
            ..Default::default()
        });
        let name = if optimize { "optimized" } else { "plain" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let manifest = engine.run(&pipeline).unwrap();
                assert!(manifest.error.is_none());
            })
        });
    }
    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let pipeline = flow_pipeline(make_batches(1, 16));
    c.bench_function("optimize_if_closed", |b| {
        b.iter(|| pipeline.optimize_if_closed())
    });
}

criterion_group!(pipelines, bench_filter_pipeline, bench_optimize);
criterion_main!(pipelines);
