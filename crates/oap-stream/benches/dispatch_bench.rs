use criterion::{black_box, criterion_group, criterion_main, Criterion};
use oap_common::config::AnalysisConfig;
use oap_common::TimeBucket;
use oap_oal::{default_registry, FunctionContext, OalCompiler, ScriptSource, SourceEvent};
use oap_stream::{AnalysisEngine, InMemoryStorage};
use std::sync::Arc;
use tokio::runtime::Runtime;

const SCRIPT: &str = r#"
service_resp_time = from(Service.latency).longAvg();
service_sla = from(Service.*).percent(status == true);
service_cpm = from(Service.*).cpm();
service_percentile = from(Service.latency).percentile2(10);
service_apdex = from(Service.latency).apdex(name, status);
service_status_code = from(Service.*).filter(httpResponseStatusCode in [404, 500, 503]).labelCount(httpResponseStatusCode);
"#;

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let compiled = OalCompiler::new(
        Arc::new(default_registry().expect("Failed to build registry")),
        FunctionContext::default(),
    )
    .compile(&[ScriptSource::new("bench.oal", SCRIPT)])
    .expect("Failed to compile bench script");

    let engine = AnalysisEngine::new(
        &AnalysisConfig::default(),
        Arc::new(compiled),
        Arc::new(InMemoryStorage::new()),
    );

    let events: Vec<SourceEvent> = (0..64)
        .map(|i| {
            SourceEvent::new("Service", TimeBucket::minute(202_401_011_230).unwrap())
                .with("entityId", format!("svc-{}", i % 8))
                .with("name", format!("svc-{}", i % 8))
                .with("latency", 20 * i)
                .with("status", i % 5 != 0)
                .with("httpResponseStatusCode", if i % 7 == 0 { 500 } else { 200 })
        })
        .collect();

    c.bench_function("dispatch_service_event", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % events.len();
            engine.dispatch(black_box(&events[i])).unwrap();
        })
    });

    c.bench_function("flush_64_entities", |b| {
        b.iter(|| {
            for event in &events {
                engine.dispatch(event).unwrap();
            }
            rt.block_on(engine.flush()).unwrap();
        })
    });
}

criterion_group!(benches, bench_dispatch);
criterion_main!(benches);
