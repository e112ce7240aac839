//! Send-path throughput benchmarks
//!
//! Measures synchronous broadcast delivery across subscriber counts and the
//! uncontended lock acquire/release cycle.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use sutra::{AgentId, CommHub, HubConfig, MessageHandler, ResourceName, TopicName};
use tokio::runtime::Runtime;

fn bench_hub(subscribers: usize) -> (Arc<CommHub>, TopicName, AgentId) {
    let config = HubConfig::builder()
        .enable_sweep(false)
        .max_history(64)
        .build()
        .unwrap();
    let hub = Arc::new(CommHub::new(config));
    let topic = TopicName::try_new("bench").unwrap();

    for index in 0..subscribers {
        let subscriber = AgentId::try_new(format!("sub-{index}")).unwrap();
        let handler: MessageHandler = Arc::new(|envelope| {
            black_box(&envelope.payload);
        });
        hub.subscribe(&subscriber, &topic, handler).unwrap();
    }
    let sender = AgentId::try_new("bench-sender").unwrap();
    (hub, topic, sender)
}

fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("broadcast");

    for subscribers in [1usize, 8, 64] {
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(
            BenchmarkId::new("subscribers", subscribers),
            &subscribers,
            |b, &subscribers| {
                let _guard = rt.enter();
                let (hub, topic, sender) = bench_hub(subscribers);
                b.iter(|| {
                    hub.broadcast(&sender, &topic, json!({"n": 1})).unwrap();
                });
                hub.destroy();
            },
        );
    }
    group.finish();
}

fn bench_lock_cycle(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("uncontended_lock_cycle", |b| {
        let _guard = rt.enter();
        let (hub, _, _) = bench_hub(0);
        let resource = ResourceName::try_new("bench-lock").unwrap();
        let agent = AgentId::try_new("bench-agent").unwrap();

        b.iter(|| {
            rt.block_on(async {
                hub.locks().acquire(&resource, &agent, None).await.unwrap();
            });
            hub.locks().release(&resource, &agent).unwrap();
        });
        hub.destroy();
    });
}

criterion_group!(benches, bench_broadcast, bench_lock_cycle);
criterion_main!(benches);
