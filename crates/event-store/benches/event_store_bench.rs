use common::StreamId;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, InMemoryEventStore, Version,
};

fn make_event(stream: &StreamId, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .stream_id(stream.clone())
        .aggregate_type("Workshop")
        .event_type("SeatsClaimed")
        .version(Version::new(version))
        .payload_raw(serde_json::json!({
            "type": "SeatsClaimed",
            "data": { "booking_id": "00000000-0000-0000-0000-000000000001", "seats": 2 }
        }))
        .build()
        .unwrap()
}

fn bench_append_with_version_check(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_expect_new", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let stream = StreamId::of("workshop", "bench");
                store
                    .append_event(make_event(&stream, 1), AppendOptions::expect_new())
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_stream(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let stream = StreamId::of("workshop", "busy");

    rt.block_on(async {
        let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(&stream, v)).collect();
        store.append(events, AppendOptions::new()).await.unwrap();
        // Noise on other streams.
        for i in 0..50 {
            let other = StreamId::of("workshop", i);
            store
                .append_event(make_event(&other, 1), AppendOptions::new())
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/load_stream_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.load_stream(&stream).await.unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(async {
        for i in 0..10 {
            let stream = StreamId::of("workshop", i);
            let events: Vec<EventEnvelope> = (1..=100).map(|v| make_event(&stream, v)).collect();
            store.append(events, AppendOptions::new()).await.unwrap();
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream_all_events().await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_with_version_check,
    bench_load_stream,
    bench_stream_all_events,
);
criterion_main!(benches);
