use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use common::{AggregateId, ManualClock, Money, SharedClock};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{
    AvailabilityEngine, BookingRegistry, BusinessHours, Catalog, CouponCode, CouponDefinition,
    CouponLedger, Discount, NewBooking, ProductId,
};
use event_store::InMemoryEventStore;

fn clock() -> SharedClock {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap(),
    ))
}

fn bench_coupon_contention(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();

    let mut group = c.benchmark_group("domain/coupon_contention");
    for callers in [1usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(callers), &callers, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let ledger = Arc::new(CouponLedger::new(InMemoryEventStore::new(), clock()));
                    ledger
                        .create_coupon(CouponDefinition {
                            code: CouponCode::parse("BENCH").unwrap(),
                            discount: Discount::Percentage(10),
                            minimum_amount: Money::zero(),
                            usage_limit: 4,
                            expires_at: None,
                        })
                        .await
                        .unwrap();

                    let tasks: Vec<_> = (0..n)
                        .map(|_| {
                            let ledger = ledger.clone();
                            tokio::spawn(async move {
                                ledger
                                    .apply_coupon("BENCH", Money::from_dollars(100), AggregateId::new())
                                    .await
                            })
                        })
                        .collect();
                    for task in tasks {
                        let _ = task.await.unwrap();
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_booking_confirm(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let start = NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap();

    c.bench_function("domain/create_and_confirm_booking", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let clock = clock();
                let availability = Arc::new(AvailabilityEngine::new(
                    store.clone(),
                    BusinessHours::default(),
                    clock.clone(),
                ));
                let registry =
                    BookingRegistry::new(store, availability, Arc::new(Catalog::standard()), clock);
                let booking = registry
                    .create(&NewBooking {
                        product_id: ProductId::new("ai-leadership-3day"),
                        start,
                        attendees: 2,
                    })
                    .await
                    .unwrap();
                registry.confirm(booking.id().unwrap()).await.unwrap();
            });
        });
    });
}

fn bench_calendar_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let engine = AvailabilityEngine::new(InMemoryEventStore::new(), BusinessHours::default(), clock());
    let first = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

    rt.block_on(async {
        for i in 0..100 {
            let day = first + Duration::days(i * 3);
            engine.block_date(day, "Holiday").await.unwrap();
        }
    });

    c.bench_function("domain/blocked_dates_100_blockouts", |b| {
        b.iter(|| {
            rt.block_on(async {
                engine
                    .get_blocked_dates(first, first + Duration::days(365))
                    .await
                    .unwrap()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_coupon_contention,
    bench_booking_confirm,
    bench_calendar_replay,
);
criterion_main!(benches);
