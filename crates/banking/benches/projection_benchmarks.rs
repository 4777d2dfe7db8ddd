use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use adhoc_banking::{
    BankAccountCreated, CurrentBalance, MoneyDeposited, MoneyWithdrawn, account_entity,
};
use adhoc_core::EntityId;
use adhoc_events::{EventRecord, InMemoryEventLog};
use adhoc_projection::{CachePolicy, IncrementalUpdater, Repository, RepositoryConfig};
use uuid::Uuid;

/// Log holding one account with `events` money movements after its creation.
fn seeded_log(events: usize) -> (Arc<InMemoryEventLog>, Uuid) {
    let log = Arc::new(InMemoryEventLog::new());
    let account_id = Uuid::now_v7();
    let id = account_entity(account_id);
    log.append_typed(&id, &BankAccountCreated { account_id, owner: "bench".into() })
        .unwrap();
    for i in 0..events {
        if i % 3 == 2 {
            log.append_typed(&id, &MoneyWithdrawn { account_id, amount: 10 })
                .unwrap();
        } else {
            log.append_typed(&id, &MoneyDeposited { account_id, amount: 25 })
                .unwrap();
        }
    }
    (log, account_id)
}

fn balances(
    log: &Arc<InMemoryEventLog>,
    config: RepositoryConfig,
) -> Repository<CurrentBalance, Arc<InMemoryEventLog>> {
    Repository::new(CurrentBalance::registry().unwrap(), log.clone(), config)
}

fn bench_cold_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("cold_build");

    for event_count in [10usize, 100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*event_count as u64));
        group.bench_with_input(
            BenchmarkId::new("find_by_id_uncached", event_count),
            event_count,
            |b, &n| {
                let (log, account_id) = seeded_log(n);
                let repository = balances(&log, RepositoryConfig::default().with_cache(CachePolicy::None));
                let id = account_entity(account_id);
                b.iter(|| black_box(repository.find_by_id(&id).unwrap()));
            },
        );
    }

    group.finish();
}

fn bench_cached_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_queries");
    let (log, account_id) = seeded_log(1000);
    let id = account_entity(account_id);

    group.bench_function("revalidate_up_to_date_entry", |b| {
        let repository = balances(&log, RepositoryConfig::default());
        repository.find_by_id(&id).unwrap();
        b.iter(|| black_box(repository.find_by_id(&id).unwrap()));
    });

    group.bench_function("catch_up_one_event", |b| {
        let repository = balances(&log, RepositoryConfig::default());
        repository.find_by_id(&id).unwrap();
        b.iter(|| {
            log.append_typed(&id, &MoneyDeposited { account_id, amount: 1 })
                .unwrap();
            black_box(repository.find_by_id(&id).unwrap())
        });
    });

    group.finish();
}

fn bench_incremental_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_apply");
    group.throughput(Throughput::Elements(1));

    group.bench_function("exact_next_event", |b| {
        let (log, account_id) = seeded_log(0);
        let id: EntityId = account_entity(account_id);
        let updater = IncrementalUpdater::new(balances(&log, RepositoryConfig::default()));
        updater.find_by_id(&id).unwrap();

        b.iter(|| {
            let record: EventRecord = log
                .append_typed(&id, &MoneyDeposited { account_id, amount: 1 })
                .unwrap();
            updater.on(black_box(&record)).unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_cold_build,
    bench_cached_queries,
    bench_incremental_apply
);
criterion_main!(benches);
