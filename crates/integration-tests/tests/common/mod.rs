//! Shared fixtures: both Job Store implementations behind the same port

#![allow(dead_code)]

use kiln_core::domain::{JobInput, NewJob};
use kiln_core::memory::InMemoryJobStore;
use kiln_core::port::id_provider::mocks::SequentialIdProvider;
use kiln_core::port::time_provider::mocks::ManualClock;
use kiln_core::port::time_provider::SystemTimeProvider;
use kiln_core::port::{IdProvider, JobStore, TimeProvider};
use kiln_infra_sqlite::{create_pool, run_migrations, SqliteJobStore};
use std::sync::Arc;
use tempfile::TempDir;

pub const START_MILLIS: i64 = 1_700_000_000_000;

pub struct StoreFixture {
    pub store: Arc<dyn JobStore>,
    pub clock: Arc<ManualClock>,
    /// Keeps the SQLite file alive for the test's duration
    _dir: Option<TempDir>,
}

pub async fn memory_store() -> StoreFixture {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let store = InMemoryJobStore::new(clock.clone(), Arc::new(SequentialIdProvider::new("job")));
    StoreFixture {
        store: Arc::new(store),
        clock,
        _dir: None,
    }
}

pub async fn sqlite_store() -> StoreFixture {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let (store, dir) = sqlite_with(clock.clone(), Arc::new(SequentialIdProvider::new("job"))).await;
    StoreFixture {
        store,
        clock,
        _dir: Some(dir),
    }
}

/// File-backed SQLite store (WAL, pooled connections) in a fresh temp dir
pub async fn sqlite_with(
    time: Arc<dyn TimeProvider>,
    ids: Arc<dyn IdProvider>,
) -> (Arc<dyn JobStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}", dir.path().join("jobs.db").display());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (Arc::new(SqliteJobStore::new(pool, time, ids)), dir)
}

/// Real-clock stores for tests that race tasks against each other
pub async fn realtime_stores() -> Vec<(&'static str, Arc<dyn JobStore>, Option<TempDir>)> {
    let memory = InMemoryJobStore::new(
        Arc::new(SystemTimeProvider),
        Arc::new(SequentialIdProvider::new("job")),
    );
    let (sqlite, dir) = sqlite_with(
        Arc::new(SystemTimeProvider),
        Arc::new(SequentialIdProvider::new("job")),
    )
    .await;
    vec![
        ("memory", Arc::new(memory) as Arc<dyn JobStore>, None),
        ("sqlite", sqlite, Some(dir)),
    ]
}

pub fn input(value: serde_json::Value) -> JobInput {
    value.as_object().cloned().unwrap_or_default()
}

pub fn face_swap_job() -> NewJob {
    NewJob::new(
        "face_swap",
        input(serde_json::json!({
            "source_url": "https://x/s.jpg",
            "target_url": "https://x/t.jpg"
        })),
    )
}
