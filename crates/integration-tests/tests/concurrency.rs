//! Concurrency guarantees of both Job Stores under real parallel load

mod common;

use common::{face_swap_job, realtime_stores};
use futures::future::join_all;
use kiln_core::domain::{JobOutput, JobStatus, Outcome};
use kiln_core::error::AppError;
use kiln_core::port::JobStore;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

const WORKERS: usize = 16;
const JOBS: usize = 5;

/// N concurrent claimers, M < N jobs: every job claimed exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_no_duplicate_claims_under_contention() {
    for (label, store, _dir) in realtime_stores().await {
        for round in 0..5 {
            let mut created = HashSet::new();
            for _ in 0..JOBS {
                created.insert(store.create(face_swap_job()).await.unwrap().id);
            }

            let barrier = Arc::new(Barrier::new(WORKERS));
            let tasks = (0..WORKERS).map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.claim(None).await
                })
            });

            let mut claimed = Vec::new();
            for result in join_all(tasks).await {
                if let Some(job) = result.unwrap().unwrap() {
                    claimed.push(job.id);
                }
            }

            let unique: HashSet<_> = claimed.iter().cloned().collect();
            assert_eq!(claimed.len(), JOBS, "[{} round {}] claims: {:?}", label, round, claimed);
            assert_eq!(unique, created, "[{} round {}]", label, round);

            // Leave nothing claimable for the next round
            assert!(store.claim(None).await.unwrap().is_none());
        }
    }
}

/// Lease expiry racing with finalize: exactly one side wins, never both
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_finalize_vs_reclaim_is_exclusive() {
    for (label, store, _dir) in realtime_stores().await {
        let mut finalize_wins = 0;
        let mut reclaim_wins = 0;

        for _ in 0..25 {
            let job = store.create(face_swap_job()).await.unwrap();
            let claimed = store.claim(None).await.unwrap().unwrap();
            assert_eq!(claimed.id, job.id);
            let token = claimed.owner_token.unwrap();
            store.mark_processing(&job.id, &token).await.unwrap();

            // Every held job counts as expired against a zero lease
            tokio::time::sleep(Duration::from_millis(2)).await;

            let barrier = Arc::new(Barrier::new(2));
            let finalize = {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let id = job.id.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store
                        .finalize(&id, &token, Outcome::Completed(JobOutput::default()))
                        .await
                })
            };
            let reclaim = {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.reclaim_expired(Duration::ZERO).await
                })
            };

            let finalized = finalize.await.unwrap();
            let reclaimed = reclaim.await.unwrap().unwrap();
            let stored = store.get(&job.id).await.unwrap().unwrap();

            match finalized {
                Ok(done) => {
                    finalize_wins += 1;
                    assert_eq!(done.status, JobStatus::Completed, "[{}]", label);
                    assert!(!reclaimed.contains(&job.id), "[{}] both won", label);
                    assert_eq!(stored.status, JobStatus::Completed, "[{}]", label);
                }
                Err(AppError::Ownership(_)) => {
                    reclaim_wins += 1;
                    assert!(reclaimed.contains(&job.id), "[{}]", label);
                    assert_eq!(stored.status, JobStatus::Pending, "[{}]", label);
                    assert!(stored.output.is_none(), "[{}]", label);

                    // Drain it so the next iteration starts from an empty queue
                    let again = store.claim(None).await.unwrap().unwrap();
                    let t = again.owner_token.unwrap();
                    store.mark_processing(&again.id, &t).await.unwrap();
                    store
                        .finalize(&again.id, &t, Outcome::Completed(JobOutput::default()))
                        .await
                        .unwrap();
                }
                Err(other) => panic!("[{}] unexpected finalize error {:?}", label, other),
            }
        }

        assert_eq!(finalize_wins + reclaim_wins, 25, "[{}]", label);
    }
}

/// Concurrent creates never lose a job
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_are_all_visible() {
    for (label, store, _dir) in realtime_stores().await {
        let tasks = (0..50).map(|_| {
            let store: Arc<dyn JobStore> = Arc::clone(&store);
            tokio::spawn(async move { store.create(face_swap_job()).await })
        });
        let ids: HashSet<String> = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap().unwrap().id)
            .collect();

        assert_eq!(ids.len(), 50, "[{}]", label);
        assert_eq!(store.stats().await.unwrap().pending, 50, "[{}]", label);
    }
}
