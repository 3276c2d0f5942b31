// In-process Job Store
// Single point of truth behind one async mutex; every transition happens under the lock

use crate::domain::{DomainError, Job, JobId, NewJob, Outcome};
use crate::error::Result;
use crate::port::job_store::duration_millis;
use crate::port::{IdProvider, JobStore, QueueStats, TimeProvider};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Pending order key: oldest first, ties by id
type PendingKey = (i64, JobId);

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    /// Global pending index
    pending: BTreeSet<PendingKey>,
    /// Per-workflow pending index
    pending_by_workflow: HashMap<String, BTreeSet<PendingKey>>,
}

impl State {
    fn enqueue(&mut self, job: &Job) {
        let key = (job.created_at, job.id.clone());
        self.pending.insert(key.clone());
        self.pending_by_workflow
            .entry(job.workflow.clone())
            .or_default()
            .insert(key);
    }

    fn dequeue(&mut self, workflow: &str, key: &PendingKey) {
        self.pending.remove(key);
        if let Some(set) = self.pending_by_workflow.get_mut(workflow) {
            set.remove(key);
            if set.is_empty() {
                self.pending_by_workflow.remove(workflow);
            }
        }
    }

    /// Oldest pending key among the candidate workflows
    fn head(&self, candidates: Option<&[String]>) -> Option<PendingKey> {
        match candidates {
            None => self.pending.first().cloned(),
            Some(workflows) => workflows
                .iter()
                .filter_map(|wf| self.pending_by_workflow.get(wf))
                .filter_map(|set| set.first())
                .min()
                .cloned(),
        }
    }

    fn job_mut(&mut self, id: &str) -> Result<&mut Job> {
        self.jobs
            .get_mut(id)
            .ok_or_else(|| DomainError::JobNotFound(id.to_string()).into())
    }
}

pub struct InMemoryJobStore {
    state: Mutex<State>,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
}

impl InMemoryJobStore {
    pub fn new(time_provider: Arc<dyn TimeProvider>, id_provider: Arc<dyn IdProvider>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            time_provider,
            id_provider,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job> {
        let id = self.id_provider.generate_id();
        let job = Job::new(id, self.time_provider.now_millis(), new_job)?;

        let mut state = self.state.lock().await;
        if state.jobs.contains_key(&job.id) {
            return Err(crate::error::AppError::Internal(format!(
                "duplicate job id {}",
                job.id
            )));
        }
        state.enqueue(&job);
        state.jobs.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, workflow = %job.workflow, "Job created");
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(self.state.lock().await.jobs.get(id).cloned())
    }

    async fn claim(&self, candidate_workflows: Option<&[String]>) -> Result<Option<Job>> {
        let mut state = self.state.lock().await;
        let Some(key) = state.head(candidate_workflows) else {
            return Ok(None);
        };

        let token = self.id_provider.generate_id();
        let now = self.time_provider.now_millis();
        let job = state.job_mut(&key.1)?;
        job.claim(token, now)?;
        let job = job.clone();

        state.dequeue(&job.workflow, &key);
        Ok(Some(job))
    }

    async fn mark_processing(&self, id: &str, owner_token: &str) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        job.start(owner_token, now)?;
        Ok(job.clone())
    }

    async fn heartbeat(&self, id: &str, owner_token: &str) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().await;
        state.job_mut(id)?.heartbeat(owner_token, now)?;
        Ok(())
    }

    async fn finalize(&self, id: &str, owner_token: &str, outcome: Outcome) -> Result<Job> {
        let now = self.time_provider.now_millis();
        let mut state = self.state.lock().await;
        let job = state.job_mut(id)?;
        if !job.finish(owner_token, outcome, now)? {
            debug!(job_id = %id, "Finalize repeated by same owner, ignoring");
        }
        Ok(job.clone())
    }

    async fn reclaim_expired(&self, lease: Duration) -> Result<Vec<JobId>> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(lease));
        let mut state = self.state.lock().await;

        let mut expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| job.is_lease_expired(cutoff))
            .map(|job| job.id.clone())
            .collect();
        expired.sort();

        for id in &expired {
            let job = state.job_mut(id)?;
            job.release()?;
            let job = job.clone();
            state.enqueue(&job);
            info!(job_id = %id, workflow = %job.workflow, "Lease expired, job returned to PENDING");
        }
        Ok(expired)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for job in state.jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64> {
        let cutoff = self
            .time_provider
            .now_millis()
            .saturating_sub(duration_millis(older_than));
        let mut state = self.state.lock().await;
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.map(|at| at < cutoff).unwrap_or(false))
        });
        Ok((before - state.jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, JobError, JobOutput, JobStatus};
    use crate::error::AppError;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::time_provider::mocks::ManualClock;
    use serde_json::json;

    fn store() -> (Arc<ManualClock>, InMemoryJobStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = InMemoryJobStore::new(clock.clone(), Arc::new(SequentialIdProvider::new("id")));
        (clock, store)
    }

    fn new_job(workflow: &str) -> NewJob {
        NewJob::new(workflow, json!({"n": 1}).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_claim_fifo_with_filter() {
        let (clock, store) = store();
        let a = store.create(new_job("face_swap")).await.unwrap();
        clock.advance(10);
        let b = store.create(new_job("comfyui_portrait")).await.unwrap();
        clock.advance(10);
        let c = store.create(new_job("face_swap")).await.unwrap();

        let only_comfy = vec!["comfyui_portrait".to_string()];
        let claimed = store.claim(Some(&only_comfy)).await.unwrap().unwrap();
        assert_eq!(claimed.id, b.id);
        assert!(store.claim(Some(&only_comfy)).await.unwrap().is_none());

        assert_eq!(store.claim(None).await.unwrap().unwrap().id, a.id);
        assert_eq!(store.claim(None).await.unwrap().unwrap().id, c.id);
        assert!(store.claim(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_timestamp_ties_broken_by_id() {
        let (_clock, store) = store();
        let first = store.create(new_job("wf")).await.unwrap();
        let second = store.create(new_job("wf")).await.unwrap();
        assert!(first.id < second.id);
        assert_eq!(store.claim(None).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_wrong_token_is_ownership_error() {
        let (_clock, store) = store();
        let job = store.create(new_job("wf")).await.unwrap();
        let claimed = store.claim(None).await.unwrap().unwrap();

        let err = store.mark_processing(&job.id, "forged").await.unwrap_err();
        assert!(matches!(err, AppError::Ownership(_)));

        let token = claimed.owner_token.unwrap();
        store.mark_processing(&job.id, &token).await.unwrap();
        let err = store.mark_processing(&job.id, &token).await.unwrap_err();
        assert!(matches!(err, AppError::Ownership(_)));
    }

    #[tokio::test]
    async fn test_finalize_idempotent() {
        let (clock, store) = store();
        let job = store.create(new_job("wf")).await.unwrap();
        let token = store.claim(None).await.unwrap().unwrap().owner_token.unwrap();
        store.mark_processing(&job.id, &token).await.unwrap();

        let out = JobOutput::with_urls(vec!["https://cdn/r.png".into()]);
        let done = store
            .finalize(&job.id, &token, Outcome::Completed(out.clone()))
            .await
            .unwrap();
        clock.advance(50);
        let again = store
            .finalize(
                &job.id,
                &token,
                Outcome::Failed(JobError::new(FailureKind::ProcessorError, "late")),
            )
            .await
            .unwrap();

        assert_eq!(again.status, JobStatus::Completed);
        assert_eq!(again.output, Some(out));
        assert!(again.error.is_none());
        assert_eq!(again.finished_at, done.finished_at);
    }

    #[tokio::test]
    async fn test_reclaim_expired_and_reclaim() {
        let (clock, store) = store();
        let job = store.create(new_job("wf")).await.unwrap();
        let first = store.claim(None).await.unwrap().unwrap();
        let first_token = first.owner_token.unwrap();

        clock.advance(299_000);
        assert!(store
            .reclaim_expired(Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty());

        clock.advance(2_000);
        let reclaimed = store.reclaim_expired(Duration::from_secs(300)).await.unwrap();
        assert_eq!(reclaimed, vec![job.id.clone()]);

        let pending = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(pending.status, JobStatus::Pending);
        assert!(pending.owner_token.is_none());

        let second = store.claim(None).await.unwrap().unwrap();
        let second_token = second.owner_token.unwrap();
        assert_ne!(first_token, second_token);
        assert_eq!(second.attempts, 2);

        // The first owner is fenced out
        let err = store
            .finalize(&job.id, &first_token, Outcome::Completed(JobOutput::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ownership(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_extends_lease() {
        let (clock, store) = store();
        let job = store.create(new_job("wf")).await.unwrap();
        let token = store.claim(None).await.unwrap().unwrap().owner_token.unwrap();

        clock.advance(200_000);
        store.heartbeat(&job.id, &token).await.unwrap();
        clock.advance(200_000);
        assert!(store
            .reclaim_expired(Duration::from_secs(300))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_purge() {
        let (clock, store) = store();
        let a = store.create(new_job("wf")).await.unwrap();
        store.create(new_job("wf")).await.unwrap();
        let token = store.claim(None).await.unwrap().unwrap().owner_token.unwrap();
        store
            .finalize(
                &a.id,
                &token,
                Outcome::Failed(JobError::new(FailureKind::RoutingError, "none")),
            )
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.total(), 2);

        assert_eq!(store.purge_finished(Duration::from_secs(60)).await.unwrap(), 0);
        clock.advance(61_000);
        assert_eq!(store.purge_finished(Duration::from_secs(60)).await.unwrap(), 1);
        assert!(store.get(&a.id).await.unwrap().is_none());
    }
}
