use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ports::BoxFuture;
use crate::ports::jobs::{JobEnvelope, JobQueue, JobQueueError, JobType};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetentionSweepPayload {
    pub scheduled_ms: i64,
    pub retention_days: i64,
}

#[derive(Clone, Debug)]
pub struct JobDefaults {
    pub max_attempts: u32,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn backoff_ms(base_ms: u64, attempt: u32, max_ms: u64) -> u64 {
    if attempt == 0 {
        return 0;
    }
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay = base_ms.saturating_mul(pow);
    delay.min(max_ms)
}

pub fn new_job(
    job_id: String,
    job_type: JobType,
    payload: serde_json::Value,
    defaults: JobDefaults,
) -> JobEnvelope {
    let now = now_ms();
    JobEnvelope {
        job_id,
        job_type,
        payload,
        attempt: 1,
        max_attempts: defaults.max_attempts,
        run_at_ms: now,
        created_at_ms: now,
    }
}

/// Stable id for the sweep scheduled at `scheduled_ms`, so a restarted worker
/// does not enqueue the same run twice.
pub fn retention_job_id(scheduled_ms: i64) -> String {
    format!("retention:{scheduled_ms}")
}

#[derive(Default)]
struct QueueState {
    payloads: HashMap<String, JobEnvelope>,
    ready: VecDeque<String>,
    delayed: BTreeMap<(i64, String), ()>,
    processing: VecDeque<String>,
    dedupe: HashMap<String, i64>,
}

/// Single-process job queue with the same semantics as the Redis queue.
#[derive(Clone, Default)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(state: &mut QueueState, job: &JobEnvelope) {
        state.payloads.insert(job.job_id.clone(), job.clone());
        if job.run_at_ms <= now_ms() {
            state.ready.push_back(job.job_id.clone());
        } else {
            state
                .delayed
                .insert((job.run_at_ms, job.job_id.clone()), ());
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, JobQueueError> {
        self.state
            .lock()
            .map_err(|_| JobQueueError::Unavailable("job queue lock poisoned".into()))
    }

    pub fn delayed_len(&self) -> usize {
        self.lock().map(|state| state.delayed.len()).unwrap_or(0)
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job = job.clone();
        Box::pin(async move {
            let mut state = self.lock()?;
            Self::insert(&mut state, &job);
            Ok(())
        })
    }

    fn enqueue_if_absent(
        &self,
        job: &JobEnvelope,
        dedupe_ttl_ms: u64,
    ) -> BoxFuture<'_, Result<bool, JobQueueError>> {
        let job = job.clone();
        Box::pin(async move {
            let now = now_ms();
            let mut state = self.lock()?;
            if let Some(expires_at) = state.dedupe.get(&job.job_id) {
                if *expires_at > now {
                    return Ok(false);
                }
            }
            state
                .dedupe
                .insert(job.job_id.clone(), now + dedupe_ttl_ms.max(1) as i64);
            Self::insert(&mut state, &job);
            Ok(true)
        })
    }

    fn dequeue(
        &self,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let Some(job_id) = state.ready.pop_front() else {
                return Ok(None);
            };
            let Some(job) = state.payloads.get(&job_id).cloned() else {
                return Err(JobQueueError::Operation(format!(
                    "missing payload for job_id {job_id}"
                )));
            };
            state.processing.push_back(job_id);
            Ok(Some(job))
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut state = self.lock()?;
            state.processing.retain(|id| id != &job_id);
            state.payloads.remove(&job_id);
            Ok(())
        })
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let due: Vec<(i64, String)> = state
                .delayed
                .keys()
                .take_while(|(run_at_ms, _)| *run_at_ms <= now_ms)
                .take(limit)
                .cloned()
                .collect();
            for key in &due {
                state.delayed.remove(key);
                state.ready.push_back(key.1.clone());
            }
            Ok(due.len())
        })
    }

    fn requeue_processing(&self, limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            let mut state = self.lock()?;
            let mut moved = 0usize;
            while moved < limit {
                let Some(job_id) = state.processing.pop_front() else {
                    break;
                };
                state.ready.push_back(job_id);
                moved += 1;
            }
            Ok(moved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_ms_returns_zero_for_zero_attempt() {
        assert_eq!(backoff_ms(1_000, 0, 60_000), 0);
    }

    #[test]
    fn backoff_ms_grows_geometrically_and_caps() {
        assert_eq!(backoff_ms(1_000, 1, 60_000), 1_000);
        assert_eq!(backoff_ms(1_000, 3, 60_000), 4_000);
        assert_eq!(backoff_ms(1_000, 10, 3_000), 3_000);
    }

    #[test]
    fn new_job_starts_at_first_attempt() {
        let job = new_job(
            retention_job_id(10),
            JobType::RetentionSweep,
            json!({"scheduled_ms": 10, "retention_days": 30}),
            JobDefaults { max_attempts: 3 },
        );
        assert_eq!(job.job_id, "retention:10");
        assert_eq!(job.attempt, 1);
        assert!(job.has_attempts_left());
        assert_eq!(job.created_at_ms, job.run_at_ms);
    }

    #[tokio::test]
    async fn delayed_job_is_only_dequeued_after_promotion() {
        let queue = InMemoryJobQueue::new();
        let job = new_job(
            "job-1".into(),
            JobType::RetentionSweep,
            json!({}),
            JobDefaults::default(),
        )
        .with_run_at(now_ms() + 60_000);
        queue.enqueue(&job).await.unwrap();

        assert!(queue.dequeue(Duration::from_millis(1)).await.unwrap().is_none());
        assert_eq!(queue.promote_due(now_ms(), 10).await.unwrap(), 0);
        assert_eq!(queue.promote_due(job.run_at_ms, 10).await.unwrap(), 1);

        let dequeued = queue.dequeue(Duration::from_millis(1)).await.unwrap().unwrap();
        assert_eq!(dequeued.job_id, "job-1");
        queue.ack("job-1").await.unwrap();
        assert_eq!(queue.requeue_processing(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn enqueue_if_absent_dedupes_by_job_id() {
        let queue = InMemoryJobQueue::new();
        let job = new_job(
            retention_job_id(5),
            JobType::RetentionSweep,
            json!({}),
            JobDefaults::default(),
        );
        assert!(queue.enqueue_if_absent(&job, 60_000).await.unwrap());
        assert!(!queue.enqueue_if_absent(&job, 60_000).await.unwrap());
    }
}
