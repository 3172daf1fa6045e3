use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use voluntra_domain::jobs::{
    JobDefaults, RetentionSweepPayload, backoff_ms, new_job, now_ms, retention_job_id,
};
use voluntra_domain::ports::jobs::{JobEnvelope, JobQueue, JobType};
use voluntra_domain::ports::store::DocumentStore;
use voluntra_domain::retention::RetentionJob;
use voluntra_infra::config::AppConfig;

use crate::observability;

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub retention_days: i64,
    pub interval_ms: u64,
    pub poll_interval: Duration,
    pub promote_batch: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl SchedulerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retention_days: config.retention_days,
            interval_ms: config.retention_interval_ms.max(1),
            poll_interval: Duration::from_millis(config.worker_poll_interval_ms.max(10)),
            promote_batch: config.worker_promote_batch.max(1),
            backoff_base_ms: config.worker_backoff_base_ms,
            backoff_max_ms: config.worker_backoff_max_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Completed { job_id: String, next_run_ms: i64 },
    Retrying { job_id: String, attempt: u32 },
    DeadLettered { job_id: String },
}

/// Drives the retention sweep through the job queue: each run schedules the
/// next one, failed runs are retried with backoff.
pub struct RetentionScheduler {
    queue: Arc<dyn JobQueue>,
    job: RetentionJob,
    settings: SchedulerSettings,
}

impl RetentionScheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn DocumentStore>,
        settings: SchedulerSettings,
    ) -> Self {
        let job = RetentionJob::new(store).with_retention_days(settings.retention_days);
        Self {
            queue,
            job,
            settings,
        }
    }

    /// Enqueues the sweep for `scheduled_ms` unless it is already queued.
    pub async fn schedule(&self, scheduled_ms: i64) -> Result<bool> {
        let payload = serde_json::to_value(RetentionSweepPayload {
            scheduled_ms,
            retention_days: self.settings.retention_days,
        })?;
        let job = new_job(
            retention_job_id(scheduled_ms),
            JobType::RetentionSweep,
            payload,
            JobDefaults::default(),
        )
        .with_run_at(scheduled_ms);
        let dedupe_ttl_ms = self.settings.interval_ms.saturating_mul(2);
        let inserted = self
            .queue
            .enqueue_if_absent(&job, dedupe_ttl_ms)
            .await
            .context("schedule retention sweep")?;
        if inserted {
            tracing::info!(
                job_id = %job.job_id,
                run_at_ms = scheduled_ms,
                "retention sweep scheduled"
            );
        }
        Ok(inserted)
    }

    /// Returns jobs left in processing by a crashed worker to the ready list.
    pub async fn recover(&self) -> Result<usize> {
        let moved = self
            .queue
            .requeue_processing(self.settings.promote_batch)
            .await
            .context("requeue processing jobs")?;
        if moved > 0 {
            tracing::warn!(moved, "requeued jobs left in processing");
        }
        Ok(moved)
    }

    pub async fn tick(&self, now_ms: i64) -> Result<TickOutcome> {
        self.queue
            .promote_due(now_ms, self.settings.promote_batch)
            .await
            .context("promote due jobs")?;
        let Some(job) = self
            .queue
            .dequeue(self.settings.poll_interval)
            .await
            .context("dequeue job")?
        else {
            return Ok(TickOutcome::Idle);
        };
        observability::set_queue_lag_ms(now_ms - job.run_at_ms);
        self.process(job, now_ms).await
    }

    async fn process(&self, job: JobEnvelope, now_ms: i64) -> Result<TickOutcome> {
        let started = Instant::now();
        let job_type = job.job_type.as_str();
        let result = match job.job_type {
            JobType::RetentionSweep => self.job.sweep(now_ms).await,
        };

        match result {
            Ok(report) => {
                observability::register_retention_report(&report);
                observability::register_job_processed(
                    job_type,
                    "success",
                    started.elapsed().as_secs_f64() * 1_000.0,
                );
                self.queue.ack(&job.job_id).await.context("ack job")?;
                let next_run_ms = self.next_run_ms(&job, now_ms);
                self.schedule(next_run_ms).await?;
                Ok(TickOutcome::Completed {
                    job_id: job.job_id,
                    next_run_ms,
                })
            }
            Err(err) => {
                tracing::error!(
                    job_id = %job.job_id,
                    attempt = job.attempt,
                    error = %err,
                    "job failed"
                );
                self.queue.ack(&job.job_id).await.context("ack failed job")?;
                if !job.has_attempts_left() {
                    observability::register_job_processed(
                        job_type,
                        "dead_letter",
                        started.elapsed().as_secs_f64() * 1_000.0,
                    );
                    let next_run_ms = self.next_run_ms(&job, now_ms);
                    self.schedule(next_run_ms).await?;
                    return Ok(TickOutcome::DeadLettered { job_id: job.job_id });
                }
                observability::register_job_processed(
                    job_type,
                    "retry",
                    started.elapsed().as_secs_f64() * 1_000.0,
                );
                let attempt = job.next_attempt();
                let delay = backoff_ms(
                    self.settings.backoff_base_ms,
                    job.attempt,
                    self.settings.backoff_max_ms,
                );
                let mut retry = job.clone().with_run_at(now_ms + delay as i64);
                retry.attempt = attempt;
                self.queue.enqueue(&retry).await.context("enqueue retry")?;
                Ok(TickOutcome::Retrying {
                    job_id: job.job_id,
                    attempt,
                })
            }
        }
    }

    /// Start of the interval containing `now_ms`. Restarts within one interval
    /// map to the same job id.
    pub fn slot_start_ms(&self, now_ms: i64) -> i64 {
        let interval = self.settings.interval_ms as i64;
        now_ms - now_ms.rem_euclid(interval)
    }

    fn next_run_ms(&self, job: &JobEnvelope, now_ms: i64) -> i64 {
        let scheduled_ms = serde_json::from_value::<RetentionSweepPayload>(job.payload.clone())
            .map(|payload| payload.scheduled_ms)
            .unwrap_or(now_ms);
        let interval = self.settings.interval_ms as i64;
        let mut next = scheduled_ms + interval;
        // A worker that was down for several intervals runs once, not once per missed slot.
        while next <= now_ms {
            next += interval;
        }
        next
    }

    /// Ticks until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            let outcome = tokio::select! {
                _ = &mut shutdown => return,
                outcome = self.tick(now_ms()) => outcome,
            };
            match outcome {
                Ok(TickOutcome::Idle) => {
                    tokio::select! {
                        _ = &mut shutdown => return,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
                Ok(outcome) => tracing::debug!(?outcome, "job tick"),
                Err(err) => {
                    tracing::error!(error = %err, "job tick failed");
                    tokio::select! {
                        _ = &mut shutdown => return,
                        _ = tokio::time::sleep(self.settings.poll_interval) => {}
                    }
                }
            }
        }
    }
}
