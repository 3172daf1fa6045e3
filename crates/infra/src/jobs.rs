use std::time::Duration;

use redis::aio::ConnectionManager;
use voluntra_domain::jobs::now_ms;
use voluntra_domain::ports::BoxFuture;
use voluntra_domain::ports::jobs::{JobEnvelope, JobQueue, JobQueueError};

const ENQUEUE_IF_ABSENT_SCRIPT: &str = r#"
    local payload_key = KEYS[1]
    local ready_key = KEYS[2]
    local delayed_key = KEYS[3]
    local marker_key = KEYS[4]
    local job_id = ARGV[1]
    local payload = ARGV[2]
    local run_at_ms = tonumber(ARGV[3])
    local now_ms = tonumber(ARGV[4])
    local dedupe_ttl_ms = tonumber(ARGV[5])

    if redis.call('SET', marker_key, 1, 'PX', dedupe_ttl_ms, 'NX') == false then
        return 0
    end

    redis.call('HSET', payload_key, job_id, payload)
    if run_at_ms <= now_ms then
        redis.call('RPUSH', ready_key, job_id)
    else
        redis.call('ZADD', delayed_key, run_at_ms, job_id)
    end
    return 1
"#;

const PROMOTE_DUE_SCRIPT: &str = r#"
    local delayed_key = KEYS[1]
    local ready_key = KEYS[2]
    local due = redis.call(
        'ZRANGEBYSCORE', delayed_key, '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
    for _, job_id in ipairs(due) do
        redis.call('ZREM', delayed_key, job_id)
        redis.call('RPUSH', ready_key, job_id)
    end
    return #due
"#;

const REQUEUE_PROCESSING_SCRIPT: &str = r#"
    local processing_key = KEYS[1]
    local ready_key = KEYS[2]
    local moved = 0
    for _ = 1, tonumber(ARGV[1]) do
        local job_id = redis.call('RPOPLPUSH', processing_key, ready_key)
        if not job_id then
            break
        end
        moved = moved + 1
    end
    return moved
"#;

#[derive(Clone)]
struct QueueKeys {
    ready: String,
    delayed: String,
    processing: String,
    payloads: String,
}

impl QueueKeys {
    fn new(prefix: &str) -> Self {
        Self {
            ready: format!("{prefix}:ready"),
            delayed: format!("{prefix}:delayed"),
            processing: format!("{prefix}:processing"),
            payloads: format!("{prefix}:payloads"),
        }
    }

    fn dedupe(&self, job_id: &str) -> String {
        format!("{}:dedupe:{job_id}", self.payloads)
    }
}

#[derive(Clone)]
pub struct RedisJobQueue {
    manager: ConnectionManager,
    keys: QueueKeys,
}

fn operation(err: redis::RedisError) -> JobQueueError {
    JobQueueError::Operation(err.to_string())
}

impl RedisJobQueue {
    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, JobQueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| JobQueueError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            keys: QueueKeys::new(&prefix.into()),
        })
    }

    fn serialize(job: &JobEnvelope) -> Result<String, JobQueueError> {
        serde_json::to_string(job).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }

    fn deserialize(payload: &str) -> Result<JobEnvelope, JobQueueError> {
        serde_json::from_str(payload).map_err(|err| JobQueueError::Serialization(err.to_string()))
    }
}

impl JobQueue for RedisJobQueue {
    fn enqueue(&self, job: &JobEnvelope) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let payload = match Self::serialize(job) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let job_id = job.job_id.clone();
        let run_at_ms = job.run_at_ms;
        Box::pin(async move {
            let mut pipeline = redis::pipe();
            pipeline.atomic();
            pipeline
                .cmd("HSET")
                .arg(&self.keys.payloads)
                .arg(&job_id)
                .arg(payload)
                .ignore();
            if run_at_ms <= now_ms() {
                pipeline.cmd("RPUSH").arg(&self.keys.ready).arg(&job_id).ignore();
            } else {
                pipeline
                    .cmd("ZADD")
                    .arg(&self.keys.delayed)
                    .arg(run_at_ms)
                    .arg(&job_id)
                    .ignore();
            }
            let mut conn = self.manager.clone();
            let () = pipeline.query_async(&mut conn).await.map_err(operation)?;
            Ok(())
        })
    }

    fn enqueue_if_absent(
        &self,
        job: &JobEnvelope,
        dedupe_ttl_ms: u64,
    ) -> BoxFuture<'_, Result<bool, JobQueueError>> {
        let payload = match Self::serialize(job) {
            Ok(payload) => payload,
            Err(err) => return Box::pin(async move { Err(err) }),
        };
        let job_id = job.job_id.clone();
        let run_at_ms = job.run_at_ms;
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let inserted: i32 = redis::Script::new(ENQUEUE_IF_ABSENT_SCRIPT)
                .key(&self.keys.payloads)
                .key(&self.keys.ready)
                .key(&self.keys.delayed)
                .key(self.keys.dedupe(&job_id))
                .arg(&job_id)
                .arg(payload)
                .arg(run_at_ms)
                .arg(now_ms())
                .arg(dedupe_ttl_ms.max(1) as i64)
                .invoke_async(&mut conn)
                .await
                .map_err(operation)?;
            Ok(inserted == 1)
        })
    }

    fn dequeue(
        &self,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Option<JobEnvelope>, JobQueueError>> {
        let timeout_secs = timeout.as_secs().max(1);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let job_id: Option<String> = redis::cmd("BRPOPLPUSH")
                .arg(&self.keys.ready)
                .arg(&self.keys.processing)
                .arg(timeout_secs)
                .query_async(&mut conn)
                .await
                .map_err(operation)?;
            let Some(job_id) = job_id else {
                return Ok(None);
            };
            let payload: Option<String> = redis::cmd("HGET")
                .arg(&self.keys.payloads)
                .arg(&job_id)
                .query_async(&mut conn)
                .await
                .map_err(operation)?;
            let Some(payload) = payload else {
                let _: i64 = redis::cmd("LREM")
                    .arg(&self.keys.processing)
                    .arg(1)
                    .arg(&job_id)
                    .query_async(&mut conn)
                    .await
                    .map_err(operation)?;
                return Err(JobQueueError::Operation(format!(
                    "missing payload for job_id {job_id}"
                )));
            };
            Ok(Some(Self::deserialize(&payload)?))
        })
    }

    fn ack(&self, job_id: &str) -> BoxFuture<'_, Result<(), JobQueueError>> {
        let job_id = job_id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let () = redis::pipe()
                .atomic()
                .cmd("LREM")
                .arg(&self.keys.processing)
                .arg(1)
                .arg(&job_id)
                .ignore()
                .cmd("HDEL")
                .arg(&self.keys.payloads)
                .arg(&job_id)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(operation)?;
            Ok(())
        })
    }

    fn promote_due(
        &self,
        now_ms: i64,
        limit: usize,
    ) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(0);
            }
            let mut conn = self.manager.clone();
            let moved: usize = redis::Script::new(PROMOTE_DUE_SCRIPT)
                .key(&self.keys.delayed)
                .key(&self.keys.ready)
                .arg(now_ms)
                .arg(limit)
                .invoke_async(&mut conn)
                .await
                .map_err(operation)?;
            Ok(moved)
        })
    }

    fn requeue_processing(&self, limit: usize) -> BoxFuture<'_, Result<usize, JobQueueError>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(0);
            }
            let mut conn = self.manager.clone();
            let moved: usize = redis::Script::new(REQUEUE_PROCESSING_SCRIPT)
                .key(&self.keys.processing)
                .key(&self.keys.ready)
                .arg(limit)
                .invoke_async(&mut conn)
                .await
                .map_err(operation)?;
            Ok(moved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keys_share_the_prefix() {
        let keys = QueueKeys::new("voluntra:jobs");
        assert_eq!(keys.ready, "voluntra:jobs:ready");
        assert_eq!(keys.delayed, "voluntra:jobs:delayed");
        assert_eq!(keys.processing, "voluntra:jobs:processing");
        assert_eq!(keys.dedupe("retention:1"), "voluntra:jobs:payloads:dedupe:retention:1");
    }
}
