//! Document store on Redis.
//!
//! Each document is a hash at `{prefix}:doc:{path}` holding a version counter
//! `v` and the JSON fields `d`. A set at `{prefix}:col:{collection}` indexes
//! document paths per collection. Commits stage the batch locally through the
//! shared engine and apply it with a Lua compare-and-set on the versions that
//! were read; the same script appends the resulting changes to the stream
//! `{prefix}:changes`. Consumers read the stream from a cursor stored in the
//! hash `{prefix}:changes:cursors` and the stream is trimmed to the oldest
//! cursor on every acknowledgement.

use std::collections::BTreeMap;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamId, StreamReadOptions, StreamReadReply};
use voluntra_domain::ports::BoxFuture;
use voluntra_domain::ports::store::{
    ChangeEntry, CollectionPath, DocumentChange, DocumentPath, DocumentSnapshot, DocumentStore,
    Fields, Query, StoreError, WriteBatch,
};
use voluntra_domain::store::engine;

const COMMIT_RETRY_LIMIT: usize = 5;
const CHANGE_FIELD: &str = "change";
const STREAM_START: &str = "0-0";

const COMMIT_SCRIPT: &str = r#"
    local count = tonumber(ARGV[1])
    for i = 1, count do
        local key = KEYS[(i - 1) * 2 + 1]
        local expected = tonumber(ARGV[(i - 1) * 4 + 2])
        local current = tonumber(redis.call('HGET', key, 'v') or '0')
        if current ~= expected then
            return 0
        end
    end
    for i = 1, count do
        local key = KEYS[(i - 1) * 2 + 1]
        local collection_key = KEYS[(i - 1) * 2 + 2]
        local base = (i - 1) * 4 + 2
        local op = ARGV[base + 1]
        local payload = ARGV[base + 2]
        local path = ARGV[base + 3]
        if op == 'del' then
            redis.call('DEL', key)
            redis.call('SREM', collection_key, path)
        elseif op == 'set' then
            redis.call('HSET', key, 'v', tonumber(ARGV[base]) + 1, 'd', payload)
            redis.call('SADD', collection_key, path)
        end
    end
    local changes_key = KEYS[count * 2 + 1]
    local change_base = count * 4 + 2
    for i = 1, tonumber(ARGV[change_base]) do
        redis.call('XADD', changes_key, '*', 'change', ARGV[change_base + i])
    end
    return 1
"#;

const ACK_SCRIPT: &str = r#"
    local changes_key = KEYS[1]
    local cursors_key = KEYS[2]
    redis.call('HSET', cursors_key, ARGV[1], ARGV[2])
    local oldest_ms, oldest_seq
    for _, cursor in ipairs(redis.call('HVALS', cursors_key)) do
        local ms, seq = string.match(cursor, '^(%d+)%-(%d+)$')
        ms = tonumber(ms) or -1
        seq = tonumber(seq) or 0
        local older = oldest_ms == nil or ms < oldest_ms
            or (ms == oldest_ms and seq < oldest_seq)
        if ms >= 0 and older then
            oldest_ms = ms
            oldest_seq = seq
        end
    end
    if oldest_ms then
        redis.call('XTRIM', changes_key, 'MINID', string.format('%d-%d', oldest_ms, oldest_seq))
    end
    return 1
"#;

#[derive(Clone)]
pub struct RedisDocumentStore {
    manager: ConnectionManager,
    prefix: String,
    commit_script: redis::Script,
    ack_script: redis::Script,
}

struct ReadState {
    versions: BTreeMap<DocumentPath, i64>,
    current: BTreeMap<DocumentPath, Option<Fields>>,
}

impl RedisDocumentStore {
    pub async fn connect_with_prefix(
        redis_url: &str,
        prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| StoreError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
            commit_script: redis::Script::new(COMMIT_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
        })
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(())
    }

    async fn read_paths(&self, paths: &[DocumentPath]) -> Result<ReadState, StoreError> {
        let mut pipeline = redis::pipe();
        for path in paths {
            pipeline
                .cmd("HMGET")
                .arg(document_key(&self.prefix, path))
                .arg("v")
                .arg("d");
        }
        let mut conn = self.manager.clone();
        let rows: Vec<(Option<i64>, Option<String>)> = pipeline
            .query_async(&mut conn)
            .await
            .map_err(|err| StoreError::Operation(err.to_string()))?;

        let mut state = ReadState {
            versions: BTreeMap::new(),
            current: BTreeMap::new(),
        };
        for (path, (version, data)) in paths.iter().zip(rows) {
            let fields = data.as_deref().map(decode_fields).transpose()?;
            state.versions.insert(path.clone(), version.unwrap_or(0));
            state.current.insert(path.clone(), fields);
        }
        Ok(state)
    }

    async fn try_commit(&self, batch: &WriteBatch) -> Result<bool, StoreError> {
        let mut paths: Vec<DocumentPath> = batch
            .writes()
            .iter()
            .map(|write| write.path().clone())
            .collect();
        paths.sort();
        paths.dedup();

        let read = self.read_paths(&paths).await?;
        let now_ms = voluntra_domain::jobs::now_ms();
        let staged = engine::stage_batch(&read.current, batch.writes(), now_ms)?;
        let changes = engine::diff_changes(&read.current, &staged);
        if changes.is_empty() {
            return Ok(true);
        }
        let encoded_changes = changes
            .iter()
            .map(encode_change)
            .collect::<Result<Vec<_>, _>>()?;

        let mut invocation = self.commit_script.prepare_invoke();
        invocation.arg(paths.len());
        for path in &paths {
            let next = staged.get(path).cloned().flatten();
            let unchanged = read.current.get(path).cloned().flatten() == next;
            let (op, payload) = match (unchanged, next) {
                (true, _) => ("keep", String::new()),
                (false, Some(fields)) => ("set", encode_fields(&fields)?),
                (false, None) => ("del", String::new()),
            };
            invocation
                .key(document_key(&self.prefix, path))
                .key(collection_key(&self.prefix, &path.collection()));
            invocation
                .arg(read.versions.get(path).copied().unwrap_or(0))
                .arg(op)
                .arg(payload)
                .arg(path.as_str());
        }
        invocation.key(changes_key(&self.prefix));
        invocation.arg(encoded_changes.len());
        for change in encoded_changes {
            invocation.arg(change);
        }

        let mut conn = self.manager.clone();
        let applied: i32 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|err| StoreError::Operation(err.to_string()))?;
        Ok(applied == 1)
    }
}

impl DocumentStore for RedisDocumentStore {
    fn get(
        &self,
        path: &DocumentPath,
    ) -> BoxFuture<'_, Result<Option<DocumentSnapshot>, StoreError>> {
        let path = path.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let data: Option<String> = redis::cmd("HGET")
                .arg(document_key(&self.prefix, &path))
                .arg("d")
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            match data {
                Some(data) => Ok(Some(DocumentSnapshot {
                    fields: decode_fields(&data)?,
                    path,
                })),
                None => Ok(None),
            }
        })
    }

    fn query(&self, query: &Query) -> BoxFuture<'_, Result<Vec<DocumentSnapshot>, StoreError>> {
        let query = query.clone();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let members: Vec<String> = redis::cmd("SMEMBERS")
                .arg(collection_key(&self.prefix, &query.collection))
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            if members.is_empty() {
                return Ok(vec![]);
            }

            let paths = members
                .iter()
                .map(|member| DocumentPath::parse(member))
                .collect::<Result<Vec<_>, _>>()?;
            let mut pipeline = redis::pipe();
            for path in &paths {
                pipeline
                    .cmd("HGET")
                    .arg(document_key(&self.prefix, path))
                    .arg("d");
            }
            let rows: Vec<Option<String>> = pipeline
                .query_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;

            let mut candidates = Vec::with_capacity(rows.len());
            for (path, data) in paths.into_iter().zip(rows) {
                // Deleted between SMEMBERS and HGET.
                let Some(data) = data else {
                    continue;
                };
                candidates.push(DocumentSnapshot {
                    path,
                    fields: decode_fields(&data)?,
                });
            }
            Ok(engine::run_query(&query, candidates))
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if batch.is_empty() {
                return Ok(());
            }
            for attempt in 1..=COMMIT_RETRY_LIMIT {
                if self.try_commit(&batch).await? {
                    return Ok(());
                }
                tracing::debug!(
                    attempt,
                    writes = batch.len(),
                    "document commit lost a version race"
                );
            }
            Err(StoreError::Conflict(format!(
                "gave up after {COMMIT_RETRY_LIMIT} attempts"
            )))
        })
    }

    fn read_changes(
        &self,
        consumer: &str,
        limit: usize,
        wait: Duration,
    ) -> BoxFuture<'_, Result<Vec<ChangeEntry>, StoreError>> {
        let consumer = consumer.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let cursors = cursors_key(&self.prefix);
            let cursor: Option<String> = conn
                .hget(&cursors, &consumer)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            let cursor = match cursor {
                Some(cursor) => cursor,
                None => {
                    // Registers the consumer so trimming keeps its backlog.
                    let _: bool = conn
                        .hset_nx(&cursors, &consumer, STREAM_START)
                        .await
                        .map_err(|err| StoreError::Operation(err.to_string()))?;
                    STREAM_START.to_string()
                }
            };

            let mut options = StreamReadOptions::default().count(limit.max(1));
            if !wait.is_zero() {
                options = options.block(wait.as_millis().max(1) as usize);
            }
            let reply: Option<StreamReadReply> = conn
                .xread_options(&[changes_key(&self.prefix)], &[cursor], &options)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            let Some(reply) = reply else {
                return Ok(vec![]);
            };
            reply
                .keys
                .iter()
                .flat_map(|key| key.ids.iter())
                .map(decode_entry)
                .collect()
        })
    }

    fn ack_changes(&self, consumer: &str, id: &str) -> BoxFuture<'_, Result<(), StoreError>> {
        let consumer = consumer.to_string();
        let id = id.to_string();
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let _: i32 = self
                .ack_script
                .key(changes_key(&self.prefix))
                .key(cursors_key(&self.prefix))
                .arg(consumer)
                .arg(id)
                .invoke_async(&mut conn)
                .await
                .map_err(|err| StoreError::Operation(err.to_string()))?;
            Ok(())
        })
    }
}

fn document_key(prefix: &str, path: &DocumentPath) -> String {
    format!("{prefix}:doc:{path}")
}

fn collection_key(prefix: &str, collection: &CollectionPath) -> String {
    format!("{prefix}:col:{collection}")
}

fn changes_key(prefix: &str) -> String {
    format!("{prefix}:changes")
}

fn cursors_key(prefix: &str) -> String {
    format!("{prefix}:changes:cursors")
}

fn encode_change(change: &DocumentChange) -> Result<String, StoreError> {
    serde_json::to_string(change).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn decode_entry(entry: &StreamId) -> Result<ChangeEntry, StoreError> {
    let payload: String = entry.get(CHANGE_FIELD).ok_or_else(|| {
        StoreError::Serialization(format!("change log entry {} has no payload", entry.id))
    })?;
    let change = serde_json::from_str(&payload)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(ChangeEntry {
        id: entry.id.clone(),
        change,
    })
}

fn encode_fields(fields: &Fields) -> Result<String, StoreError> {
    serde_json::to_string(fields).map_err(|err| StoreError::Serialization(err.to_string()))
}

fn decode_fields(data: &str) -> Result<Fields, StoreError> {
    serde_json::from_str(data).map_err(|err| StoreError::Serialization(err.to_string()))
}
