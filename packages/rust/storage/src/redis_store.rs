//! Redis-backed task store.
//!
//! Every record is a JSON string under `<prefix><task_id>` written with
//! `SET EX`, so abandoned tasks age out on their own. Updates are
//! read-modify-write; at most one writer exists per task id.

use async_trait::async_trait;
use kbforge_shared::{KbForgeError, Result, TaskId, TaskRecord, TaskUpdate};
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use crate::TaskStore;

#[derive(Clone)]
pub struct RedisTaskStore {
    connection: ConnectionManager,
    key_prefix: String,
    ttl_secs: u64,
}

impl std::fmt::Debug for RedisTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTaskStore")
            .field("key_prefix", &self.key_prefix)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

fn storage_err(e: impl std::fmt::Display) -> KbForgeError {
    KbForgeError::Storage(e.to_string())
}

impl RedisTaskStore {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str, key_prefix: &str, ttl_secs: u64) -> Result<Self> {
        tracing::debug!(url, "connecting to redis");

        let client = Client::open(url).map_err(storage_err)?;
        let mut connection = ConnectionManager::new(client).await.map_err(storage_err)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|e| KbForgeError::Storage(format!("redis ping failed: {e}")))?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.to_string(),
            ttl_secs,
        })
    }

    fn key(&self, id: &TaskId) -> String {
        record_key(&self.key_prefix, id)
    }

    async fn read(&self, key: &str) -> Result<Option<TaskRecord>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await.map_err(storage_err)?;
        value.as_deref().map(decode_record).transpose()
    }

    async fn write(&self, key: &str, record: &TaskRecord) -> Result<()> {
        let payload = encode_record(record)?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(key, payload, self.ttl_secs)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        self.read(&self.key(id)).await
    }

    async fn set(&self, id: &TaskId, record: &TaskRecord) -> Result<()> {
        self.write(&self.key(id), record).await
    }

    async fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<bool> {
        let key = self.key(id);
        let Some(mut record) = self.read(&key).await? else {
            return Ok(false);
        };
        if !record.apply(update) {
            return Ok(false);
        }
        self.write(&key, &record).await?;
        Ok(true)
    }

    async fn exists(&self, id: &TaskId) -> Result<bool> {
        let mut conn = self.connection.clone();
        conn.exists(self.key(id)).await.map_err(storage_err)
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        let mut conn = self.connection.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}*", self.key_prefix))
            .await
            .map_err(storage_err)?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match self.read(&key).await {
                Ok(Some(record)) => records.push(record),
                // Expired between KEYS and GET
                Ok(None) => {}
                Err(e) => tracing::warn!(key, error = %e, "skipping unreadable task record"),
            }
        }
        Ok(records)
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.key(id)).await.map_err(storage_err)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn record_key(prefix: &str, id: &TaskId) -> String {
    format!("{prefix}{id}")
}

fn encode_record(record: &TaskRecord) -> Result<String> {
    serde_json::to_string(record).map_err(storage_err)
}

fn decode_record(raw: &str) -> Result<TaskRecord> {
    serde_json::from_str(raw).map_err(storage_err)
}
