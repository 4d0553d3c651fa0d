//! Task record storage.
//!
//! The [`TaskStore`] trait is the single seam between the orchestrator, the
//! HTTP layer and whichever backend holds task records:
//!
//! - [`MemoryTaskStore`]: process-local map, no expiry.
//! - [`RedisTaskStore`]: JSON records under `<prefix><task_id>` with a TTL.
//!
//! [`connect_task_store`] picks the backend once at startup.

mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use kbforge_shared::{Result, TaskId, TaskRecord, TaskStoreConfig, TaskUpdate};

pub use memory::MemoryTaskStore;
pub use redis_store::RedisTaskStore;

/// Keyed storage of [`TaskRecord`]s.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a record, `None` if unknown (or expired).
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>>;

    /// Insert or replace a record.
    async fn set(&self, id: &TaskId, record: &TaskRecord) -> Result<()>;

    /// Merge a partial update into an existing record.
    ///
    /// Returns `false` when the record does not exist or refuses the update
    /// (terminal state).
    async fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<bool>;

    async fn exists(&self, id: &TaskId) -> Result<bool>;

    /// All records, in no particular order.
    async fn list(&self) -> Result<Vec<TaskRecord>>;

    async fn delete(&self, id: &TaskId) -> Result<()>;

    /// Short backend label for logs and the health route.
    fn backend_name(&self) -> &'static str;
}

/// Build the task store described by `config`.
///
/// With a Redis URL configured, a connection is attempted once; if Redis is
/// unreachable the in-memory backend is used instead.
pub async fn connect_task_store(config: &TaskStoreConfig) -> Arc<dyn TaskStore> {
    let Some(url) = config.redis_url.as_deref() else {
        tracing::info!(backend = "memory", "using in-memory task store");
        return Arc::new(MemoryTaskStore::new());
    };

    match RedisTaskStore::connect(url, &config.key_prefix, config.ttl_secs).await {
        Ok(store) => {
            tracing::info!(backend = "redis", "using redis task store");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(error = %e, "redis unavailable, falling back to in-memory task store");
            Arc::new(MemoryTaskStore::new())
        }
    }
}
