use std::collections::HashMap;

use async_trait::async_trait;
use kbforge_shared::{Result, TaskId, TaskRecord, TaskUpdate};
use tokio::sync::RwLock;

use crate::TaskStore;

/// Process-local task store. Records live until deleted or the process exits.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn set(&self, id: &TaskId, record: &TaskRecord) -> Result<()> {
        self.records.write().await.insert(id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<bool> {
        let mut records = self.records.write().await;
        Ok(match records.get_mut(id) {
            Some(record) => record.apply(update),
            None => false,
        })
    }

    async fn exists(&self, id: &TaskId) -> Result<bool> {
        Ok(self.records.read().await.contains_key(id))
    }

    async fn list(&self) -> Result<Vec<TaskRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
