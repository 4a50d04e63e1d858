use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::StoreError;
use super::handle::SessionHandle;

/// Backing store of conversation records, as seen by the handle store.
///
/// Writes are not transactional with the component that creates
/// conversations; a record may appear on disk before this view sees it.
#[async_trait]
pub trait ConversationRecords: Send + Sync {
    /// Stored handle, `None` when the conversation or its handle is absent
    async fn load_handle(&self, conversation_id: &str) -> Result<Option<SessionHandle>, StoreError>;

    /// Fails with `ConversationNotFound` when the record does not exist
    async fn save_handle(&self, conversation_id: &str, handle: SessionHandle) -> Result<(), StoreError>;

    /// Fails with `ConversationNotFound` when the record does not exist
    async fn clear_handle(&self, conversation_id: &str) -> Result<(), StoreError>;

    /// Reload from the authoritative copy
    async fn resync(&self) -> Result<(), StoreError>;
}

/// One conversation thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub handle: SessionHandle,
}

/// Conversation records kept in a JSON file, cached in memory
pub struct JsonFileRecords {
    /// `None` keeps everything in memory
    path: Option<PathBuf>,
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl JsonFileRecords {
    /// Open (or start) the records file at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = read_records(&path).await?;
        info!("Loaded {} conversations from {}", records.len(), path.display());

        Ok(Self {
            path: Some(path),
            records: RwLock::new(records),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a conversation; returns the existing record if the id is taken
    pub async fn create_conversation(
        &self,
        id: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<ConversationRecord, StoreError> {
        let id = id.into();
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&id) {
            return Ok(existing.clone());
        }

        let record = ConversationRecord {
            id: id.clone(),
            title: title.into(),
            created_at: Utc::now(),
            handle: SessionHandle::default(),
        };
        records.insert(id.clone(), record.clone());
        self.persist(&records).await?;
        info!("Created conversation {}", id);

        Ok(record)
    }

    pub async fn list_conversations(&self) -> Vec<ConversationRecord> {
        let records = self.records.read().await;
        let mut list: Vec<_> = records.values().cloned().collect();
        list.sort_by_key(|r| r.created_at);
        list
    }

    pub async fn get_conversation(&self, id: &str) -> Option<ConversationRecord> {
        self.records.read().await.get(id).cloned()
    }

    async fn persist(&self, records: &HashMap<String, ConversationRecord>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Persisted {} conversations", records.len());
        Ok(())
    }
}

async fn read_records(path: &Path) -> Result<HashMap<String, ConversationRecord>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ConversationRecords for JsonFileRecords {
    async fn load_handle(&self, conversation_id: &str) -> Result<Option<SessionHandle>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .get(conversation_id)
            .map(|r| r.handle.clone())
            .filter(|h| !h.is_empty()))
    }

    async fn save_handle(&self, conversation_id: &str, handle: SessionHandle) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        record.handle = handle;
        self.persist(&records).await
    }

    async fn clear_handle(&self, conversation_id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
        if record.handle.is_empty() && !record.handle.resumable {
            return Ok(());
        }
        record.handle = SessionHandle::default();
        self.persist(&records).await
    }

    async fn resync(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = read_records(path).await?;
        info!("Resynced {} conversations from {}", fresh.len(), path.display());
        *self.records.write().await = fresh;
        Ok(())
    }
}
