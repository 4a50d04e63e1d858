use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::StoreError;
use super::handle::SessionHandle;
use super::records::ConversationRecords;
use crate::live::SessionPolicy;

/// Write attempts before falling back to a resync
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Base delay between write attempts (grows linearly)
pub const DEFAULT_WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-conversation resumption handles.
///
/// `get_handle` / `store_handle` / `clear_handle` are the only way handles
/// change. Writes tolerate a conversation record that does not exist yet:
/// they retry, then resync the backing records once before failing.
pub struct HandleStore {
    records: Arc<dyn ConversationRecords>,
    policy: SessionPolicy,
    write_attempts: u32,
    retry_delay: Duration,
}

impl HandleStore {
    pub fn new(records: Arc<dyn ConversationRecords>, policy: SessionPolicy) -> Self {
        Self {
            records,
            policy,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            retry_delay: DEFAULT_WRITE_RETRY_DELAY,
        }
    }

    pub fn with_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.write_attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    /// Token for `conversation_id`, or `None` if absent, expired or not resumable
    pub async fn get_handle(&self, conversation_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .valid_handle(conversation_id)
            .await?
            .and_then(|handle| handle.token))
    }

    /// Like `get_handle`, keeping the issue time alongside the token
    pub async fn valid_handle(&self, conversation_id: &str) -> Result<Option<SessionHandle>, StoreError> {
        let Some(handle) = self.records.load_handle(conversation_id).await? else {
            return Ok(None);
        };

        let max_age = self.policy.handle_max_age(handle.video);
        if handle.is_valid(Utc::now(), max_age) {
            Ok(Some(handle))
        } else {
            debug!("Stored handle for {} is no longer valid", conversation_id);
            Ok(None)
        }
    }

    /// Raw stored handle, valid or not
    pub async fn handle_record(&self, conversation_id: &str) -> Result<Option<SessionHandle>, StoreError> {
        self.records.load_handle(conversation_id).await
    }

    /// Persist a freshly issued token for `conversation_id`
    pub async fn store_handle(
        &self,
        conversation_id: &str,
        token: &str,
        video: bool,
    ) -> Result<(), StoreError> {
        let handle = SessionHandle::issued(token, Utc::now(), video);

        for attempt in 1..=self.write_attempts {
            match self.records.save_handle(conversation_id, handle.clone()).await {
                Ok(()) => {
                    debug!("Stored resumption handle for {}", conversation_id);
                    return Ok(());
                }
                Err(StoreError::ConversationNotFound(_)) => {
                    debug!(
                        "Conversation {} not found on write attempt {}/{}",
                        conversation_id, attempt, self.write_attempts
                    );
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "Conversation {} still missing, resyncing records before a last attempt",
            conversation_id
        );
        self.records.resync().await?;

        match self.records.save_handle(conversation_id, handle).await {
            Ok(()) => {
                info!("Stored resumption handle for {} after resync", conversation_id);
                Ok(())
            }
            Err(StoreError::ConversationNotFound(_)) => Err(StoreError::WriteExhausted {
                conversation_id: conversation_id.to_string(),
                attempts: self.write_attempts + 1,
            }),
            Err(e) => Err(e),
        }
    }

    /// Forget the handle; a missing conversation or handle is not an error
    pub async fn clear_handle(&self, conversation_id: &str) -> Result<(), StoreError> {
        match self.records.clear_handle(conversation_id).await {
            Ok(()) | Err(StoreError::ConversationNotFound(_)) => {
                debug!("Cleared resumption handle for {}", conversation_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
