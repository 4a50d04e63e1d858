//! Per-conversation session handle storage
//!
//! Resumption handles outlive a single connection: they are written on every
//! resumption update and cleared only when the service marks the session as
//! over, resumption fails, or the conversation is deleted.

mod error;
mod handle;
mod records;
mod store;

pub use error::StoreError;
pub use handle::SessionHandle;
pub use records::{ConversationRecord, ConversationRecords, JsonFileRecords};
pub use store::{HandleStore, DEFAULT_WRITE_ATTEMPTS, DEFAULT_WRITE_RETRY_DELAY};
