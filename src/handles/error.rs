/// Errors from the session handle store and its backing records
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The conversation record does not exist (yet)
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// The conversation record never appeared, even after a resync
    #[error("failed to store handle for {conversation_id} after {attempts} attempts")]
    WriteExhausted {
        conversation_id: String,
        attempts: u32,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
