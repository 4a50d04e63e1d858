//! Session lifecycle orchestration
//!
//! Binds a conversation identifier to the live client's lifecycle:
//! - Chooses whether to offer a stored resumption handle on connect
//! - Falls back to a fresh session when resumption fails
//! - Writes resumption updates back to the handle store
//! - Waits for in-flight handle updates before switching conversations

mod error;
mod session;

pub use error::OrchestratorError;
pub use session::{OrchestratorSettings, SessionOrchestrator};
