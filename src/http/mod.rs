//! HTTP control API for the live session
//!
//! - GET /health - Health check
//! - GET /status - Connection state, active conversation, context budget
//! - GET /conversations - List conversations
//! - POST /conversations - Create a conversation
//! - POST /conversations/:id/connect - Connect (or switch) to a conversation
//! - POST /conversations/:id/messages - Send a text turn
//! - DELETE /conversations/:id/handle - Forget the stored resumption handle
//! - POST /disconnect - Close the live session, keeping its handle

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
