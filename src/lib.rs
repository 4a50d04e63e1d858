pub mod config;
pub mod handles;
pub mod http;
pub mod live;
pub mod orchestrator;
pub mod recording;

pub use config::Config;
pub use handles::{HandleStore, JsonFileRecords, SessionHandle, StoreError};
pub use http::{create_router, AppState};
pub use live::{
    ClientSettings, ConnectionState, LiveConfig, LiveError, LiveEvent, LiveSessionClient,
    Transport, WebSocketTransport,
};
pub use orchestrator::{OrchestratorError, OrchestratorSettings, SessionOrchestrator};
pub use recording::{TurnRecorder, TurnRecorderConfig};
