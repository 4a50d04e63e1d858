//! Live session client for the real-time inference service
//!
//! This module provides:
//! - Connection lifecycle with setup handshake and bounded setup timeout
//! - Demultiplexing of inbound frames into typed events
//! - Session-expiry countdown and automatic reconnection with resumption
//! - Context-window budget estimation and compression

pub mod budget;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use budget::{ContextBudget, RetainedTurn, TurnRole};
pub use client::{LiveSessionClient, ResumptionToken};
pub use config::{ClientSettings, LiveConfig, Modality, SessionPolicy};
pub use error::LiveError;
pub use events::{
    ConnectionState, LiveEvent, ResumptionUpdate, TranscriptAccumulator, TranscriptFragment,
    UpdateKind,
};
pub use messages::{ClientMessage, Content, FunctionCall, FunctionResponse, MediaChunk, MediaKind, Part};
pub use reconnect::RetryState;
pub use transport::{InboundFrame, Transport, TransportConnection, WebSocketTransport, LIVE_API_URL};
