use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::messages::{FunctionCall, Part};

/// Connection lifecycle of a `LiveSessionClient`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Transport open, setup not yet acknowledged
    Connected,
    /// Setup acknowledged; content may flow
    Ready,
    Reconnecting,
}

impl ConnectionState {
    /// A connection attempt is in flight.
    pub fn is_pending(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Reconnecting)
    }
}

/// One transcription delta. Fragments are concatenated by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub text: String,
    pub is_final: bool,
}

/// Resumption handle update pushed by the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionUpdate {
    pub resumable: bool,
    pub new_handle: Option<String>,
}

/// How a `ResumptionUpdate` should be acted upon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    /// A fresh handle to persist
    Renewed(String),
    /// Still resumable, no new handle: keep what is stored
    KeepCurrent,
    /// Not resumable and no handle. Also emitted right after a successful
    /// resumption, so it is not proof the session is over.
    Ambiguous,
    /// Not resumable and the service still sent a handle: the old one is dead
    NotResumable,
}

impl ResumptionUpdate {
    pub fn kind(&self) -> UpdateKind {
        let handle = self.new_handle.as_deref().filter(|h| !h.is_empty());
        match (self.resumable, handle) {
            (true, Some(h)) => UpdateKind::Renewed(h.to_string()),
            (true, None) => UpdateKind::KeepCurrent,
            (false, None) => UpdateKind::Ambiguous,
            (false, Some(_)) => UpdateKind::NotResumable,
        }
    }
}

/// Typed, demultiplexed events emitted by the client
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Open,
    Close { reason: String },
    Error { message: String, terminal: bool },
    SetupAcknowledged,
    /// Decoded audio chunk for playback
    Audio { data: Vec<u8>, mime_type: String },
    /// Non-audio turn content
    Content(Part),
    InputTranscriptFragment(TranscriptFragment),
    OutputTranscriptFragment(TranscriptFragment),
    /// Generation cancelled mid-turn; stop local playback now
    Interrupted,
    TurnComplete,
    ToolCall(Vec<FunctionCall>),
    ToolCallCancellation(Vec<String>),
    SessionResumptionUpdate(ResumptionUpdate),
    ForcedTermination {
        reason: String,
        time_left: Option<Duration>,
    },
    SessionTimeoutWarning { time_left: Duration },
    /// About to retry the transport. `resuming` is set when the last
    /// resumption handle will be offered.
    Reconnecting {
        attempt: u32,
        delay: Duration,
        resuming: bool,
    },
    Reconnected,
    /// The handle offered while reconnecting was refused; it will not be
    /// offered again
    ResumptionRejected { reason: String },
}

/// Concatenates transcript deltas into the running text of one turn.
#[derive(Debug, Clone, Default)]
pub struct TranscriptAccumulator {
    text: String,
    is_final: bool,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. A fragment arriving after a final one starts a new
    /// utterance.
    pub fn push(&mut self, fragment: &TranscriptFragment) {
        if self.is_final {
            self.text.clear();
            self.is_final = false;
        }
        self.text.push_str(&fragment.text);
        self.is_final = fragment.is_final;
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Return the accumulated text and start over.
    pub fn take(&mut self) -> String {
        self.is_final = false;
        std::mem::take(&mut self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(text: &str, is_final: bool) -> TranscriptFragment {
        TranscriptFragment {
            text: text.to_string(),
            is_final,
        }
    }

    #[test]
    fn test_fragments_are_deltas() {
        let mut acc = TranscriptAccumulator::new();
        acc.push(&fragment("Hel", false));
        assert_eq!(acc.text(), "Hel");
        assert!(!acc.is_final());

        acc.push(&fragment("lo world", true));
        assert_eq!(acc.text(), "Hello world");
        assert!(acc.is_final());
    }

    #[test]
    fn test_new_utterance_after_final() {
        let mut acc = TranscriptAccumulator::new();
        acc.push(&fragment("First.", true));
        acc.push(&fragment("Second", false));
        assert_eq!(acc.text(), "Second");

        assert_eq!(acc.take(), "Second");
        assert!(acc.is_empty());
    }

    #[test]
    fn test_update_classification() {
        let renewed = ResumptionUpdate {
            resumable: true,
            new_handle: Some("abc".into()),
        };
        assert_eq!(renewed.kind(), UpdateKind::Renewed("abc".into()));

        let ambiguous = ResumptionUpdate {
            resumable: false,
            new_handle: None,
        };
        assert_eq!(ambiguous.kind(), UpdateKind::Ambiguous);

        let empty_handle = ResumptionUpdate {
            resumable: false,
            new_handle: Some(String::new()),
        };
        assert_eq!(empty_handle.kind(), UpdateKind::Ambiguous);

        let dead = ResumptionUpdate {
            resumable: false,
            new_handle: Some("old".into()),
        };
        assert_eq!(dead.kind(), UpdateKind::NotResumable);

        let keep = ResumptionUpdate {
            resumable: true,
            new_handle: None,
        };
        assert_eq!(keep.kind(), UpdateKind::KeepCurrent);
    }

    #[test]
    fn test_pending_states() {
        assert!(ConnectionState::Connecting.is_pending());
        assert!(ConnectionState::Reconnecting.is_pending());
        assert!(!ConnectionState::Ready.is_pending());
        assert!(!ConnectionState::Disconnected.is_pending());
    }
}
