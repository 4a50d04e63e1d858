use std::time::Duration;

/// Errors surfaced by the live session client.
#[derive(thiserror::Error, Debug, Clone)]
pub enum LiveError {
    /// The service never acknowledged the setup message.
    #[error("setup acknowledgment not received within {0:?}")]
    SetupTimeout(Duration),

    /// The underlying connection failed or closed unexpectedly.
    #[error("transport: {0}")]
    Transport(String),

    /// The service refused the resumption handle we offered.
    #[error("resumption rejected: {0}")]
    ResumptionRejected(String),

    /// The connection was torn down by `disconnect` while connecting.
    #[error("connection cancelled")]
    Cancelled,

    /// Automatic reconnection gave up.
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
}

impl LiveError {
    /// Whether retrying with a fresh (tokenless) session may succeed.
    pub fn is_resumption_related(&self) -> bool {
        match self {
            LiveError::SetupTimeout(_) | LiveError::ResumptionRejected(_) => true,
            LiveError::Transport(msg) => looks_like_session_error(msg),
            _ => false,
        }
    }
}

/// Close reasons the service uses when a session handle is unusable.
pub(crate) fn looks_like_session_error(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("session") || reason.contains("resum") || reason.contains("handle")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_timeout_is_resumption_related() {
        assert!(LiveError::SetupTimeout(Duration::from_secs(10)).is_resumption_related());
        assert!(LiveError::ResumptionRejected("bad".into()).is_resumption_related());
    }

    #[test]
    fn test_transport_error_shape() {
        assert!(LiveError::Transport("Invalid session handle".into()).is_resumption_related());
        assert!(!LiveError::Transport("connection refused".into()).is_resumption_related());
        assert!(!LiveError::Cancelled.is_resumption_related());
    }
}
