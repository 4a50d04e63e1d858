use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Resumption handle persisted on a conversation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Opaque token issued by the service
    pub token: Option<String>,

    /// When the service issued the token
    pub issued_at: Option<DateTime<Utc>>,

    /// Whether the service reported the session as resumable
    pub resumable: bool,

    /// Video was negotiated (shorter max age)
    #[serde(default)]
    pub video: bool,
}

impl SessionHandle {
    pub fn issued(token: impl Into<String>, issued_at: DateTime<Utc>, video: bool) -> Self {
        Self {
            token: Some(token.into()),
            issued_at: Some(issued_at),
            resumable: true,
            video,
        }
    }

    /// Usable for resumption: has a token, is resumable and is young enough
    pub fn is_valid(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (&self.token, self.issued_at) {
            (Some(_), Some(issued_at)) => self.resumable && now - issued_at <= max_age,
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_within_max_age() {
        let now = Utc::now();
        let handle = SessionHandle::issued("abc", now - Duration::minutes(5), false);
        assert!(handle.is_valid(now, Duration::minutes(10)));
        assert!(!handle.is_valid(now, Duration::minutes(4)));
    }

    #[test]
    fn test_empty_handle_never_valid() {
        let handle = SessionHandle {
            token: None,
            issued_at: Some(Utc::now()),
            resumable: true,
            video: false,
        };
        assert!(!handle.is_valid(Utc::now(), Duration::hours(2)));
        assert!(!SessionHandle::default().is_valid(Utc::now(), Duration::hours(2)));
    }

    #[test]
    fn test_non_resumable_not_valid() {
        let mut handle = SessionHandle::issued("abc", Utc::now(), false);
        handle.resumable = false;
        assert!(!handle.is_valid(Utc::now(), Duration::hours(2)));
    }
}
