use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::reconnect::RetryState;

/// Response modality negotiated with the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
    Video,
}

/// Configuration negotiated in the setup message of every connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    /// Requested response modalities (drives session duration and handle age)
    pub response_modalities: Vec<Modality>,

    /// System instruction, retained as the first turn of the context budget
    pub system_instruction: Option<String>,

    /// Prebuilt voice (e.g. "Aoede", "Puck", "Kore")
    pub voice_name: Option<String>,

    /// BCP-47 language code for speech output (e.g. "cmn-CN", "en-US")
    pub language_code: Option<String>,

    /// Ask the service to transcribe the user's audio
    pub input_transcription: bool,

    /// Ask the service to transcribe its own audio
    pub output_transcription: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            response_modalities: vec![Modality::Audio],
            system_instruction: None,
            voice_name: Some("Aoede".to_string()),
            language_code: None,
            input_transcription: true,
            output_transcription: true,
        }
    }
}

impl LiveConfig {
    pub fn includes_video(&self) -> bool {
        self.response_modalities.contains(&Modality::Video)
    }
}

/// Service limits that depend on modality and model class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Max session length when only audio/text is negotiated
    pub audio_session_secs: u64,

    /// Max session length when video is negotiated
    pub video_session_secs: u64,

    /// How long a resumption handle stays usable for audio-only sessions
    pub audio_handle_max_age_secs: u64,

    /// How long a resumption handle stays usable when video is negotiated
    pub video_handle_max_age_secs: u64,

    /// Context window of "native audio" model variants
    pub native_audio_context_tokens: u64,

    /// Context window of every other model
    pub default_context_tokens: u64,

    /// Lead time of the session timeout warning
    pub timeout_warning_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            audio_session_secs: 15 * 60,
            video_session_secs: 2 * 60,
            audio_handle_max_age_secs: 2 * 60 * 60,
            video_handle_max_age_secs: 10 * 60,
            native_audio_context_tokens: 128_000,
            default_context_tokens: 32_768,
            timeout_warning_secs: 30,
        }
    }
}

impl SessionPolicy {
    pub fn max_session_duration(&self, includes_video: bool) -> Duration {
        if includes_video {
            Duration::from_secs(self.video_session_secs)
        } else {
            Duration::from_secs(self.audio_session_secs)
        }
    }

    pub fn handle_max_age(&self, includes_video: bool) -> chrono::Duration {
        let secs = if includes_video {
            self.video_handle_max_age_secs
        } else {
            self.audio_handle_max_age_secs
        };
        chrono::Duration::seconds(secs as i64)
    }

    pub fn max_context_tokens(&self, model_id: &str) -> u64 {
        if is_native_audio_model(model_id) {
            self.native_audio_context_tokens
        } else {
            self.default_context_tokens
        }
    }
}

pub fn is_native_audio_model(model_id: &str) -> bool {
    model_id.contains("native-audio")
}

/// Runtime knobs of a `LiveSessionClient`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Bounded wait for the setup acknowledgment
    pub setup_timeout_secs: u64,

    /// Reconnect on forced termination or unexpected closure
    pub auto_reconnect: bool,

    /// First reconnect delay
    pub retry_base_ms: u64,

    /// Reconnect delay ceiling
    pub retry_max_ms: u64,

    /// Reconnect attempts before settling into `Disconnected`
    pub max_reconnect_attempts: u32,

    /// Capacity of the event broadcast channel
    pub event_buffer: usize,

    pub policy: SessionPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            setup_timeout_secs: 10,
            auto_reconnect: true,
            retry_base_ms: 1_000,
            retry_max_ms: 30_000,
            max_reconnect_attempts: 5,
            event_buffer: 512,
            policy: SessionPolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn retry_state(&self) -> RetryState {
        RetryState::new(
            Duration::from_millis(self.retry_base_ms),
            Duration::from_millis(self.retry_max_ms),
            self.max_reconnect_attempts,
        )
    }
}
