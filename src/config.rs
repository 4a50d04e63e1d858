use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::live::{ClientSettings, LiveConfig, Modality, LIVE_API_URL};
use crate::orchestrator::OrchestratorSettings;

/// Environment variables checked for the service API key, in order
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"];

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub live: LiveSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-live".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveSection {
    pub model: String,
    pub endpoint: String,
    /// Falls back to `GEMINI_API_KEY` / `GOOGLE_AI_API_KEY`
    pub api_key: Option<String>,
    pub response_modalities: Vec<Modality>,
    pub system_instruction: Option<String>,
    pub voice_name: Option<String>,
    pub language_code: Option<String>,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub switch_wait_ms: u64,
    pub client: ClientSettings,
}

impl Default for LiveSection {
    fn default() -> Self {
        let live = LiveConfig::default();
        Self {
            model: OrchestratorSettings::default().model_id,
            endpoint: LIVE_API_URL.to_string(),
            api_key: None,
            response_modalities: live.response_modalities,
            system_instruction: live.system_instruction,
            voice_name: live.voice_name,
            language_code: live.language_code,
            input_transcription: live.input_transcription,
            output_transcription: live.output_transcription,
            switch_wait_ms: 3000,
            client: ClientSettings::default(),
        }
    }
}

impl LiveSection {
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig {
            response_modalities: self.response_modalities.clone(),
            system_instruction: self.system_instruction.clone(),
            voice_name: self.voice_name.clone(),
            language_code: self.language_code.clone(),
            input_transcription: self.input_transcription,
            output_transcription: self.output_transcription,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            model_id: self.model.clone(),
            live_config: self.live_config(),
            switch_wait: Duration::from_millis(self.switch_wait_ms),
        }
    }

    /// Configured key, else the first non-empty key variable
    pub fn resolve_api_key(&self) -> Result<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }
        API_KEY_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|k| !k.is_empty()))
            .with_context(|| format!("No API key: set live.api_key or one of {:?}", API_KEY_VARS))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub conversations_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_path: "~/.loqa/live/conversations.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn conversations_path(&self) -> PathBuf {
        expand_path(&self.conversations_path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub recordings_path: String,
    pub output_sample_rate: u32,
    pub record: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            recordings_path: "~/.loqa/live/recordings".to_string(),
            output_sample_rate: crate::recording::RESPONSE_SAMPLE_RATE,
            record: true,
        }
    }
}

impl AudioConfig {
    pub fn recordings_path(&self) -> PathBuf {
        expand_path(&self.recordings_path)
    }
}

impl Config {
    /// Load `<path>.toml` if present, then apply `LOQA_LIVE__*` overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA_LIVE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        Ok(settings.try_deserialize()?)
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = Config::load("config/does-not-exist").unwrap();
        assert_eq!(cfg.service.http.port, 3030);
        assert_eq!(cfg.live.client.setup_timeout_secs, 10);
        assert_eq!(cfg.live.orchestrator_settings().switch_wait, Duration::from_secs(3));
    }

    #[test]
    fn test_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.toml");
        std::fs::write(
            &path,
            r#"
[live]
model = "gemini-2.5-flash-native-audio-preview"
response_modalities = ["AUDIO", "VIDEO"]
api_key = "from-file"

[live.client]
max_reconnect_attempts = 2

[storage]
conversations_path = "/tmp/conversations.json"
"#,
        )
        .unwrap();

        let cfg = Config::load(path.with_extension("").to_str().unwrap()).unwrap();
        assert_eq!(cfg.live.client.max_reconnect_attempts, 2);
        assert_eq!(cfg.live.client.retry_max_ms, 30_000);
        assert!(cfg.live.live_config().includes_video());
        assert_eq!(cfg.live.resolve_api_key().unwrap(), "from-file");
        assert_eq!(
            cfg.storage.conversations_path(),
            PathBuf::from("/tmp/conversations.json")
        );
    }

    #[test]
    fn test_tilde_expansion() {
        let expanded = expand_path("~/recordings");
        assert!(!expanded.to_string_lossy().starts_with('~'));
    }
}
