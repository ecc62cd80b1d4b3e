use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub transcribe: TranscribeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscordConfig {
    /// App to run as. Defaults to the most recently stored bot credentials.
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_bin")]
    pub bin: String,
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,
    #[serde(default = "default_fallback_provider")]
    pub fallback_provider: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bin: default_agent_bin(),
            primary_provider: default_primary_provider(),
            fallback_provider: default_fallback_provider(),
        }
    }
}

fn default_agent_bin() -> String {
    "opencode".to_string()
}

fn default_primary_provider() -> String {
    "google".to_string()
}

fn default_fallback_provider() -> String {
    "openai".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_url")]
    pub url: String,
    #[serde(default = "default_realtime_model")]
    pub model: String,
    #[serde(default = "default_realtime_voice")]
    pub voice: String,
    /// Dump inbound 16 kHz PCM to a file under the data dir.
    #[serde(default)]
    pub debug_audio: bool,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            model: default_realtime_model(),
            voice: default_realtime_voice(),
            debug_audio: false,
        }
    }
}

fn default_realtime_url() -> String {
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string()
}

fn default_realtime_model() -> String {
    "models/gemini-2.0-flash-live-001".to_string()
}

fn default_realtime_voice() -> String {
    "Puck".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscribeConfig {
    #[serde(default = "default_primary_stt_url")]
    pub primary_url: String,
    #[serde(default = "default_primary_stt_model")]
    pub primary_model: String,
    #[serde(default = "default_fallback_stt_url")]
    pub fallback_url: String,
    #[serde(default = "default_fallback_stt_model")]
    pub fallback_model: String,
    pub language: Option<String>,
}

impl Default for TranscribeConfig {
    fn default() -> Self {
        Self {
            primary_url: default_primary_stt_url(),
            primary_model: default_primary_stt_model(),
            fallback_url: default_fallback_stt_url(),
            fallback_model: default_fallback_stt_model(),
            language: None,
        }
    }
}

fn default_primary_stt_url() -> String {
    "https://api.groq.com/openai/v1/audio/transcriptions".to_string()
}

fn default_primary_stt_model() -> String {
    "whisper-large-v3-turbo".to_string()
}

fn default_fallback_stt_url() -> String {
    "https://api.openai.com/v1/audio/transcriptions".to_string()
}

fn default_fallback_stt_model() -> String {
    "whisper-1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("remote-vibe")
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// `config.toml` next to the binary is optional; everything has defaults
    /// and credentials live in the store.
    pub fn load() -> Result<Self> {
        match std::fs::metadata("config.toml") {
            Ok(_) => Self::from_file("config.toml"),
            Err(_) => Ok(Self::default()),
        }
    }
}
