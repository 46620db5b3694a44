use gemini_realtime::config::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_VOICE};
use gemini_realtime::{CaptureConfig, CompressionPolicy, LiveConfig};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_CHAT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub gemini_api_key: SecretString,
    pub live_endpoint: String,
    pub live_model: String,
    pub voice: String,
    pub system_instruction: Option<String>,
    pub compression_trigger_tokens: Option<u64>,
    pub input_gain: f32,
    pub chat_model: String,
    pub chat_api_base: String,
    pub log_level: Level,
    pub workspace_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_endpoint =
            std::env::var("LIVE_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let live_model = std::env::var("LIVE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let voice = std::env::var("LIVE_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
        let system_instruction = std::env::var("SYSTEM_INSTRUCTION")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let compression_trigger_tokens = match std::env::var("LIVE_COMPRESSION_TRIGGER_TOKENS") {
            Ok(raw) => Some(raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("LIVE_COMPRESSION_TRIGGER_TOKENS".to_string(), e.to_string())
            })?),
            Err(_) => None,
        };

        let input_gain = match std::env::var("LIVE_INPUT_GAIN") {
            Ok(raw) => raw
                .parse::<f32>()
                .ok()
                .filter(|g| g.is_finite() && *g >= 0.0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "LIVE_INPUT_GAIN".to_string(),
                        format!("'{}' is not a non-negative number", raw),
                    )
                })?,
            Err(_) => 1.0,
        };

        let chat_model =
            std::env::var("CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());
        let chat_api_base =
            std::env::var("CHAT_API_BASE").unwrap_or_else(|_| DEFAULT_CHAT_API_BASE.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./workspace"));

        Ok(Self {
            gemini_api_key,
            live_endpoint,
            live_model,
            voice,
            system_instruction,
            compression_trigger_tokens,
            input_gain,
            chat_model,
            chat_api_base,
            log_level,
            workspace_path,
        })
    }

    /// Session settings for the live connection.
    pub fn live_config(&self) -> LiveConfig {
        let mut live = LiveConfig::new(SecretString::from(
            self.gemini_api_key.expose_secret().to_string(),
        ));
        live.endpoint = self.live_endpoint.clone();
        live.model = self.live_model.clone();
        live.voice = self.voice.clone();
        live.system_instruction = self.system_instruction.clone();
        live.compression = CompressionPolicy {
            trigger_tokens: self.compression_trigger_tokens,
            target_tokens: None,
        };
        live.capture = CaptureConfig {
            gain: self.input_gain,
            ..CaptureConfig::default()
        };
        live
    }
}
