//! Session configuration for the realtime voice engine

use crate::{Error, Result};

/// Default realtime model
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

/// Default voice identifier
pub const DEFAULT_VOICE: &str = "alloy";

/// Default realtime endpoint (the model is appended as a query parameter)
pub const DEFAULT_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

/// Default input transcription model
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Default server-VAD silence threshold before a turn is considered done
pub const DEFAULT_VAD_SILENCE_MS: u32 = 1000;

/// Default sampling temperature for responses
pub const DEFAULT_TEMPERATURE: f64 = 0.8;

/// Default cap on response output tokens
pub const DEFAULT_MAX_RESPONSE_TOKENS: u32 = 4096;

/// Configuration for a realtime voice session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API key for the realtime service
    pub api_key: String,

    /// Realtime model identifier
    pub model: String,

    /// Voice identifier for audio responses
    pub voice: String,

    /// System instructions text, assembled by the caller (opaque here)
    pub instructions: String,

    /// Realtime WebSocket endpoint
    pub endpoint: String,

    /// Input transcription model
    pub transcription_model: String,

    /// Server-VAD silence threshold in milliseconds
    pub vad_silence_ms: u32,

    /// Sampling temperature for responses
    pub temperature: f64,

    /// Cap on response output tokens
    pub max_response_tokens: u32,
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the API key
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            instructions: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            vad_silence_ms: DEFAULT_VAD_SILENCE_MS,
            temperature: DEFAULT_TEMPERATURE,
            max_response_tokens: DEFAULT_MAX_RESPONSE_TOKENS,
        }
    }

    /// Set the realtime model identifier
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the voice identifier
    #[must_use]
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Set the system instructions text
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Override the realtime endpoint (useful for proxies and tests)
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// The full connection URL with the model query parameter
    #[must_use]
    pub fn connection_url(&self) -> String {
        format!("{}?model={}", self.endpoint, self.model)
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the API key is empty or the endpoint is not
    /// a WebSocket URL.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api key is empty".to_string()));
        }
        if !self.endpoint.starts_with("ws://") && !self.endpoint.starts_with("wss://") {
            return Err(Error::Config(format!(
                "endpoint is not a websocket url: {}",
                self.endpoint
            )));
        }
        Ok(())
    }
}
