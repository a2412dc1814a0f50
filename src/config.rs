use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "wss://openspeech.bytedance.com/api/v3/realtime/dialogue";
pub const DEFAULT_RESOURCE_ID: &str = "volc.speech.dialog";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("Invalid endpoint URL: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

impl ConfigError {
    fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Credentials for the dialogue service
#[derive(Debug)]
pub struct ApiConfig {
    pub app_id: String,
    pub access_key: SecretBox<String>,
    pub app_key: String,
    pub resource_id: String,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let app_id = Self::required(&lookup, "VOLC_APP_ID")?;
        let access_key = SecretBox::new(Box::new(Self::required(&lookup, "VOLC_ACCESS_KEY")?));
        let app_key = Self::required(&lookup, "VOLC_APP_KEY")?;
        let resource_id = match lookup("VOLC_RESOURCE_ID") {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::invalid("VOLC_RESOURCE_ID", "cannot be empty"))
            }
            Some(value) => value,
            None => DEFAULT_RESOURCE_ID.to_string(),
        };

        Ok(Self {
            app_id,
            access_key,
            app_key,
            resource_id,
        })
    }

    fn required<F>(lookup: &F, name: &str) -> Result<String, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = lookup(name).ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))?;
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(name, "cannot be empty"));
        }
        Ok(value)
    }

    /// Get the access key (use only when building the connection request)
    pub fn access_key(&self) -> &str {
        self.access_key.expose_secret()
    }

    /// Headers sent with the WebSocket upgrade request.
    pub fn connection_headers(&self, connect_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-Api-App-ID", self.app_id.clone()),
            ("X-Api-Access-Key", self.access_key().to_string()),
            ("X-Api-Resource-Id", self.resource_id.clone()),
            ("X-Api-App-Key", self.app_key.clone()),
            ("X-Api-Connect-Id", connect_id.to_string()),
        ]
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_value_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Microphone side. Blocks are mono s16le.
#[derive(Debug, Clone)]
pub struct InputAudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_frames: u32,
    /// Capture blocks that may wait for the network before new ones are dropped.
    pub queue_blocks: usize,
    pub device: Option<String>,
}

impl Default for InputAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            block_frames: 3200,
            queue_blocks: 32,
            device: None,
        }
    }
}

impl InputAudioConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("input sample rate", "must be non-zero"));
        }
        if self.channels == 0 {
            return Err(ConfigError::invalid("input channels", "must be non-zero"));
        }
        if self.block_frames == 0 {
            return Err(ConfigError::invalid("input block size", "must be non-zero"));
        }
        if self.queue_blocks == 0 {
            return Err(ConfigError::invalid("input queue depth", "must be non-zero"));
        }
        Ok(())
    }
}

/// Sample layout of server audio frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, strum::Display)]
pub enum OutputSampleFormat {
    /// 32-bit float little endian
    #[default]
    #[strum(serialize = "f32")]
    F32,
    /// 16-bit signed little endian
    #[strum(serialize = "s16")]
    S16,
}

impl OutputSampleFormat {
    /// Format name requested in the session's TTS audio config.
    pub fn wire_name(&self) -> &'static str {
        match self {
            OutputSampleFormat::F32 => "pcm",
            OutputSampleFormat::S16 => "pcm_s16le",
        }
    }
}

/// Speaker side.
#[derive(Debug, Clone)]
pub struct OutputAudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub block_frames: u32,
    pub format: OutputSampleFormat,
    pub max_buffered: Duration,
    pub device: Option<String>,
}

impl Default for OutputAudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            channels: 1,
            block_frames: 512,
            format: OutputSampleFormat::F32,
            max_buffered: Duration::from_secs(100),
            device: None,
        }
    }
}

impl OutputAudioConfig {
    /// Samples the playback ring buffer must hold.
    pub fn ring_capacity(&self) -> usize {
        (self.sample_rate as f64 * self.max_buffered.as_secs_f64()) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::invalid("output sample rate", "must be non-zero"));
        }
        if self.channels == 0 {
            return Err(ConfigError::invalid("output channels", "must be non-zero"));
        }
        if self.block_frames == 0 {
            return Err(ConfigError::invalid("output block size", "must be non-zero"));
        }
        if self.ring_capacity() == 0 {
            return Err(ConfigError::invalid(
                "max buffered duration",
                "must hold at least one sample",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub endpoint: String,
    pub response_timeout: Duration,
    pub drain_timeout: Duration,
    pub bot_name: String,
    /// Greeting spoken by the bot right after the session starts.
    pub greeting: Option<String>,
    pub strict_audit: bool,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            response_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            bot_name: "豆包".to_string(),
            greeting: None,
            strict_audit: false,
        }
    }
}

impl DialogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::invalid(
                "endpoint",
                format!("unsupported scheme '{}'", url.scheme()),
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(ConfigError::invalid("response timeout", "must be non-zero"));
        }
        if self.bot_name.trim().is_empty() {
            return Err(ConfigError::invalid("bot name", "cannot be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_load_from_lookup() {
        let env = vars(&[
            ("VOLC_APP_ID", "app"),
            ("VOLC_ACCESS_KEY", "secret"),
            ("VOLC_APP_KEY", "key"),
        ]);
        let config = ApiConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.app_id, "app");
        assert_eq!(config.access_key(), "secret");
        assert_eq!(config.resource_id, DEFAULT_RESOURCE_ID);

        let headers = config.connection_headers("conn-1");
        assert_eq!(headers.len(), 5);
        assert!(headers.contains(&("X-Api-Connect-Id", "conn-1".to_string())));
        assert!(headers.contains(&("X-Api-Access-Key", "secret".to_string())));
    }

    #[test]
    fn test_missing_and_empty_values() {
        let env = vars(&[("VOLC_APP_ID", "app"), ("VOLC_APP_KEY", "key")]);
        match ApiConfig::from_lookup(|k| env.get(k).cloned()) {
            Err(ConfigError::MissingEnvVar(var)) => assert_eq!(var, "VOLC_ACCESS_KEY"),
            other => panic!("unexpected: {:?}", other),
        }

        let env = vars(&[
            ("VOLC_APP_ID", "  "),
            ("VOLC_ACCESS_KEY", "secret"),
            ("VOLC_APP_KEY", "key"),
        ]);
        assert!(matches!(
            ApiConfig::from_lookup(|k| env.get(k).cloned()),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_access_key_not_in_debug_output() {
        let env = vars(&[
            ("VOLC_APP_ID", "app"),
            ("VOLC_ACCESS_KEY", "super-secret"),
            ("VOLC_APP_KEY", "key"),
        ]);
        let config = ApiConfig::from_lookup(|k| env.get(k).cloned()).unwrap();
        assert!(!format!("{:?}", config).contains("super-secret"));
    }

    #[test]
    fn test_audio_defaults() {
        let input = InputAudioConfig::default();
        assert_eq!(input.sample_rate, 16000);
        assert_eq!(input.block_frames, 3200);
        assert!(input.validate().is_ok());

        let output = OutputAudioConfig::default();
        assert_eq!(output.ring_capacity(), 24000 * 100);
        assert_eq!(output.format.wire_name(), "pcm");
        assert!(output.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        let input = InputAudioConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(input.validate().is_err());

        let output = OutputAudioConfig {
            max_buffered: Duration::ZERO,
            ..Default::default()
        };
        assert!(output.validate().is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(DialogConfig::default().validate().is_ok());

        let http = DialogConfig {
            endpoint: "https://example.com".to_string(),
            ..Default::default()
        };
        assert!(http.validate().is_err());

        let garbage = DialogConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            garbage.validate(),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }
}
