/// Config schema types (server, provider, media, chat).
use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub media: MediaConfig,
    pub chat: ChatConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on. Defaults to 8000.
    pub port: u16,
    /// Origins allowed by CORS. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
            cors_origins: vec!["http://localhost:3000".into()],
        }
    }
}

/// Remote completion provider (Anthropic Messages API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub base_url: String,
    /// Output token ceiling sent with every request.
    pub max_tokens: u32,
    /// Sampling temperature sent with every request.
    pub temperature: f32,
    /// Whole-call timeout, and the idle timeout between stream events.
    pub timeout_secs: u64,
    /// Extra attempts for transient failures (rate limit, 5xx, network).
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_backoff_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-opus-4-20250514".into(),
            base_url: "https://api.anthropic.com".into(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

impl ProviderConfig {
    /// Whether a non-empty API key is configured.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }
}

/// Upload normalization limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Maximum size of an inline image payload, measured after base64 encoding.
    pub max_image_bytes: usize,
    /// First JPEG quality tried when recompressing.
    pub jpeg_start_quality: u8,
    /// Lowest JPEG quality tried before downscaling.
    pub jpeg_min_quality: u8,
    /// Quality decrement between attempts.
    pub jpeg_quality_step: u8,
    /// Factor applied to both dimensions when quality bottoms out.
    pub downscale_factor: f32,
    /// Hard cap on encode attempts per image.
    pub max_recompress_iterations: u32,
    /// Images are never downscaled below this width/height.
    pub min_dimension: u32,
    /// Upper bound for a whole multipart upload request.
    pub max_upload_bytes: usize,
    /// Extracted document text is cut to this many characters.
    pub max_extracted_chars: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 5 * 1024 * 1024,
            jpeg_start_quality: 95,
            jpeg_min_quality: 20,
            jpeg_quality_step: 5,
            downscale_factor: 0.75,
            max_recompress_iterations: 64,
            min_dimension: 16,
            max_upload_bytes: 25 * 1024 * 1024,
            max_extracted_chars: 200_000,
        }
    }
}

/// Conversation handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Session key used when a request does not name one.
    pub default_session: String,
    /// Live sessions kept in memory; the least recently used idle one is
    /// dropped to make room for a new key.
    pub max_sessions: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_session: "main".into(),
            max_sessions: 1024,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_observed_generation_parameters() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.provider.max_tokens, 4096);
        assert!((cfg.provider.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.media.max_image_bytes, 5 * 1024 * 1024);
        assert_eq!(cfg.chat.default_session, "main");
        assert_eq!(cfg.chat.max_sessions, 1024);
        assert!(!cfg.provider.has_api_key());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: RelayConfig = toml::from_str(
            r#"
            [provider]
            api_key = "sk-test"
            temperature = 0.2

            [server]
            port = 9000
            "#,
        )
        .unwrap();
        assert!(cfg.provider.has_api_key());
        assert_eq!(cfg.provider.api_key.as_ref().unwrap().expose_secret(), "sk-test");
        assert_eq!(cfg.provider.max_tokens, 4096);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn blank_api_key_is_not_configured() {
        let cfg: RelayConfig = toml::from_str("[provider]\napi_key = \"  \"\n").unwrap();
        assert!(!cfg.provider.has_api_key());
    }

    #[test]
    fn serializes_secret_value() {
        let mut cfg = RelayConfig::default();
        cfg.provider.api_key = Some(Secret::new("sk-x".into()));
        let out = toml::to_string(&cfg).unwrap();
        assert!(out.contains("api_key = \"sk-x\""));
    }
}
