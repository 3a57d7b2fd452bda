use std::sync::Arc;

use {
    relay_agents::{GenerationParams, LlmProvider},
    relay_chat::{ChatService, Normalizer},
    relay_config::RelayConfig,
    relay_sessions::{SessionKey, SessionRegistry},
};

/// Everything a request handler needs, shared behind an `Arc`.
pub struct GatewayState {
    pub chat: ChatService,
    pub config: RelayConfig,
    /// Session used when a request carries no `x-session-key` header.
    pub default_session: SessionKey,
    pub version: String,
}

impl GatewayState {
    /// Wire a chat service around `provider` using the media, chat and
    /// generation settings from `config`.
    pub fn new(config: RelayConfig, provider: Arc<dyn LlmProvider>) -> relay_sessions::Result<Arc<Self>> {
        let default_session = SessionKey::parse(&config.chat.default_session)?;
        let chat = ChatService::new(
            provider,
            Arc::new(SessionRegistry::with_capacity(config.chat.max_sessions)),
            Normalizer::from_config(&config.media),
            GenerationParams::from(&config.provider),
        );
        Ok(Arc::new(Self {
            chat,
            config,
            default_session,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }))
    }
}
