use std::{io::Write, sync::Arc};

use {
    anyhow::{Result, bail},
    futures::StreamExt,
    relay_agents::{GenerationParams, build_provider},
    relay_chat::{ChatService, Normalizer, ReplyChunk},
    relay_config::RelayConfig,
    relay_sessions::{SessionKey, SessionRegistry},
    tracing::debug,
};

/// One streamed exchange against the configured provider, printed as it
/// arrives.
pub async fn handle_ask(config: &RelayConfig, message: String) -> Result<()> {
    let provider = build_provider(&config.provider)?;
    let chat = ChatService::new(
        provider,
        Arc::new(SessionRegistry::new()),
        Normalizer::from_config(&config.media),
        GenerationParams::from(&config.provider),
    );
    let key = SessionKey::parse(&config.chat.default_session)?;
    debug!(session = %key, model = %config.provider.model, "asking");

    let mut stdout = std::io::stdout().lock();
    let mut stream = chat.submit_prompt_streaming(key, message);
    while let Some(chunk) = stream.next().await {
        match chunk {
            ReplyChunk::Fragment(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            },
            ReplyChunk::Error(message) => {
                writeln!(stdout)?;
                bail!(message);
            },
        }
    }
    writeln!(stdout)?;
    Ok(())
}
