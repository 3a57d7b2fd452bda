pub mod anthropic;

use std::sync::Arc;

use {relay_config::ProviderConfig, secrecy::ExposeSecret, tracing::info};

use crate::{
    error::{Error, Result},
    model::LlmProvider,
    retry::{RetryPolicy, RetryingProvider},
};

/// Build the configured provider wrapped in the timeout/retry layer.
///
/// Fails when no non-empty API key is configured.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.expose_secret().trim().is_empty())
        .ok_or(Error::MissingApiKey {
            provider: "anthropic",
        })?;

    let provider = anthropic::AnthropicProvider::new(
        api_key,
        config.model.clone(),
        config.base_url.clone(),
    );
    let policy = RetryPolicy::from(config);
    info!(
        model = %config.model,
        base_url = %config.base_url,
        max_retries = policy.max_retries,
        timeout_secs = policy.timeout.as_secs(),
        "provider configured"
    );
    Ok(Arc::new(RetryingProvider::new(Arc::new(provider), policy)))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::Secret};

    #[test]
    fn missing_key_is_rejected() {
        let err = build_provider(&ProviderConfig::default()).err().unwrap();
        assert!(matches!(err, Error::MissingApiKey { .. }));

        let blank = ProviderConfig {
            api_key: Some(Secret::new("  ".into())),
            ..ProviderConfig::default()
        };
        assert!(build_provider(&blank).is_err());
    }

    #[test]
    fn builds_with_key() {
        let config = ProviderConfig {
            api_key: Some(Secret::new("sk-test".into())),
            ..ProviderConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.id(), "claude-opus-4-20250514");
    }
}
