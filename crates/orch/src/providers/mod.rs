//! HTTP backends behind the provider gateway.

mod anthropic;
mod openai;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

use crate::provider::{Provider, ProviderGateway};
use orch_core::{Config, ProviderKind};
use std::time::Duration;
use tracing::warn;

/// API keys collected at the CLI boundary.
#[derive(Clone, Default)]
pub struct ProviderKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

impl std::fmt::Debug for ProviderKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeys")
            .field("anthropic", &self.anthropic.as_ref().map(|_| "<redacted>"))
            .field("openai", &self.openai.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn http_client(config: &Config) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(u64::from(config.provider_timeout_sec)))
        .build()
}

/// Build the gateway in configured order. Backends without a key are skipped.
pub fn gateway_from_config(
    config: &Config,
    keys: &ProviderKeys,
) -> reqwest::Result<ProviderGateway> {
    let client = http_client(config)?;
    let mut providers: Vec<Box<dyn Provider>> = Vec::new();

    for kind in &config.provider_order {
        match kind {
            ProviderKind::Claude => match keys.anthropic.as_deref().filter(|k| !k.is_empty()) {
                Some(key) => providers.push(Box::new(AnthropicProvider::new(
                    client.clone(),
                    key,
                    &config.anthropic_model,
                ))),
                None => warn!("ANTHROPIC_API_KEY not set, skipping claude"),
            },
            ProviderKind::Openai => match keys.openai.as_deref().filter(|k| !k.is_empty()) {
                Some(key) => providers.push(Box::new(OpenAiProvider::new(
                    client.clone(),
                    key,
                    &config.openai_model,
                ))),
                None => warn!("OPENAI_API_KEY not set, skipping openai"),
            },
        }
    }

    Ok(ProviderGateway::new(providers, config.fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_skips_backends_without_keys() {
        let config = Config::default();
        let keys = ProviderKeys {
            anthropic: None,
            openai: Some("sk-test".into()),
        };
        let gateway = gateway_from_config(&config, &keys).unwrap();
        assert!(!gateway.is_empty());

        let empty = gateway_from_config(&config, &ProviderKeys::default()).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn keys_are_redacted_in_debug_output() {
        let keys = ProviderKeys {
            anthropic: Some("secret".into()),
            openai: None,
        };
        assert!(!format!("{keys:?}").contains("secret"));
    }
}
