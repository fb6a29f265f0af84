//! Provider gateway: one call contract over interchangeable text backends.
//!
//! Backends are tried in configured order. A failure moves on to the next
//! backend only when fallback is enabled and the error message carries a
//! rate-limit, quota or overload marker. No backend is tried twice.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Non-success HTTP status; the message carries status and body verbatim.
    #[error("{0}")]
    Api(String),
    #[error("{provider} request failed: {source}")]
    Transport {
        provider: String,
        source: reqwest::Error,
    },
    #[error("{provider} returned a malformed response: {message}")]
    Malformed { provider: String, message: String },
    #[error("{provider} returned an empty response")]
    Empty { provider: String },
    #[error("no model providers configured")]
    NoProviders,
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Substrings (lowercase) that mark an error as worth retrying elsewhere.
const FALLBACK_MARKERS: [&str; 6] = ["rate", "quota", "limit", "overload", "429", "529"];

/// Whether an error should move the call on to the next backend.
pub fn is_fallback_eligible(error: &ProviderError) -> bool {
    let message = error.to_string().to_lowercase();
    FALLBACK_MARKERS.iter().any(|m| message.contains(m))
}

/// A text-generation backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short name used in logs, e.g. `claude`.
    fn name(&self) -> &str;

    /// Generate a completion for a system/user prompt pair.
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
}

/// Ordered set of backends with optional fallback.
pub struct ProviderGateway {
    providers: Vec<Box<dyn Provider>>,
    fallback_enabled: bool,
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field(
                "providers",
                &self.providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("fallback_enabled", &self.fallback_enabled)
            .finish()
    }
}

impl ProviderGateway {
    pub fn new(providers: Vec<Box<dyn Provider>>, fallback_enabled: bool) -> Self {
        Self {
            providers,
            fallback_enabled,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Return exactly one backend's response.
    pub async fn call(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let count = self.providers.len();
        for (idx, provider) in self.providers.iter().enumerate() {
            info!(provider = provider.name(), max_tokens, "calling model");
            match provider.complete(system, user, max_tokens).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    let has_next = idx + 1 < count;
                    if self.fallback_enabled && has_next && is_fallback_eligible(&e) {
                        warn!(
                            provider = provider.name(),
                            error = %e,
                            "provider rate limited or overloaded, falling back"
                        );
                        continue;
                    }
                    return Err(e);
                }
            }
        }
        Err(ProviderError::NoProviders)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedProvider;
    use super::*;

    fn gateway(providers: &[ScriptedProvider], fallback: bool) -> ProviderGateway {
        ProviderGateway::new(
            providers
                .iter()
                .map(|p| Box::new(p.clone()) as Box<dyn Provider>)
                .collect(),
            fallback,
        )
    }

    #[tokio::test]
    async fn falls_back_on_rate_limit() {
        let primary = ScriptedProvider::new(
            "claude",
            vec![Err("Anthropic API error 429: Too Many Requests")],
        );
        let secondary = ScriptedProvider::new("openai", vec![Ok("from openai")]);
        let gw = gateway(&[primary.clone(), secondary.clone()], true);

        let text = gw.call("sys", "user", 100).await.unwrap();
        assert_eq!(text, "from openai");
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let primary = ScriptedProvider::new("claude", vec![Err("Anthropic API error 400: bad request")]);
        let secondary = ScriptedProvider::new("openai", vec![Ok("unused")]);
        let gw = gateway(&[primary, secondary.clone()], true);

        let err = gw.call("sys", "user", 100).await.unwrap_err();
        assert_eq!(err.to_string(), "Anthropic API error 400: bad request");
        assert_eq!(secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn fallback_disabled_reraises() {
        let primary = ScriptedProvider::new("claude", vec![Err("Anthropic API error 529: Overloaded")]);
        let secondary = ScriptedProvider::new("openai", vec![Ok("unused")]);
        let gw = gateway(&[primary, secondary.clone()], false);

        assert!(gw.call("sys", "user", 100).await.is_err());
        assert_eq!(secondary.call_count(), 0);
    }

    #[tokio::test]
    async fn last_backend_error_is_propagated() {
        let primary = ScriptedProvider::new("claude", vec![Err("quota exceeded")]);
        let secondary = ScriptedProvider::new("openai", vec![Err("OpenAI API error 429: rate limit")]);
        let gw = gateway(&[primary.clone(), secondary.clone()], true);

        let err = gw.call("sys", "user", 100).await.unwrap_err();
        assert!(err.to_string().contains("OpenAI API error 429"));
        assert_eq!(primary.call_count(), 1);
        assert_eq!(secondary.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_gateway_reports_no_providers() {
        let gw = ProviderGateway::new(Vec::new(), true);
        assert!(matches!(
            gw.call("s", "u", 1).await,
            Err(ProviderError::NoProviders)
        ));
    }

    #[test]
    fn eligibility_is_case_insensitive() {
        assert!(is_fallback_eligible(&ProviderError::Api("Rate Limited".into())));
        assert!(is_fallback_eligible(&ProviderError::Api("server OVERLOADED".into())));
        assert!(!is_fallback_eligible(&ProviderError::Api("invalid api key".into())));
    }
}
