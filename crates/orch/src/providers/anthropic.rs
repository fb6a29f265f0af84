use crate::provider::{Provider, ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API backend.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

/// Concatenate the text blocks of a response.
fn joined_text(response: MessagesResponse) -> String {
    response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
        };

        let transport = |source| ProviderError::Transport {
            provider: self.name().to_string(),
            source,
        };
        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(ProviderError::Api(format!(
                "Anthropic API error {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;
        let content = joined_text(parsed);
        if content.trim().is_empty() {
            return Err(ProviderError::Empty {
                provider: self.name().to_string(),
            });
        }
        Ok(content)
    }
}
