use crate::provider::{Provider, ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI chat completions backend.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, api_key: &str, model: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }
}

fn first_choice(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            max_tokens,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let transport = |source| ProviderError::Transport {
            provider: self.name().to_string(),
            source,
        };
        let response = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(ProviderError::Api(format!(
                "OpenAI API error {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Malformed {
                provider: self.name().to_string(),
                message: e.to_string(),
            })?;
        match first_choice(parsed) {
            Some(content) if !content.trim().is_empty() => Ok(content),
            _ => Err(ProviderError::Empty {
                provider: self.name().to_string(),
            }),
        }
    }
}
