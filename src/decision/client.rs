// src/decision/client.rs
use super::context::DecisionContext;
use super::parser::parse_response;
use super::traits::DecisionMaker;
use super::types::DecisionBatch;
use crate::config::{ModelConfig, Provider};
use crate::error::{CollaboratorError, ConfigError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const SYSTEM_PROMPT: &str = "You are an autonomous crypto futures trader managing a USDT-margined account. \
Study the account state and market data, then answer with your analysis inside <reasoning></reasoning> \
followed by a JSON array inside <decision></decision>. Each element has: symbol, action \
(open_long | open_short | close_long | close_short | partial_close | update_stop_loss | update_take_profit | hold), \
leverage, position_size_usd, stop_loss, take_profit, confidence (0-100) and reasoning. partial_close takes \
close_percentage (0-100]; update_stop_loss and update_take_profit take new_stop_loss or new_take_profit. \
Every number is a single plain value without thousands separators or ranges. Opening a position requires \
both stop_loss and take_profit and at least 12 USD of position_size_usd.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client (DeepSeek, Qwen, OpenRouter
/// or any custom endpoint).
pub struct ChatCompletionsClient {
    http_client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        agent_id: &str,
        config: &ModelConfig,
        http_client: Client,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(ConfigError::invalid(agent_id, "model api_key is not set"));
        }
        let base_url = config
            .resolved_base_url()
            .ok_or_else(|| ConfigError::invalid(agent_id, "model base_url is not set"))?;
        let model = config
            .resolved_model()
            .ok_or_else(|| ConfigError::invalid(agent_id, "model name is not set"))?;

        let masked = mask_key(&config.api_key);
        info!(agent = agent_id, provider = ?config.provider, %model, key = %masked, "🧠 Decision model configured");

        Ok(Self {
            http_client,
            endpoint: completions_url(config.provider, &base_url),
            model,
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn complete(&self, user_prompt: &str) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let request = async {
            let response = self
                .http_client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, CollaboratorError>((status, text))
        };
        let (status, text) = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| CollaboratorError::Timeout(self.timeout))??;

        if !status.is_success() {
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body: truncate(&text, 500),
            });
        }
        extract_content(&text)
    }
}

/// A custom base URL ending in `#` is used verbatim.
pub(crate) fn completions_url(provider: Provider, base_url: &str) -> String {
    if provider == Provider::Custom {
        if let Some(full) = base_url.strip_suffix('#') {
            return full.to_string();
        }
    }
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}

pub(crate) fn extract_content(body: &str) -> Result<String, CollaboratorError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| CollaboratorError::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or(CollaboratorError::EmptyResponse)
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[async_trait]
impl DecisionMaker for ChatCompletionsClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn decide(&self, context: &DecisionContext) -> Result<DecisionBatch, CollaboratorError> {
        let prompt = context.render_prompt();
        debug!(agent = %context.agent_id, cycle = context.cycle, chars = prompt.len(), "sending decision prompt");
        let answer = self.complete(&prompt).await?;
        Ok(parse_response(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_follows_provider_rules() {
        assert_eq!(
            completions_url(Provider::DeepSeek, "https://api.deepseek.com/v1/"),
            "https://api.deepseek.com/v1/chat/completions"
        );
        assert_eq!(
            completions_url(Provider::Custom, "https://llm.internal/v2/generate#"),
            "https://llm.internal/v2/generate"
        );
        assert_eq!(
            completions_url(Provider::Custom, "https://llm.internal/v1"),
            "https://llm.internal/v1/chat/completions"
        );
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = ModelConfig::default();
        let err = ChatCompletionsClient::new("alpha", &config, Client::new(), Duration::from_secs(5));
        assert!(matches!(err, Err(ConfigError::InvalidAgent { .. })));

        let config = ModelConfig {
            api_key: "sk-1234567890".into(),
            ..ModelConfig::default()
        };
        let client = ChatCompletionsClient::new("alpha", &config, Client::new(), Duration::from_secs(5)).unwrap();
        assert_eq!(client.name(), "deepseek-chat");
        assert_eq!(client.endpoint(), "https://api.deepseek.com/v1/chat/completions");
    }

    #[test]
    fn reply_content_is_extracted() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"<decision>[]</decision>"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "<decision>[]</decision>");
        assert!(matches!(
            extract_content(r#"{"choices":[]}"#),
            Err(CollaboratorError::EmptyResponse)
        ));
        assert!(matches!(extract_content("oops"), Err(CollaboratorError::Malformed(_))));
    }

    #[test]
    fn keys_are_masked() {
        assert_eq!(mask_key("sk-1234567890"), "sk-1...7890");
        assert_eq!(mask_key("short"), "****");
        assert_eq!(truncate("abcdef", 3), "abc...");
    }
}
