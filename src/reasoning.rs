//! Structured-completion capability.
//!
//! The external reasoning model is reached through a single seam: given an
//! instruction, an output schema, and input values, [`ReasoningModel`]
//! returns a JSON value intended to conform to the schema, or errors. The
//! extractor and deduplicator validate the value themselves — the model is
//! probabilistic and its output is never trusted blindly.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::config::ReasoningConfig;
use crate::embedding::post_json_with_retry;

/// One structured-completion request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// What the model is asked to do.
    pub instruction: String,
    /// JSON Schema the response must conform to.
    pub schema: Value,
    /// Named input values.
    pub input: Value,
}

#[async_trait]
pub trait ReasoningModel: Send + Sync {
    /// Perform a structured completion. The returned value is the parsed
    /// JSON response; callers validate it against their schema.
    async fn complete(&self, request: &StructuredRequest) -> Result<Value>;
}

/// Build the configured reasoning client.
pub fn create_reasoning_model(config: &ReasoningConfig) -> Result<Box<dyn ReasoningModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledModel)),
        "openai" => Ok(Box::new(OpenAiModel::new(config)?)),
        other => bail!("Unknown reasoning provider: {}", other),
    }
}

/// Always errors; used when no reasoning provider is configured.
pub struct DisabledModel;

#[async_trait]
impl ReasoningModel for DisabledModel {
    async fn complete(&self, _request: &StructuredRequest) -> Result<Value> {
        bail!("Reasoning provider is disabled")
    }
}

/// OpenAI-compatible chat-completions client with JSON response format.
///
/// Works against any endpoint speaking the `/v1/chat/completions` protocol;
/// the base URL is configurable for self-hosted gateways.
pub struct OpenAiModel {
    model: String,
    url: String,
    api_key: String,
    temperature: f64,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiModel {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("reasoning.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            url,
            api_key,
            temperature: config.temperature,
            client,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ReasoningModel for OpenAiModel {
    async fn complete(&self, request: &StructuredRequest) -> Result<Value> {
        let system = format!(
            "{}\n\nRespond with a single JSON object conforming to this JSON Schema:\n{}",
            request.instruction,
            serde_json::to_string_pretty(&request.schema)?
        );

        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": serde_json::to_string(&request.input)? },
            ],
        });

        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;

        let content = json
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| anyhow::anyhow!("completion response missing message content"))?;

        serde_json::from_str(content)
            .map_err(|e| anyhow::anyhow!("completion content is not valid JSON: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_model_errors() {
        let model = DisabledModel;
        let request = StructuredRequest {
            instruction: "noop".to_string(),
            schema: serde_json::json!({"type": "object"}),
            input: serde_json::json!({}),
        };
        assert!(model.complete(&request).await.is_err());
    }
}
