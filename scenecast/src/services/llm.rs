//! HTTP language-model client.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint. The provider
//! is a configuration detail; anything speaking this wire shape works.

use super::{Completion, CompletionRequest, LanguageModel};
use crate::errors::StageError;
use async_trait::async_trait;
use serde::Deserialize;

/// Chat-completions client for an OpenAI-style endpoint.
pub struct HttpLanguageModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl HttpLanguageModel {
    /// Creates a client.
    ///
    /// * `endpoint` - full URL of the chat-completions route.
    /// * `model` - provider model identifier.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// Reuses an existing [`reqwest::Client`] for connection pooling.
    #[must_use]
    pub fn with_client(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

fn classify_transport(err: &reqwest::Error) -> StageError {
    if err.is_timeout() {
        StageError::timeout(format!("llm request timed out: {err}"))
    } else {
        StageError::network(format!("llm request failed: {err}"))
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> StageError {
    let code = status.as_u16();
    if code == 429 || code == 401 || code == 403 {
        StageError::quota(format!("llm quota/auth failure ({code}): {body}"))
    } else {
        StageError::remote_api(format!("llm error ({code}): {body}"))
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, StageError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "max_tokens": request.max_tokens,
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| StageError::format(format!("llm response did not parse: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| StageError::format("llm response contained no choices"))?;

        let usage = parsed.usage.unwrap_or_default();
        Ok(Completion {
            text: choice.message.content.trim().to_string(),
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        })
    }
}
