//! HTTP speech synthesiser.

use super::SpeechSynthesizer;
use crate::errors::StageError;
use async_trait::async_trait;
use std::path::Path;

/// Speech client for an HTTP TTS endpoint returning audio bytes.
pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSpeechSynthesizer {
    /// Creates a client against the given synthesis endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesise(&self, text: &str, voice: &str, out: &Path) -> Result<(), StageError> {
        let body = serde_json::json!({ "text": text, "voice": voice });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| StageError::network(format!("tts request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(StageError::quota(format!(
                "tts quota/auth failure ({status})"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::remote_api(format!(
                "tts error ({status}): {body}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StageError::network(format!("tts response aborted: {e}")))?;

        if bytes.is_empty() {
            return Err(StageError::format("tts returned an empty audio body"));
        }

        tokio::fs::write(out, &bytes)
            .await
            .map_err(|e| StageError::filesystem(format!("could not write {}: {e}", out.display())))
    }
}
