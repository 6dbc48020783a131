use crate::config::LlmConfig;
use ace_sdk::errors::ModelError;
use ace_sdk::{CompletionRole, LanguageModel, Prompt};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

/// Client for any OpenAI-style `/chat/completions` endpoint
pub struct OpenAiCompatModel {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, reading the key from the configured environment variable
    pub fn from_config(config: &LlmConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.trim().is_empty());
        Self::new(&config.base_url, &config.model, api_key).with_temperature(config.temperature)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &Prompt, role: CompletionRole) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
        });

        debug!(%role, model = %self.model, "Requesting completion");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout
            } else {
                ModelError::Provider(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => ModelError::Authentication(text),
                429 => ModelError::RateLimited,
                _ => ModelError::Provider(format!("{}: {}", status, text)),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelError::MalformedOutput(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| ModelError::MalformedOutput("No content in response".to_string()))?;

        if content.trim().is_empty() {
            return Err(ModelError::MalformedOutput("Empty content".to_string()));
        }

        Ok(content.to_string())
    }
}
