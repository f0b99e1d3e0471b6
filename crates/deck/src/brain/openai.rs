//! OpenAI-compatible chat completions provider (OpenAI or Azure OpenAI)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::provider::{CompletionProvider, CompletionRequest, ProviderError, ResponseFormat};
use crate::config::{LlmConfig, LlmFlavor};

/// Chat completions over HTTP
pub struct OpenAIProvider {
    client: Client,
    config: LlmConfig,
}

impl OpenAIProvider {
    pub fn new(config: LlmConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_some() {
            tracing::info!("[BRAIN] {:?} provider initialized with API key", config.flavor);
        } else {
            tracing::warn!(
                "[BRAIN] {:?} provider created without API key - requests will fail",
                config.flavor
            );
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::ConfigError(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Request URL for the configured flavor
    fn url(&self) -> String {
        match self.config.flavor {
            LlmFlavor::OpenAI => self.config.endpoint.clone(),
            LlmFlavor::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.endpoint.trim_end_matches('/'),
                self.config.model,
                self.config.api_version
            ),
        }
    }

    fn payload(&self, request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(ref system) = request.system {
            messages.push(serde_json::json!({ "role": "system", "content": system }));
        }
        messages.push(serde_json::json!({ "role": "user", "content": request.prompt }));

        let mut payload = serde_json::json!({
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": messages
        });

        if self.config.flavor == LlmFlavor::OpenAI {
            payload["model"] = serde_json::json!(self.config.model);
        }
        if request.format == ResponseFormat::Structured {
            payload["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        payload
    }
}

/// Map a non-success HTTP status to a provider error
pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<&str>,
    body: String,
) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000),
        },
        401 | 403 => ProviderError::AuthError(body),
        code => ProviderError::ApiError {
            status: code,
            message: body,
        },
    }
}

/// Extract the first choice's text
pub(crate) fn parse_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    let choice = &json["choices"][0];
    if choice.is_null() {
        return Err(ProviderError::ParseError("response has no choices".to_string()));
    }

    if choice["finish_reason"].as_str() == Some("content_filter") {
        return Err(ProviderError::ApiError {
            status: 400,
            message: "response blocked by content filter".to_string(),
        });
    }

    choice["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::ParseError("response has no text content".to_string()))
}

#[async_trait]
impl CompletionProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        match self.config.flavor {
            LlmFlavor::OpenAI => "OpenAI",
            LlmFlavor::Azure => "Azure OpenAI",
        }
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::AuthError(format!("No {} API key configured", self.name())))?;

        let payload = self.payload(&request);

        tracing::debug!(
            "[BRAIN] Sending request: model={}, prompt_chars={}",
            self.config.model,
            request.prompt.len()
        );

        let builder = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json")
            .json(&payload);
        let builder = match self.config.flavor {
            LlmFlavor::OpenAI => builder.header("Authorization", format!("Bearer {}", api_key)),
            LlmFlavor::Azure => builder.header("api-key", api_key),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after.as_deref(), body));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::ParseError(e.to_string())
            }
        })?;

        parse_response(&json)
    }
}
