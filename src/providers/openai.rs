use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ProviderError;
use super::Provider;

/// Client for OpenAI-compatible chat-completion APIs
#[derive(Debug)]
pub struct OpenAI {
    /// HTTP client for API requests
    client: Client,
    /// API key for authentication
    api_key: String,
    /// Base URL, e.g. `https://api.openai.com/v1`
    endpoint: String,
}

/// Chat message object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Role of the message sender (system, user, assistant)
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

/// Chat-completion request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model to use
    pub model: String,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Temperature for generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Create a request with a system prompt and one user message
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the completion token budget
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// The system prompt of the request
    pub fn system_prompt(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// The user message of the request
    pub fn user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Token usage information
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Chat-completion response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ChatResponse {
    /// Build a single-choice response (used by mocks)
    pub fn from_text(text: impl Into<String>, finish_reason: Option<&str>) -> Self {
        Self {
            choices: vec![ChatChoice {
                message: ChatMessage { role: "assistant".to_string(), content: text.into() },
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
        }
    }

    /// `choices[0].message.content`
    pub fn text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Whether the model stopped because it ran out of tokens
    pub fn is_truncated(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .is_some_and(|r| r == "length")
    }
}

impl OpenAI {
    /// Create a new client
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    /// Map a non-success HTTP status to the provider error taxonomy
    fn classify_status(status: StatusCode, body: String) -> ProviderError {
        let lowered = body.to_lowercase();
        match status.as_u16() {
            429 => ProviderError::RateLimitExceeded(body),
            401 | 403 => ProviderError::AuthenticationError(body),
            400 | 413
                if lowered.contains("context_length")
                    || lowered.contains("maximum context")
                    || lowered.contains("too long") =>
            {
                ProviderError::TooLong(body)
            }
            code => ProviderError::ApiError { status_code: code, message: body },
        }
    }
}

#[async_trait]
impl Provider for OpenAI {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let url = self.completions_url();
        debug!("POST {} (model {})", url, request.model);

        let mut builder = self.client.post(&url).json(&request);
        if !self.api_key.is_empty() {
            builder = builder.bearer_auth(&self.api_key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(0)
            } else if e.is_connect() {
                ProviderError::ConnectionError(e.to_string())
            } else {
                ProviderError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::RequestFailed(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!("Chat API error ({}): {}", status, body);
            return Err(Self::classify_status(status, body));
        }

        serde_json::from_str::<ChatResponse>(&body)
            .map_err(|e| ProviderError::ParseError(format!("{} in body: {}", e, body)))
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        let request = ChatRequest::new("", "Reply with OK.", "ping").max_tokens(5);
        self.complete(request).await.map(|_| ())
    }
}
