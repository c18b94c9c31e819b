/*!
 * Rate-limited, time-bounded chat-completion calls.
 *
 * Every request passes through the shared `RateLimiter`, carries a
 * `tokio::time::timeout` and is retried by the `RetryPolicy` on transient
 * failures. Length problems are surfaced uniformly as
 * `ProviderError::TooLong`, whether the endpoint rejected the request, the
 * completion stopped on `finish_reason == "length"` or the model answered
 * with the too-long sentinel.
 */

use log::debug;
use std::sync::Arc;
use std::time::Duration;

use crate::app_config::ApiConfig;
use crate::errors::ProviderError;
use crate::providers::{ChatRequest, Provider};
use crate::translation::cache::truncate_text;
use crate::translation::prompts::{is_too_long_sentinel, PromptKind, PromptTemplate};
use crate::translation::rate_limiter::RateLimiter;
use crate::translation::retry::RetryPolicy;

/// Parameters of one logical translation call
#[derive(Debug, Clone, Copy)]
pub struct CallSpec {
    pub prompt: PromptKind,
    /// Numeric limit rendered into the prompt (max chars / max words)
    pub limit: Option<usize>,
    /// Double `max_tokens` and use the long-text timeout
    pub boosted: bool,
}

impl CallSpec {
    pub fn new(prompt: PromptKind) -> Self {
        Self { prompt, limit: None, boosted: false }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn boosted(mut self) -> Self {
        self.boosted = true;
        self
    }
}

/// Result of a call including every retry
#[derive(Debug)]
pub struct CallResult {
    pub result: Result<String, ProviderError>,
    pub attempts: u32,
}

/// Client wrapping the provider with throttling, timeouts and retries
#[derive(Debug, Clone)]
pub struct TranslationClient {
    provider: Arc<dyn Provider>,
    limiter: Arc<RateLimiter>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
    long_timeout: Duration,
    retry: RetryPolicy,
    brand_terms: Vec<String>,
}

impl TranslationClient {
    pub fn new(provider: Arc<dyn Provider>, limiter: Arc<RateLimiter>, api: &ApiConfig, brand_terms: Vec<String>) -> Self {
        Self {
            provider,
            limiter,
            model: api.model.clone(),
            temperature: api.temperature,
            max_tokens: api.max_tokens,
            timeout: api.timeout(),
            long_timeout: api.long_text_timeout(),
            retry: RetryPolicy::new(
                api.max_retries,
                Duration::from_millis(api.backoff_base_ms),
                Duration::from_millis(api.backoff_max_ms),
            ),
            brand_terms,
        }
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn brand_terms(&self) -> &[String] {
        &self.brand_terms
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Translate `text` into `target_language` with the prompt of `spec`
    pub async fn translate(&self, text: &str, target_language: &str, spec: CallSpec) -> CallResult {
        let template = PromptTemplate::for_kind(spec.prompt);
        let system = match spec.limit {
            Some(limit) => template.render_with_limit(target_language, &self.brand_terms, limit),
            None => template.render(target_language, &self.brand_terms),
        };
        let (max_tokens, timeout) = if spec.boosted {
            (self.max_tokens.saturating_mul(2), self.long_timeout)
        } else {
            (self.max_tokens, self.timeout)
        };

        let label = format!("{} -> {}", spec.prompt.family(), target_language);
        let outcome = self
            .retry
            .run(
                &label,
                |attempt| {
                    debug!(
                        "Calling model ({}, attempt {}) for '{}'",
                        label,
                        attempt,
                        truncate_text(text, 40)
                    );
                    self.call_once(&system, text, max_tokens, timeout)
                },
                ProviderError::is_transient,
            )
            .await;

        CallResult { result: outcome.result, attempts: outcome.attempts }
    }

    async fn call_once(&self, system: &str, user: &str, max_tokens: u32, timeout: Duration) -> Result<String, ProviderError> {
        self.limiter.acquire().await;

        let request = ChatRequest::new(self.model.clone(), system, user)
            .temperature(self.temperature)
            .max_tokens(max_tokens);

        let response = match tokio::time::timeout(timeout, self.provider.complete(request)).await {
            Ok(response) => response?,
            Err(_) => return Err(ProviderError::Timeout(timeout.as_millis() as u64)),
        };

        if response.is_truncated() {
            return Err(ProviderError::TooLong("completion stopped at the token limit".to_string()));
        }
        let text = response.text().map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        if is_too_long_sentinel(text) {
            return Err(ProviderError::TooLong("model answered with the too-long sentinel".to_string()));
        }
        Ok(text.to_string())
    }
}
