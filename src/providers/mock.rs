/*!
 * Mock provider implementation for testing.
 *
 * The mock answers from a FIFO script first and falls back to a responder
 * closure once the script is exhausted:
 * - `MockProvider::echo()` - returns the user text unchanged
 * - `MockProvider::with_responder(f)` - computes every reply with `f`
 * - `.then_reply(..)` / `.then_error(..)` - queue scripted outcomes
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::ProviderError;
use super::openai::{ChatRequest, ChatResponse};
use super::Provider;

/// Responder used when the script is empty
pub type Responder = Arc<dyn Fn(&ChatRequest) -> Result<ChatResponse, ProviderError> + Send + Sync>;

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Successful completion
    Text(String),
    /// Completion cut off by the token limit
    Truncated(String),
    /// Provider failure
    Error(ProviderError),
    /// Sleep before answering with the inner reply
    Delayed(Duration, Box<MockReply>),
}

/// A recorded request with the time it was received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub request: ChatRequest,
    pub at: Instant,
}

/// Mock provider for testing translation behavior
#[derive(Clone)]
pub struct MockProvider {
    script: Arc<Mutex<VecDeque<MockReply>>>,
    responder: Responder,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockProvider")
            .field("scripted", &self.script.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

impl MockProvider {
    /// Create a mock answering every unscripted request with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> Result<ChatResponse, ProviderError> + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that returns the user text unchanged
    pub fn echo() -> Self {
        Self::with_responder(|request| Ok(ChatResponse::from_text(request.user_content(), Some("stop"))))
    }

    /// Create a mock that maps the user text with a plain function
    pub fn mapping<F>(map: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::with_responder(move |request| {
            Ok(ChatResponse::from_text(map(request.user_content()), Some("stop")))
        })
    }

    /// Create a mock that always fails with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::with_responder(move |_| Err(error.clone()))
    }

    /// Queue a successful reply
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.script.lock().push_back(MockReply::Text(text.into()));
        self
    }

    /// Queue a failure
    pub fn then_error(self, error: ProviderError) -> Self {
        self.script.lock().push_back(MockReply::Error(error));
        self
    }

    /// Queue an arbitrary scripted outcome
    pub fn then(self, reply: MockReply) -> Self {
        self.script.lock().push_back(reply);
        self
    }

    /// Number of requests received so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// All requests received so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    async fn resolve(&self, reply: MockReply) -> Result<ChatResponse, ProviderError> {
        let mut reply = reply;
        loop {
            match reply {
                MockReply::Text(text) => return Ok(ChatResponse::from_text(text, Some("stop"))),
                MockReply::Truncated(text) => return Ok(ChatResponse::from_text(text, Some("length"))),
                MockReply::Error(error) => return Err(error),
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.lock().push(RecordedCall { request: request.clone(), at: Instant::now() });

        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(reply) => self.resolve(reply).await,
            None => (self.responder)(&request),
        }
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}
