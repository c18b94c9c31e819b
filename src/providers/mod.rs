/*!
 * Provider implementations for the chat-completion endpoint.
 *
 * This module contains:
 * - `openai`: client for any OpenAI-compatible `/chat/completions` API
 * - `mock`: scripted provider used by tests and dry runs
 */

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::ProviderError;

pub use self::openai::{ChatMessage, ChatRequest, ChatResponse};

/// Common trait for all LLM providers
///
/// The translation engine only needs one request shape (a system prompt plus
/// the field text), so providers are object-safe and shared as
/// `Arc<dyn Provider>` between concurrent jobs.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Complete a chat request using this provider
    ///
    /// # Arguments
    /// * `request` - The request to complete
    ///
    /// # Returns
    /// * `Result<ChatResponse, ProviderError>` - The response from the provider or an error
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Test the connection to the provider
    async fn test_connection(&self) -> Result<(), ProviderError>;
}

pub mod mock;
pub mod openai;
