/*!
 * Error types for the storelingo library.
 *
 * This module contains custom error types for the different layers of the
 * system, using the thiserror crate for ergonomic error definitions:
 * - `ProviderError`: failures talking to the chat-completion endpoint
 * - `TranslationError`: why the strategy cascade gave up on a text
 * - `QueueError`: failures of the job queue and its backends
 * - `JobFailure`: business outcome of a single job execution
 */

use thiserror::Error;

/// Errors that can occur when working with the provider API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The request did not finish within its deadline
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The model reported that the input or output exceeded its limits
    #[error("Text too long for a single request: {0}")]
    TooLong(String),

    /// The model returned no usable content
    #[error("Empty response from API")]
    EmptyResponse,
}

impl ProviderError {
    /// Whether the failure is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestFailed(_)
            | Self::ParseError(_)
            | Self::ConnectionError(_)
            | Self::RateLimitExceeded(_)
            | Self::Timeout(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500 || *status_code == 408,
            Self::AuthenticationError(_) | Self::TooLong(_) | Self::EmptyResponse => false,
        }
    }

    /// Whether the failure is caused by the size of the text
    pub fn is_length_related(&self) -> bool {
        matches!(self, Self::TooLong(_))
    }
}

/// Why a cascade gave up on a text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Placeholders did not survive translation
    #[error("Placeholders lost during translation: {}", .0.join(", "))]
    MissingPlaceholders(Vec<String>),

    /// All strategies were exhausted for a field
    #[error("All translation strategies failed: {0}")]
    Exhausted(String),

    /// The plan had no step applicable to the text
    #[error("No translation strategy applied")]
    NoStrategy,
}

/// Errors raised by the job queue and its backends
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    /// The shared backend cannot be reached; triggers failover
    #[error("Queue backend unreachable: {0}")]
    Connectivity(String),

    /// The job payload failed admission checks
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// The requested job does not exist
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Any other backend failure that does not indicate an outage
    #[error("Queue backend error: {0}")]
    Backend(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The queue was shut down
    #[error("Queue is shut down")]
    Closed,
}

impl QueueError {
    /// Whether the error indicates the backend itself is unavailable
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Reason a job must not be retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// The resource no longer exists
    #[error("resource {0} not found")]
    ResourceNotFound(String),

    /// The resource belongs to a different shop than the job
    #[error("resource {resource_id} belongs to shop {actual}, job targets {expected}")]
    CrossEnvironment {
        resource_id: String,
        expected: String,
        actual: String,
    },

    /// Any other non-retryable condition
    #[error("{0}")]
    Other(String),
}

/// Outcome of a failed job execution
#[derive(Error, Debug, Clone)]
pub enum JobFailure {
    /// Retry with backoff while attempts remain
    #[error("{0}")]
    Retryable(String),

    /// Fail immediately, regardless of remaining attempts
    #[error("terminal: {0}")]
    Terminal(TerminalReason),
}

impl JobFailure {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl From<anyhow::Error> for JobFailure {
    fn from(error: anyhow::Error) -> Self {
        Self::Retryable(format!("{:#}", error))
    }
}
