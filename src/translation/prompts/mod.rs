/*!
 * Prompt engineering for commerce content translation.
 *
 * This module provides the system prompt of every translation strategy and
 * the too-long sentinel the model may answer with.
 */

pub mod templates;

// Re-export main types
pub use templates::{is_too_long_sentinel, PromptKind, PromptTemplate, TOO_LONG_SENTINEL};
