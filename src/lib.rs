/*!
 * # storelingo
 *
 * Queue-driven translation of storefront content (products, collections,
 * pages, articles) through an OpenAI-compatible chat-completion endpoint.
 *
 * ## Features
 *
 * - Job queue on a SQLite file shared by several worker processes, with
 *   transparent failover to an in-process queue
 * - Long-text engine that keeps markup, URLs and brand terms intact:
 *   placeholder protection, chunking, a fallback strategy cascade and
 *   completeness validation
 * - Dedicated handling for titles, SEO fields, list blocks and URL handles
 * - Residual-English cleanup for CJK targets
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `resource`: Resources, field names and translation results
 * - `translation`: The long-text translation engine
 * - `queue`: Job queue, backends and the failover supervisor
 * - `database`: SQLite persistence for jobs, resources and translations
 * - `stores`: Collaborator traits used by translation jobs
 * - `translation_service`: The interface callers use
 * - `app_controller`: Wiring for the command line
 * - `providers`: Chat-completion clients
 * - `language_utils`: Language codes and script detection
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod database;
pub mod errors;
pub mod language_utils;
pub mod providers;
pub mod queue;
pub mod resource;
pub mod stores;
pub mod translation;
pub mod translation_service;

// Re-export main types for easier usage
pub use app_config::Config;
pub use errors::{JobFailure, ProviderError, QueueError, TranslationError};
pub use queue::{Job, JobState, NewJob, QueueStats, QueueSupervisor};
pub use resource::{FieldName, Resource, ResourceStatus, ResourceType, TranslationResult};
pub use stores::{InMemoryStore, ResourceStore, TranslationStore};
pub use translation::TranslationOrchestrator;
pub use translation_service::{BatchTranslationPayload, TranslationJobPayload, TranslationService};
