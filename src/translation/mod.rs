/*!
 * Long-text translation engine.
 *
 * Fields travel through these submodules:
 *
 * - `protector`: reversible placeholders for markup, URLs and brand terms
 * - `chunker`: request-sized chunks that never split a tag or placeholder
 * - `client`: one rate-limited, retried model call
 * - `validator`: completeness heuristics for a translation attempt
 * - `strategy`: the ordered fallback cascade and its per-field plans
 * - `lists`, `handle`, `residual`: list blocks, URL slugs and the CJK post-pass
 * - `orchestrator`: all fields of one resource, end to end
 */

// Re-export main types for easier usage
pub use self::cache::{CacheStats, CachedTranslation, TranslationCache};
pub use self::chunker::{Chunk, ChunkKind, Chunker};
pub use self::client::TranslationClient;
pub use self::orchestrator::TranslationOrchestrator;
pub use self::protector::{PlaceholderProtector, ProtectedText};
pub use self::rate_limiter::RateLimiter;
pub use self::retry::RetryPolicy;
pub use self::strategy::{CascadeResult, FieldPlan, StrategyCascade, StrategyKind};
pub use self::validator::{CompletenessValidator, ValidationContext, ValidatorConfig};

// Submodules
pub mod cache;
pub mod chunker;
pub mod client;
pub mod handle;
pub mod lists;
pub mod markers;
pub mod orchestrator;
pub mod prompts;
pub mod protector;
pub mod rate_limiter;
pub mod residual;
pub mod retry;
pub mod strategy;
pub mod validator;
