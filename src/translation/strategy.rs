/*!
 * The strategy cascade.
 *
 * A field is translated by walking an explicit, ordered list of strategy
 * descriptors. Each attempt yields a tagged `StrategyOutcome`; the cascade
 * only looks at the `FailureKind` tag to decide which later steps apply.
 * The walk stops at the first accepted output or falls back to the
 * original text once every step has been tried.
 */

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::app_config::TranslationConfig;
use crate::errors::{ProviderError, TranslationError};
use crate::language_utils::{count_cjk, is_cjk_language};
use crate::translation::cache::{truncate_text, TranslationCache};
use crate::translation::client::{CallSpec, TranslationClient};
use crate::translation::prompts::PromptKind;
use crate::translation::protector::placeholder_tokens;
use crate::translation::validator::{CompletenessValidator, ValidationContext};

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[a-zA-Z][^>]*>").unwrap());

static STRIPPABLE_ATTR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\s(?:class|style|id|data-[\w-]+)\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());

/// Meta description limits in chars
const SEO_LIMIT_LATIN: usize = 160;
const SEO_LIMIT_CJK: usize = 80;

/// Minimum shrink for the stripped-attributes retry to be worth it
const STRIP_MIN_SHRINK: f64 = 0.2;

/// One concrete prompt/parameter configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Enhanced,
    RaisedThreshold,
    StrippedAttributes,
    Simplified,
    Title,
    SeoDescription,
    ListItems,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enhanced => "enhanced",
            Self::RaisedThreshold => "raised_threshold",
            Self::StrippedAttributes => "stripped_attributes",
            Self::Simplified => "simplified",
            Self::Title => "title",
            Self::SeoDescription => "seo_description",
            Self::ListItems => "list_items",
        }
    }

    fn call_spec(&self, target_language: &str) -> CallSpec {
        match self {
            Self::Enhanced | Self::StrippedAttributes => CallSpec::new(PromptKind::Enhanced),
            Self::RaisedThreshold => CallSpec::new(PromptKind::Enhanced).boosted(),
            Self::Simplified => CallSpec::new(PromptKind::Simplified),
            Self::Title => CallSpec::new(PromptKind::Title),
            Self::SeoDescription => CallSpec::new(PromptKind::SeoDescription).with_limit(seo_limit(target_language)),
            Self::ListItems => CallSpec::new(PromptKind::ListItems),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a strategy attempt was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Timeouts, rate limits, connection problems (after retries)
    Transient,
    /// The text did not fit a single request
    LengthRelated,
    /// The output failed completeness validation
    Validation,
    /// The output lost placeholders present in its input
    PlaceholderLoss,
    /// The model returned nothing usable
    Empty,
    /// Retrying cannot help (authentication, bad request)
    Fatal,
}

impl FailureKind {
    pub fn from_provider(error: &ProviderError) -> Self {
        match error {
            e if e.is_length_related() => Self::LengthRelated,
            e if e.is_transient() => Self::Transient,
            ProviderError::EmptyResponse => Self::Empty,
            _ => Self::Fatal,
        }
    }
}

/// Tagged result of one strategy attempt
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Accepted(String),
    Rejected { kind: FailureKind, reason: String },
}

/// Which ordered strategy list a field uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPlan {
    /// Descriptions, summaries, labels and chunks
    General,
    /// Titles and SEO titles
    Title,
    /// Meta descriptions
    SeoDescription,
}

impl FieldPlan {
    pub fn steps(&self) -> &'static [StrategyKind] {
        match self {
            Self::General => &[
                StrategyKind::Enhanced,
                StrategyKind::RaisedThreshold,
                StrategyKind::StrippedAttributes,
                StrategyKind::Simplified,
            ],
            Self::Title => &[StrategyKind::Title, StrategyKind::Simplified],
            Self::SeoDescription => &[StrategyKind::SeoDescription, StrategyKind::Simplified],
        }
    }

    fn cache_family(&self) -> &'static str {
        match self {
            Self::General => PromptKind::Enhanced.family(),
            Self::Title => PromptKind::Title.family(),
            Self::SeoDescription => PromptKind::SeoDescription.family(),
        }
    }
}

/// Final result of a cascade run
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeResult {
    /// Accepted translation, or the original text on exhaustion
    pub text: String,
    pub success: bool,
    /// Strategy that produced `text`
    pub strategy: Option<StrategyKind>,
    /// Model calls made, including retries
    pub attempts: u32,
    /// Why the cascade gave up, when `success` is false
    pub error: Option<TranslationError>,
    /// One entry per rejected attempt
    pub notes: Vec<String>,
    /// Placeholders deliberately removed by the attribute strip
    pub dropped_placeholders: Vec<String>,
    pub from_cache: bool,
}

impl CascadeResult {
    fn accepted(text: String, strategy: StrategyKind, attempts: u32, notes: Vec<String>) -> Self {
        Self {
            text,
            success: true,
            strategy: Some(strategy),
            attempts,
            error: None,
            notes,
            dropped_placeholders: Vec::new(),
            from_cache: false,
        }
    }

    /// Original text, flagged as failed
    pub fn exhausted(original: &str, attempts: u32, error: TranslationError, notes: Vec<String>) -> Self {
        Self {
            text: original.to_string(),
            success: false,
            strategy: None,
            attempts,
            error: Some(error),
            notes,
            dropped_placeholders: Vec::new(),
            from_cache: false,
        }
    }
}

/// Ordered translation attempts with completeness validation
#[derive(Debug, Clone)]
pub struct StrategyCascade {
    client: TranslationClient,
    validator: CompletenessValidator,
    cache: TranslationCache,
    long_text_threshold: usize,
    borderline_ratio: f64,
}

impl StrategyCascade {
    pub fn new(
        client: TranslationClient,
        validator: CompletenessValidator,
        cache: TranslationCache,
        config: &TranslationConfig,
    ) -> Self {
        Self {
            client,
            validator,
            cache,
            long_text_threshold: config.long_text_threshold,
            borderline_ratio: config.borderline_ratio,
        }
    }

    pub fn client(&self) -> &TranslationClient {
        &self.client
    }

    pub fn validator(&self) -> &CompletenessValidator {
        &self.validator
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Run the plan's steps until one is accepted
    pub async fn run(&self, text: &str, target_language: &str, plan: FieldPlan, context: ValidationContext) -> CascadeResult {
        let family = plan.cache_family();
        if let Some(cached) = self.cache.get(text, target_language, family) {
            let mut result = CascadeResult::accepted(cached.text, cached.strategy, 0, Vec::new());
            result.from_cache = true;
            return result;
        }

        let expected = placeholder_tokens(text);
        let is_borderline = text.chars().count() as f64 >= self.borderline_ratio * self.long_text_threshold as f64;
        let mut attempts = 0;
        let mut notes = Vec::new();
        let mut last_failure: Option<(FailureKind, String)> = None;

        for &step in plan.steps() {
            if matches!(last_failure, Some((FailureKind::Fatal, _))) {
                break;
            }
            let length_failed = matches!(last_failure, Some((FailureKind::LengthRelated, _)));

            let mut input = text.to_string();
            let mut dropped = Vec::new();
            match step {
                StrategyKind::RaisedThreshold if !(length_failed && is_borderline) => continue,
                StrategyKind::StrippedAttributes => {
                    if !length_failed {
                        continue;
                    }
                    let stripped = strip_attributes(text);
                    let shrink = 1.0 - stripped.chars().count() as f64 / text.chars().count().max(1) as f64;
                    if shrink < STRIP_MIN_SHRINK {
                        debug!("Attribute strip only shrinks text by {:.0}%, skipping", shrink * 100.0);
                        continue;
                    }
                    dropped = expected.iter().filter(|t| !stripped.contains(t.as_str())).cloned().collect();
                    input = stripped;
                }
                _ => {}
            }

            let expected_here: Vec<String> = expected.iter().filter(|t| !dropped.contains(t)).cloned().collect();
            let (outcome, used) = self.attempt(step, &input, target_language, plan, context, &expected_here).await;
            attempts += used;

            match outcome {
                StrategyOutcome::Accepted(translated) => {
                    if step != StrategyKind::StrippedAttributes {
                        self.cache.store(text, target_language, family, &translated, step);
                    }
                    if step != plan.steps()[0] {
                        info!("Translated '{}' to {} via fallback strategy {}", truncate_text(text, 30), target_language, step);
                    }
                    let mut result = CascadeResult::accepted(translated, step, attempts, notes);
                    result.dropped_placeholders = dropped;
                    return result;
                }
                StrategyOutcome::Rejected { kind, reason } => {
                    warn!("Strategy {} rejected for {} ({:?}): {}", step, target_language, kind, reason);
                    notes.push(format!("{}: {}", step, reason));
                    last_failure = Some((kind, reason));
                }
            }
        }

        let error = match last_failure {
            Some((kind, reason)) => TranslationError::Exhausted(format!("last failure {:?}: {}", kind, reason)),
            None => TranslationError::NoStrategy,
        };
        CascadeResult::exhausted(text, attempts, error, notes)
    }

    /// Run a single strategy once (with call-level retries)
    pub async fn attempt(
        &self,
        step: StrategyKind,
        input: &str,
        target_language: &str,
        plan: FieldPlan,
        context: ValidationContext,
        expected_placeholders: &[String],
    ) -> (StrategyOutcome, u32) {
        let call = self.client.translate(input, target_language, step.call_spec(target_language)).await;
        let attempts = call.attempts;

        let mut output = match call.result {
            Ok(text) => text,
            Err(error) => {
                let kind = FailureKind::from_provider(&error);
                return (
                    StrategyOutcome::Rejected { kind, reason: TranslationError::Provider(error).to_string() },
                    attempts,
                );
            }
        };

        if step == StrategyKind::SeoDescription {
            output = clamp_seo_description(&output, target_language);
        }

        let lost: Vec<String> = expected_placeholders
            .iter()
            .filter(|t| !output.contains(t.as_str()))
            .cloned()
            .collect();
        if !lost.is_empty() {
            return (
                StrategyOutcome::Rejected {
                    kind: FailureKind::PlaceholderLoss,
                    reason: TranslationError::MissingPlaceholders(lost).to_string(),
                },
                attempts,
            );
        }

        let verdict = if step == StrategyKind::Simplified {
            let mut loose = self.validator.validate_loose(input, &output);
            if loose.is_complete && plan == FieldPlan::Title && is_cjk_language(target_language) {
                let strict = self.validator.validate_with(input, &output, target_language, context);
                if output.trim() == input.trim() || count_cjk(&output) == 0 {
                    loose = strict;
                }
            }
            loose
        } else {
            self.validator.validate_with(input, &output, target_language, context)
        };

        match verdict.reason {
            None => (StrategyOutcome::Accepted(output), attempts),
            Some(failure) => (
                StrategyOutcome::Rejected { kind: FailureKind::Validation, reason: failure.to_string() },
                attempts,
            ),
        }
    }
}

/// Remove class/style/id/data-* attributes from every tag
pub fn strip_attributes(text: &str) -> String {
    TAG_RE
        .replace_all(text, |caps: &regex::Captures| STRIPPABLE_ATTR_RE.replace_all(&caps[0], "").into_owned())
        .into_owned()
}

/// Character budget of a meta description in the target language
pub fn seo_limit(target_language: &str) -> usize {
    if is_cjk_language(target_language) {
        SEO_LIMIT_CJK
    } else {
        SEO_LIMIT_LATIN
    }
}

/// Cut a meta description into its band at a sentence or word boundary
pub fn clamp_seo_description(text: &str, target_language: &str) -> String {
    let limit = seo_limit(target_language);
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let head: String = text.chars().take(limit).collect();
    let sentence_end = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '。' | '！' | '？'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    if let Some(end) = sentence_end {
        if head[..end].chars().count() * 2 >= limit {
            return head[..end].trim().to_string();
        }
    }

    if !is_cjk_language(target_language) {
        if let Some(space) = head.rfind(char::is_whitespace) {
            if head[..space].chars().count() * 2 >= limit {
                return head[..space].trim_end_matches([',', ';', ':', ' ']).to_string();
            }
        }
    } else if let Some((i, _)) = head.char_indices().filter(|(_, c)| matches!(c, '，' | '、' | '；')).last() {
        if head[..i].chars().count() * 2 >= limit {
            return head[..i].to_string();
        }
    }
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::ApiConfig;
    use crate::providers::mock::MockProvider;
    use crate::translation::rate_limiter::RateLimiter;
    use crate::translation::retry::RetryPolicy;
    use std::sync::Arc;
    use std::time::Duration;

    fn cascade(mock: &MockProvider) -> StrategyCascade {
        let client = TranslationClient::new(
            Arc::new(mock.clone()),
            Arc::new(RateLimiter::unlimited()),
            &ApiConfig::default(),
            vec![],
        )
        .with_retry_policy(RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(5)).without_jitter());
        StrategyCascade::new(
            client,
            CompletenessValidator::default(),
            TranslationCache::new(false),
            &TranslationConfig::default(),
        )
    }

    const LONG_EN: &str = "This tarp keeps the rain away from your hammock and packs down small for every trip.";

    #[tokio::test(start_paused = true)]
    async fn test_run_rateLimitedThreeTimes_shouldSucceedViaSimplified() {
        let mock = MockProvider::mapping(|_| "Cette bâche protège votre hamac de la pluie et se range facilement.".into())
            .then_error(ProviderError::RateLimitExceeded("429".into()))
            .then_error(ProviderError::RateLimitExceeded("429".into()))
            .then_error(ProviderError::RateLimitExceeded("429".into()));
        let result = cascade(&mock).run(LONG_EN, "fr", FieldPlan::General, ValidationContext::default()).await;

        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyKind::Simplified));
        assert_eq!(result.attempts, 4);
        let calls = mock.calls();
        let gap1 = calls[1].at - calls[0].at;
        let gap2 = calls[2].at - calls[1].at;
        assert!(gap2 > gap1);
    }

    #[tokio::test]
    async fn test_run_totalFailure_shouldReturnOriginal() {
        let mock = MockProvider::failing(ProviderError::TooLong("context".into()));
        let result = cascade(&mock).run(LONG_EN, "de", FieldPlan::General, ValidationContext::default()).await;

        assert!(!result.success);
        assert_eq!(result.text, LONG_EN);
        assert!(matches!(result.error, Some(TranslationError::Exhausted(_))));
        // Enhanced and Simplified only: text is neither borderline nor strippable
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_run_fatalError_shouldStopImmediately() {
        let mock = MockProvider::failing(ProviderError::AuthenticationError("key".into()));
        let result = cascade(&mock).run(LONG_EN, "de", FieldPlan::General, ValidationContext::default()).await;
        assert!(!result.success);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_lostPlaceholder_shouldFallThrough() {
        let input = "Visit __PROTECTED_URL_0__ to see the full range of hammocks and tarps.";
        let mock = MockProvider::mapping(|t| t.replace("Visit", "Besuchen Sie").replace("to see the full range of hammocks and tarps", "für alle Hängematten und Planen"))
            .then_reply("Besuchen Sie unseren Shop für alle Hängematten und Planen.");
        let result = cascade(&mock).run(input, "de", FieldPlan::General, ValidationContext::default()).await;
        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyKind::Simplified));
        assert!(result.text.contains("__PROTECTED_URL_0__"));
        assert!(result.notes[0].contains("Placeholders lost during translation"));
    }

    #[tokio::test]
    async fn test_run_lengthFailure_shouldStripAttributes() {
        let input = format!(
            "<div class=\"{}\" style=\"{}\"><p>Packs small and sets up fast.</p></div>",
            "a".repeat(60),
            "b".repeat(60)
        );
        let mock = MockProvider::mapping(|t| t.replace("Packs small and sets up fast.", "Klein verpackt und schnell aufgebaut."))
            .then_error(ProviderError::TooLong("context".into()));
        let result = cascade(&mock).run(&input, "de", FieldPlan::General, ValidationContext::default()).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.strategy, Some(StrategyKind::StrippedAttributes));
        assert_eq!(result.text, "<div><p>Klein verpackt und schnell aufgebaut.</p></div>");
    }

    #[tokio::test]
    async fn test_run_hammockTitle_shouldBeAcceptedForProducts() {
        let mock = MockProvider::mapping(|_| "防水Hammock天幕".into());
        let result = cascade(&mock)
            .run("Waterproof Hammock Tarp", "zh-CN", FieldPlan::Title, ValidationContext::product())
            .await;
        assert!(result.success);
        assert_eq!(result.strategy, Some(StrategyKind::Title));
        assert_eq!(result.text, "防水Hammock天幕");
    }

    #[tokio::test]
    async fn test_run_titleIdentity_shouldBeRejectedForCjk() {
        let mock = MockProvider::echo();
        let result = cascade(&mock)
            .run("Waterproof Hammock Tarp", "ja", FieldPlan::Title, ValidationContext::product())
            .await;
        assert!(!result.success);
        assert_eq!(result.text, "Waterproof Hammock Tarp");
    }

    #[tokio::test]
    async fn test_run_cacheHit_shouldSkipProvider() {
        let mock = MockProvider::mapping(|_| "Bâche imperméable pour hamac".into());
        let mut c = cascade(&mock);
        c.cache = TranslationCache::new(true);
        let first = c.run("Waterproof Hammock Tarp", "fr", FieldPlan::Title, ValidationContext::product()).await;
        let second = c.run("Waterproof Hammock Tarp", "fr", FieldPlan::Title, ValidationContext::product()).await;
        assert_eq!(first.text, second.text);
        assert!(second.from_cache);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_run_cacheHitAfterFallback_shouldReportFallbackStrategy() {
        let input = "Visit __PROTECTED_URL_0__ to see the full range of hammocks and tarps.";
        let mock = MockProvider::mapping(|t| t.replace("Visit", "Besuchen Sie").replace("to see the full range of hammocks and tarps", "für alle Hängematten und Planen"))
            .then_reply("Besuchen Sie unseren Shop für alle Hängematten und Planen.");
        let mut c = cascade(&mock);
        c.cache = TranslationCache::new(true);

        let first = c.run(input, "de", FieldPlan::General, ValidationContext::default()).await;
        let second = c.run(input, "de", FieldPlan::General, ValidationContext::default()).await;

        assert_eq!(first.strategy, Some(StrategyKind::Simplified));
        assert!(second.from_cache);
        assert_eq!(second.strategy, Some(StrategyKind::Simplified));
        assert_eq!(second.text, first.text);
        assert_eq!(mock.call_count(), 2);
    }

    #[test]
    fn test_clampSeoDescription_shouldCutAtBoundaries() {
        let latin = "Lightweight tarp for hammock camping. ".repeat(6);
        let clamped = clamp_seo_description(&latin, "fr");
        assert!(clamped.chars().count() <= 160);
        assert!(clamped.ends_with('.'));

        let cjk = "轻便的吊床天幕，适合露营".repeat(10);
        let clamped = clamp_seo_description(&cjk, "zh-CN");
        assert!(clamped.chars().count() <= 80);

        assert_eq!(clamp_seo_description("  short  ", "de"), "short");
    }

    #[test]
    fn test_stripAttributes_shouldKeepOtherAttributes() {
        let html = r#"<a href="x" class="btn" data-id='7' title="Buy">Buy</a>"#;
        assert_eq!(strip_attributes(html), r#"<a href="x" title="Buy">Buy</a>"#);
    }
}
