/*!
 * Completeness validation of translation attempts.
 *
 * A short-circuiting chain of heuristics decides whether a model reply is a
 * complete translation of its input. Every threshold is carried by
 * `ValidatorConfig` so it can be tuned from the configuration file.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::language_utils::{count_cjk, count_latin, count_latin_words, is_latin_letter, target_script, Script};
use crate::translation::chunker::{is_html, visible_text};
use crate::translation::prompts::is_too_long_sentinel;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

static DANGLING_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*$").unwrap());

/// Thresholds of the completeness heuristics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorConfig {
    // @field: Inputs up to this many chars are always accepted
    #[serde(default = "default_trivial_length")]
    pub trivial_length: usize,

    // @field: Upper bound of the short-text branch
    #[serde(default = "default_short_text_max")]
    pub short_text_max: usize,

    // @field: Max Latin-letter share in short product text for non-Latin targets
    #[serde(default = "default_product_latin_ratio")]
    pub product_latin_ratio_max: f64,

    // @field: Max Latin-letter share in other short text for non-Latin targets
    #[serde(default = "default_other_latin_ratio")]
    pub other_latin_ratio_max: f64,

    // @field: Share of original content words left untranslated that fails a text
    #[serde(default = "default_word_mixing_ratio")]
    pub word_mixing_ratio: f64,

    // @field: Content words needed before word mixing is checked
    #[serde(default = "default_word_mixing_min_words")]
    pub word_mixing_min_words: usize,

    #[serde(default = "default_min_ratio_latin")]
    pub min_ratio_latin: f64,

    #[serde(default = "default_min_ratio_cjk")]
    pub min_ratio_cjk: f64,

    #[serde(default = "default_min_ratio_other")]
    pub min_ratio_other: f64,

    // @field: Length-floor multiplier for HTML input
    #[serde(default = "default_html_ratio_factor")]
    pub html_ratio_factor: f64,

    // @field: Length-floor multiplier for product content
    #[serde(default = "default_product_ratio_factor")]
    pub product_ratio_factor: f64,

    // @field: Allowed relative difference in tag count
    #[serde(default = "default_tag_tolerance")]
    pub tag_tolerance: f64,

    // @field: Allowed absolute difference in tag count, at least
    #[serde(default = "default_tag_tolerance_min")]
    pub tag_tolerance_min: usize,

    #[serde(default = "default_cjk_density_threshold")]
    pub cjk_density_threshold: f64,

    // @field: Pure-text length above which the density threshold is lowered
    #[serde(default = "default_cjk_long_text")]
    pub cjk_density_long_text: usize,

    #[serde(default = "default_cjk_long_text_reduction")]
    pub cjk_density_long_text_reduction: f64,

    #[serde(default = "default_cjk_density_floor")]
    pub cjk_density_floor: f64,

    // @field: Absolute CJK char count that is always enough
    #[serde(default = "default_cjk_min_count")]
    pub cjk_min_count: usize,

    // @field: Minimum length share for the simplified last-resort strategy
    #[serde(default = "default_loose_min_ratio")]
    pub loose_min_ratio: f64,
}

fn default_trivial_length() -> usize {
    15
}

fn default_short_text_max() -> usize {
    100
}

fn default_product_latin_ratio() -> f64 {
    0.7
}

fn default_other_latin_ratio() -> f64 {
    0.5
}

fn default_word_mixing_ratio() -> f64 {
    0.8
}

fn default_word_mixing_min_words() -> usize {
    10
}

fn default_min_ratio_latin() -> f64 {
    0.4
}

fn default_min_ratio_cjk() -> f64 {
    0.2
}

fn default_min_ratio_other() -> f64 {
    0.3
}

fn default_html_ratio_factor() -> f64 {
    0.75
}

fn default_product_ratio_factor() -> f64 {
    0.8
}

fn default_tag_tolerance() -> f64 {
    0.3
}

fn default_tag_tolerance_min() -> usize {
    3
}

fn default_cjk_density_threshold() -> f64 {
    0.3
}

fn default_cjk_long_text() -> usize {
    1000
}

fn default_cjk_long_text_reduction() -> f64 {
    0.1
}

fn default_cjk_density_floor() -> f64 {
    0.15
}

fn default_cjk_min_count() -> usize {
    50
}

fn default_loose_min_ratio() -> f64 {
    0.1
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            trivial_length: default_trivial_length(),
            short_text_max: default_short_text_max(),
            product_latin_ratio_max: default_product_latin_ratio(),
            other_latin_ratio_max: default_other_latin_ratio(),
            word_mixing_ratio: default_word_mixing_ratio(),
            word_mixing_min_words: default_word_mixing_min_words(),
            min_ratio_latin: default_min_ratio_latin(),
            min_ratio_cjk: default_min_ratio_cjk(),
            min_ratio_other: default_min_ratio_other(),
            html_ratio_factor: default_html_ratio_factor(),
            product_ratio_factor: default_product_ratio_factor(),
            tag_tolerance: default_tag_tolerance(),
            tag_tolerance_min: default_tag_tolerance_min(),
            cjk_density_threshold: default_cjk_density_threshold(),
            cjk_density_long_text: default_cjk_long_text(),
            cjk_density_long_text_reduction: default_cjk_long_text_reduction(),
            cjk_density_floor: default_cjk_density_floor(),
            cjk_min_count: default_cjk_min_count(),
            loose_min_ratio: default_loose_min_ratio(),
        }
    }
}

/// Kind of content a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentClass {
    /// Product titles and descriptions, where brand and model names are common
    Product,
    #[default]
    General,
}

/// Extra knowledge about the text being validated
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationContext {
    pub content_class: ContentClass,
}

impl ValidationContext {
    pub fn product() -> Self {
        Self { content_class: ContentClass::Product }
    }
}

/// Why a translation was rejected
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("translation is empty")]
    Empty,

    #[error("translation is identical to the original")]
    IdenticalToOriginal,

    #[error("translation contains no characters of the target script")]
    MissingTargetScript,

    #[error("Latin letter ratio {ratio:.2} exceeds {limit:.2}")]
    ExcessiveLatin { ratio: f64, limit: f64 },

    #[error("{ratio:.2} of the original content words are left untranslated")]
    WordMixing { ratio: f64 },

    #[error("the model answered with the too-long sentinel")]
    TooLongSentinel,

    #[error("translation looks truncated: {0}")]
    Truncated(String),

    #[error("length ratio {ratio:.2} is below {floor:.2}")]
    TooShort { ratio: f64, floor: f64 },

    #[error("tag count changed from {original} to {translated}")]
    TagMismatch { original: usize, translated: usize },

    #[error("CJK density {ratio:.2} is below {threshold:.2} ({cjk_count} CJK chars)")]
    LowCjkDensity { ratio: f64, threshold: f64, cjk_count: usize },
}

/// Verdict of the validator
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub is_complete: bool,
    pub reason: Option<ValidationFailure>,
}

impl ValidationOutcome {
    pub fn accepted() -> Self {
        Self { is_complete: true, reason: None }
    }

    pub fn rejected(reason: ValidationFailure) -> Self {
        Self { is_complete: false, reason: Some(reason) }
    }
}

/// Heuristic completeness checks for translated text
#[derive(Debug, Clone, Default)]
pub struct CompletenessValidator {
    config: ValidatorConfig,
}

impl CompletenessValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate general content
    pub fn validate(&self, original: &str, translated: &str, target_language: &str) -> ValidationOutcome {
        self.validate_with(original, translated, target_language, ValidationContext::default())
    }

    /// Validate with explicit content context
    pub fn validate_with(
        &self,
        original: &str,
        translated: &str,
        target_language: &str,
        context: ValidationContext,
    ) -> ValidationOutcome {
        let outcome = self.check(original, translated, target_language, context);
        if let Some(reason) = &outcome.reason {
            debug!("Validation rejected translation to {}: {}", target_language, reason);
        }
        outcome
    }

    /// Loose acceptance used by the last-resort strategy
    pub fn validate_loose(&self, original: &str, translated: &str) -> ValidationOutcome {
        let translated = translated.trim();
        if translated.is_empty() {
            return ValidationOutcome::rejected(ValidationFailure::Empty);
        }
        if is_too_long_sentinel(translated) {
            return ValidationOutcome::rejected(ValidationFailure::TooLongSentinel);
        }
        let original_len = original.trim().chars().count().max(1) as f64;
        let ratio = translated.chars().count() as f64 / original_len;
        if ratio < self.config.loose_min_ratio {
            return ValidationOutcome::rejected(ValidationFailure::TooShort { ratio, floor: self.config.loose_min_ratio });
        }
        ValidationOutcome::accepted()
    }

    fn check(&self, original: &str, translated: &str, target_language: &str, context: ValidationContext) -> ValidationOutcome {
        let cfg = &self.config;
        let original_trimmed = original.trim();
        let translated_trimmed = translated.trim();
        let original_len = original_trimmed.chars().count();
        let script = target_script(target_language);
        let product = context.content_class == ContentClass::Product;
        let html = is_html(original_trimmed);

        // 1. trivial
        if original_len <= cfg.trivial_length {
            return ValidationOutcome::accepted();
        }

        // 2. empty / short text
        if translated_trimmed.is_empty() {
            return ValidationOutcome::rejected(ValidationFailure::Empty);
        }
        if is_too_long_sentinel(translated_trimmed) {
            return ValidationOutcome::rejected(ValidationFailure::TooLongSentinel);
        }
        if script != Script::Latin && translated_trimmed == original_trimmed && count_latin(original_trimmed) > 0 {
            return ValidationOutcome::rejected(ValidationFailure::IdenticalToOriginal);
        }
        if script == Script::Cjk && count_cjk(translated_trimmed) == 0 {
            return ValidationOutcome::rejected(ValidationFailure::MissingTargetScript);
        }
        if original_len <= cfg.short_text_max {
            if script != Script::Latin {
                let limit = if product { cfg.product_latin_ratio_max } else { cfg.other_latin_ratio_max };
                let ratio = latin_ratio(&visible_text(translated_trimmed));
                if ratio > limit {
                    return ValidationOutcome::rejected(ValidationFailure::ExcessiveLatin { ratio, limit });
                }
            }
            return ValidationOutcome::accepted();
        }

        // 3. word mixing
        if !html && !product {
            if let Some(ratio) = self.word_mixing_ratio(original_trimmed, translated_trimmed) {
                if ratio > cfg.word_mixing_ratio {
                    return ValidationOutcome::rejected(ValidationFailure::WordMixing { ratio });
                }
            }
        }

        // 4. truncation
        if let Some(pattern) = truncation_pattern(original_trimmed, translated_trimmed) {
            return ValidationOutcome::rejected(ValidationFailure::Truncated(pattern));
        }

        // 5. length ratio
        let base_floor = match script {
            Script::Latin => cfg.min_ratio_latin,
            Script::Cjk => cfg.min_ratio_cjk,
            Script::Other => cfg.min_ratio_other,
        };
        let mut floor = base_floor;
        if html {
            floor *= cfg.html_ratio_factor;
        }
        if product {
            floor *= cfg.product_ratio_factor;
        }
        let ratio = translated_trimmed.chars().count() as f64 / original_len as f64;
        if ratio < floor {
            return ValidationOutcome::rejected(ValidationFailure::TooShort { ratio, floor });
        }

        // 6. tag balance
        if html {
            let original_tags = TAG_RE.find_iter(original_trimmed).count();
            let translated_tags = TAG_RE.find_iter(translated_trimmed).count();
            let allowed = ((original_tags as f64 * cfg.tag_tolerance).ceil() as usize).max(cfg.tag_tolerance_min);
            if original_tags.abs_diff(translated_tags) > allowed {
                return ValidationOutcome::rejected(ValidationFailure::TagMismatch {
                    original: original_tags,
                    translated: translated_tags,
                });
            }
        }

        // 7. CJK density
        if product && script == Script::Cjk {
            if let Some(failure) = self.cjk_density(translated_trimmed) {
                return ValidationOutcome::rejected(failure);
            }
        }

        ValidationOutcome::accepted()
    }

    fn word_mixing_ratio(&self, original: &str, translated: &str) -> Option<f64> {
        let words: HashSet<String> = content_words(original).collect();
        if words.len() < self.config.word_mixing_min_words {
            return None;
        }
        let translated_words: HashSet<String> = content_words(translated).collect();
        let kept = words.iter().filter(|w| translated_words.contains(*w)).count();
        Some(kept as f64 / words.len() as f64)
    }

    fn cjk_density(&self, translated: &str) -> Option<ValidationFailure> {
        let cfg = &self.config;
        let pure: String = visible_text(translated).chars().filter(|c| !c.is_whitespace()).collect();
        let pure_len = pure.chars().count();
        if pure_len == 0 {
            return None;
        }
        let cjk_count = count_cjk(&pure);
        let ratio = cjk_count as f64 / pure_len as f64;

        let mut threshold = cfg.cjk_density_threshold;
        if pure_len > cfg.cjk_density_long_text {
            threshold -= cfg.cjk_density_long_text_reduction;
        }
        let threshold = threshold.max(cfg.cjk_density_floor);

        let latin_words = count_latin_words(&visible_text(translated));
        if ratio >= threshold || cjk_count >= cfg.cjk_min_count || cjk_count * 2 > latin_words {
            return None;
        }
        Some(ValidationFailure::LowCjkDensity { ratio, threshold, cjk_count })
    }
}

/// Lowercased Latin words of at least four letters
fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !is_latin_letter(c))
        .filter(|w| w.chars().count() >= 4)
        .map(|w| w.to_lowercase())
}

/// Latin letters over non-whitespace chars
fn latin_ratio(text: &str) -> f64 {
    let total = text.chars().filter(|c| !c.is_whitespace()).count();
    if total == 0 {
        return 0.0;
    }
    count_latin(text) as f64 / total as f64
}

fn truncation_pattern(original: &str, translated: &str) -> Option<String> {
    if DANGLING_TAG_RE.is_match(translated) {
        return Some("unterminated tag at the end".to_string());
    }
    let ellipsis = |s: &str| s.ends_with("...") || s.ends_with('…');
    if ellipsis(translated) && !ellipsis(original) {
        return Some("trailing ellipsis not present in the original".to_string());
    }
    None
}
