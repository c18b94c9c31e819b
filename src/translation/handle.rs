/*!
 * URL handle (slug) translation.
 *
 * Handles are translated as space-delimited words, then cleaned up: repeated
 * semantic units are removed, the word count is capped by how dense the
 * target script is, and the result is normalised into a URL-safe slug.
 * When nothing usable comes back the handle becomes `<original>-<lang>`,
 * which cannot collide with the source handle.
 */

use log::{debug, warn};
use std::collections::HashSet;

use crate::language_utils::{target_script, Script};
use crate::translation::client::CallSpec;
use crate::translation::prompts::PromptKind;
use crate::translation::strategy::StrategyCascade;

/// Result of translating one handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleResult {
    pub handle: String,
    /// The model produced a usable slug
    pub success: bool,
    pub attempts: u32,
    pub note: Option<String>,
}

/// Maximum word units in a handle for the target language
pub fn max_handle_words(target_language: &str) -> usize {
    match target_script(target_language) {
        Script::Cjk => 5,
        Script::Other => 6,
        Script::Latin => 8,
    }
}

/// `waterproof-hammock_tarp` -> `waterproof hammock tarp`
pub fn handle_to_words(handle: &str) -> String {
    handle
        .split(['-', '_', ' '])
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, hyphen-joined slug of alphanumeric word units
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

/// Drop repeated word units and cap their number
pub fn dedupe_and_cap(words: &str, max_words: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    words
        .split_whitespace()
        .map(slugify)
        .filter(|w| !w.is_empty())
        .filter(|w| seen.insert(w.clone()))
        .take(max_words)
        .collect()
}

/// Slug used when translation yields nothing usable
pub fn fallback_handle(original: &str, target_language: &str) -> String {
    let base = slugify(&handle_to_words(original));
    let lang = slugify(target_language);
    match (base.is_empty(), lang.is_empty()) {
        (true, _) => lang,
        (false, true) => base,
        (false, false) => format!("{}-{}", base, lang),
    }
}

/// Translate a handle into a URL-safe slug in the target language
pub async fn translate_handle(cascade: &StrategyCascade, handle: &str, target_language: &str) -> HandleResult {
    let words = handle_to_words(handle);
    if words.is_empty() {
        return HandleResult {
            handle: fallback_handle(handle, target_language),
            success: false,
            attempts: 0,
            note: Some("empty handle".to_string()),
        };
    }

    let max_words = max_handle_words(target_language);
    let call = cascade
        .client()
        .translate(&words, target_language, CallSpec::new(PromptKind::Handle).with_limit(max_words))
        .await;

    let reason = match call.result {
        Ok(translated) => {
            // Only the first line counts; models sometimes add explanations below
            let first_line = translated.lines().next().unwrap_or_default();
            let units = dedupe_and_cap(first_line, max_words);
            let slug = units.join("-");
            if !slug.is_empty() {
                debug!("Handle '{}' -> '{}' ({})", handle, slug, target_language);
                return HandleResult { handle: slug, success: true, attempts: call.attempts, note: None };
            }
            "translation produced an empty slug".to_string()
        }
        Err(e) => e.to_string(),
    };

    let fallback = fallback_handle(handle, target_language);
    warn!("Handle '{}' falls back to '{}': {}", handle, fallback, reason);
    HandleResult {
        handle: fallback,
        success: false,
        attempts: call.attempts,
        note: Some(format!("handle fallback: {}", reason)),
    }
}
