/*!
 * Order-preserving translation of `<ul>`/`<ol>` blocks.
 *
 * The text of every `<li>` is extracted, sent in marker-delimited batches,
 * validated item by item and written back into the original markup. Items
 * the batch reply lost or got wrong are repaired one by one with the
 * simplified strategy; if that also fails the original item text is kept.
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use crate::translation::chunker::visible_text;
use crate::translation::client::CallSpec;
use crate::translation::markers::ItemMarkers;
use crate::translation::prompts::PromptKind;
use crate::translation::protector::placeholder_tokens;
use crate::translation::strategy::{FieldPlan, StrategyCascade, StrategyKind, StrategyOutcome};
use crate::translation::validator::ValidationContext;

static LI_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<li\b[^>]*>").unwrap());

/// Tags that end the text of a list item
static ITEM_END_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)</?(?:li|ul|ol)\b[^>]*>").unwrap());

/// Translated list block and per-item bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub text: String,
    pub items: usize,
    /// Items accepted from the batch reply
    pub batch_translated: usize,
    /// Items fixed by the per-item repair
    pub repaired: usize,
    /// Items left in the source language
    pub kept_original: usize,
    pub attempts: u32,
    pub notes: Vec<String>,
}

impl ListResult {
    pub fn success(&self) -> bool {
        self.kept_original == 0
    }
}

/// Byte ranges of the text of each `<li>`, nested lists included
pub fn list_item_ranges(html: &str) -> Vec<Range<usize>> {
    LI_OPEN_RE
        .find_iter(html)
        .filter_map(|open| {
            let start = open.end();
            let end = ITEM_END_RE.find(&html[start..]).map(|m| start + m.start()).unwrap_or(html.len());
            (!visible_text(&html[start..end]).is_empty()).then_some(start..end)
        })
        .collect()
}

/// Translate a list block item by item
pub async fn translate_list(
    cascade: &StrategyCascade,
    html: &str,
    target_language: &str,
    context: ValidationContext,
    batch_size: usize,
) -> ListResult {
    let ranges = list_item_ranges(html);
    let mut result = ListResult { items: ranges.len(), ..ListResult::default() };
    if ranges.is_empty() {
        result.text = html.to_string();
        return result;
    }

    let originals: Vec<&str> = ranges.iter().map(|r| html[r.clone()].trim()).collect();
    let mut translated: Vec<Option<String>> = vec![None; originals.len()];

    for (batch_index, batch) in originals.chunks(batch_size.max(1)).enumerate() {
        let offset = batch_index * batch_size.max(1);
        let payload = ItemMarkers::build_batch(batch);
        let call = cascade
            .client()
            .translate(&payload, target_language, CallSpec::new(PromptKind::ListItems))
            .await;
        result.attempts += call.attempts;

        let response = match call.result {
            Ok(response) => response,
            Err(e) => {
                warn!("List batch {} failed: {}", batch_index, e);
                result.notes.push(format!("list batch {} failed: {}", batch_index, e));
                continue;
            }
        };

        let check = ItemMarkers::check(&response, batch.len());
        if !check.passed() {
            debug!("List batch {} reply damaged, missing items {:?}", batch_index, check.missing_indices);
        }

        for (i, text) in ItemMarkers::recover_items(&response, batch.len()) {
            let original = batch[i];
            let lost = placeholder_tokens(original).into_iter().any(|t| !text.contains(&t));
            let verdict = cascade.validator().validate_with(original, &text, target_language, context);
            if !lost && verdict.is_complete {
                translated[offset + i] = Some(text);
                result.batch_translated += 1;
            }
        }
    }

    for (i, slot) in translated.iter_mut().enumerate() {
        if slot.is_some() {
            continue;
        }
        let original = originals[i];
        let expected = placeholder_tokens(original);
        let (outcome, attempts) = cascade
            .attempt(StrategyKind::Simplified, original, target_language, FieldPlan::General, context, &expected)
            .await;
        result.attempts += attempts;
        match outcome {
            StrategyOutcome::Accepted(text) => {
                *slot = Some(text);
                result.repaired += 1;
            }
            StrategyOutcome::Rejected { reason, .. } => {
                warn!("List item {} kept in the source language: {}", i, reason);
                result.notes.push(format!("list item {} kept original: {}", i, reason));
                result.kept_original += 1;
            }
        }
    }

    // Rewrite each item's trimmed text in place, keeping surrounding whitespace
    let mut out = String::with_capacity(html.len());
    let mut cursor = 0;
    for (range, text) in ranges.iter().zip(&translated) {
        let raw = &html[range.clone()];
        let lead = raw.len() - raw.trim_start().len();
        let trail = raw.len() - raw.trim_end().len();
        let inner_start = range.start + lead;
        let inner_end = range.end - trail;
        out.push_str(&html[cursor..inner_start]);
        match text {
            Some(t) => out.push_str(t),
            None => out.push_str(&html[inner_start..inner_end]),
        }
        cursor = inner_end;
    }
    out.push_str(&html[cursor..]);
    result.text = out;
    result
}
