/*!
 * Per-resource translation.
 *
 * The orchestrator translates every present field of a resource on its own:
 * titles and SEO fields go through their specialised plans, handles through
 * the slug flow, and longer text through protect, chunk, cascade and restore.
 * A field that cannot be translated keeps its source text and is flagged for
 * review; it never aborts the other fields.
 */

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;

use crate::app_config::TranslationConfig;
use crate::errors::TranslationError;
use crate::language_utils::is_cjk_language;
use crate::resource::{FieldName, FieldTranslation, Resource, ResourceType, TranslationResult};
use crate::translation::chunker::{join_chunks, visible_text, ChunkKind, Chunker};
use crate::translation::handle::translate_handle;
use crate::translation::lists::translate_list;
use crate::translation::protector::PlaceholderProtector;
use crate::translation::residual::clean_residuals;
use crate::translation::strategy::{CascadeResult, FieldPlan, StrategyCascade, StrategyKind};
use crate::translation::validator::{ContentClass, ValidationContext};

static ATOM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>|__PROTECTED_[A-Z]+_\d+__").unwrap());

/// Progress callback receiving 0..=100
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Intermediate result of translating protected text
#[derive(Debug, Default)]
struct TextOutcome {
    text: String,
    success: bool,
    strategy: Option<StrategyKind>,
    attempts: u32,
    notes: Vec<String>,
    dropped: Vec<String>,
    needs_review: bool,
}

impl From<CascadeResult> for TextOutcome {
    fn from(result: CascadeResult) -> Self {
        let mut notes = result.notes;
        if let Some(error) = result.error {
            notes.push(error.to_string());
        }
        Self {
            text: result.text,
            success: result.success,
            strategy: result.strategy,
            attempts: result.attempts,
            notes,
            dropped: result.dropped_placeholders,
            needs_review: false,
        }
    }
}

/// Drives all fields of one resource through the engine
#[derive(Debug, Clone)]
pub struct TranslationOrchestrator {
    cascade: StrategyCascade,
    protector: PlaceholderProtector,
    chunker: Chunker,
    long_text_threshold: usize,
    list_batch_size: usize,
    residual_post_pass: bool,
}

impl TranslationOrchestrator {
    pub fn new(cascade: StrategyCascade, config: &TranslationConfig) -> Self {
        let protector = PlaceholderProtector::with_brand_terms(cascade.client().brand_terms());
        Self {
            cascade,
            protector,
            chunker: Chunker::from_config(config),
            long_text_threshold: config.long_text_threshold,
            list_batch_size: config.list_batch_size,
            residual_post_pass: config.residual_post_pass,
        }
    }

    pub fn cascade(&self) -> &StrategyCascade {
        &self.cascade
    }

    pub fn protector(&self) -> &PlaceholderProtector {
        &self.protector
    }

    /// Translate every present field of `resource` into `target_language`
    pub async fn translate_resource(&self, resource: &Resource, target_language: &str) -> TranslationResult {
        self.translate_resource_with_progress(resource, target_language, &|_| {}).await
    }

    pub async fn translate_resource_with_progress(
        &self,
        resource: &Resource,
        target_language: &str,
        progress: ProgressFn<'_>,
    ) -> TranslationResult {
        let fields = resource.present_fields();
        let context = match resource.resource_type {
            ResourceType::Product => ValidationContext::product(),
            _ => ValidationContext { content_class: ContentClass::General },
        };
        info!(
            "Translating {} {} into {} ({} field(s))",
            resource.resource_type.as_str(),
            resource.id,
            target_language,
            fields.len()
        );

        let mut result = TranslationResult::new(&resource.id, target_language);
        progress(0);
        for (i, field) in fields.iter().enumerate() {
            if let Some(original) = resource.field(*field) {
                let translation = self.translate_field(*field, original, target_language, context).await;
                if !translation.success {
                    warn!("Field {} of {} kept in the source language", field, resource.id);
                }
                result.fields.insert(*field, translation);
            }
            progress((((i + 1) * 100) / fields.len()) as u8);
        }
        if fields.is_empty() {
            progress(100);
        }

        info!(
            "Finished {} into {}: {}/{} field(s) translated, {} call(s)",
            resource.id,
            target_language,
            result.succeeded(),
            result.fields.len(),
            result.total_attempts()
        );
        result
    }

    /// Translate one field value
    pub async fn translate_field(
        &self,
        field: FieldName,
        original: &str,
        target_language: &str,
        context: ValidationContext,
    ) -> FieldTranslation {
        let mut translation = match field {
            FieldName::Handle => {
                let handle = translate_handle(&self.cascade, original, target_language).await;
                return FieldTranslation {
                    original: original.to_string(),
                    text: handle.handle,
                    success: handle.success,
                    strategy: None,
                    attempts: handle.attempts,
                    notes: handle.note.into_iter().collect(),
                    needs_review: !handle.success,
                };
            }
            FieldName::Title | FieldName::SeoTitle => {
                self.translate_text(original, target_language, FieldPlan::Title, context).await
            }
            FieldName::SeoDescription => {
                self.translate_text(original, target_language, FieldPlan::SeoDescription, context).await
            }
            FieldName::Description | FieldName::DescriptionHtml | FieldName::Summary | FieldName::Label => {
                self.translate_text(original, target_language, FieldPlan::General, context).await
            }
        };

        let residual_field = matches!(
            field,
            FieldName::Description | FieldName::DescriptionHtml | FieldName::Summary | FieldName::SeoDescription
        );
        if residual_field && translation.success && self.residual_post_pass && is_cjk_language(target_language) {
            let report = clean_residuals(&self.cascade, &translation.text, target_language).await;
            translation.attempts += report.attempts;
            if report.retranslated + report.dictionary < report.detected {
                translation.needs_review = true;
            }
            translation.notes.extend(report.notes);
            translation.text = report.text;
        }
        translation
    }

    /// Protect, translate (chunked when long) and restore one text value
    async fn translate_text(
        &self,
        original: &str,
        target_language: &str,
        plan: FieldPlan,
        context: ValidationContext,
    ) -> FieldTranslation {
        let protected = self.protector.protect(original);
        if visible_text(&protected.text).is_empty() {
            debug!("Nothing translatable in {} chars of markup", original.chars().count());
            return FieldTranslation {
                original: original.to_string(),
                text: original.to_string(),
                success: true,
                strategy: None,
                attempts: 0,
                notes: vec!["no translatable text".to_string()],
                needs_review: false,
            };
        }

        let long = plan == FieldPlan::General && protected.text.chars().count() > self.long_text_threshold;
        let outcome = if long {
            self.translate_chunked(&protected.text, target_language, context).await
        } else {
            TextOutcome::from(self.cascade.run(&protected.text, target_language, plan, context).await)
        };

        if !outcome.success {
            return FieldTranslation::failed(original, outcome.attempts, outcome.notes);
        }

        let restored = PlaceholderProtector::restore(&outcome.text, &protected.map);
        let mut notes = outcome.notes;
        let mut needs_review = outcome.needs_review;

        let missing: Vec<String> = restored
            .missing
            .iter()
            .filter(|t| !outcome.dropped.contains(t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            notes.push(TranslationError::MissingPlaceholders(missing).to_string());
            needs_review = true;
        }
        if !outcome.dropped.is_empty() {
            notes.push(format!("attributes stripped: {}", outcome.dropped.join(", ")));
        }
        if !restored.unknown.is_empty() {
            notes.push(format!("unknown placeholder tokens in output: {}", restored.unknown.join(", ")));
            needs_review = true;
        }

        FieldTranslation {
            original: original.to_string(),
            text: restored.text,
            success: true,
            strategy: outcome.strategy,
            attempts: outcome.attempts,
            notes,
            needs_review,
        }
    }

    /// Chunk protected text and translate each chunk according to its kind
    async fn translate_chunked(&self, protected: &str, target_language: &str, context: ValidationContext) -> TextOutcome {
        let chunks = self.chunker.chunk(protected);
        let mut outcome = TextOutcome::default();
        let mut outputs = Vec::with_capacity(chunks.len());
        let mut strategies = Vec::new();
        let (mut translatable, mut failed) = (0usize, 0usize);

        for (index, chunk) in chunks.iter().enumerate() {
            let text = match chunk.kind {
                ChunkKind::Markup => chunk.text.clone(),
                ChunkKind::List => {
                    translatable += 1;
                    let list = translate_list(&self.cascade, &chunk.text, target_language, context, self.list_batch_size).await;
                    outcome.attempts += list.attempts;
                    outcome.notes.extend(list.notes.iter().map(|n| format!("chunk {}: {}", index, n)));
                    if list.success() {
                        strategies.push(StrategyKind::ListItems);
                    } else {
                        outcome.needs_review = true;
                        if list.batch_translated + list.repaired == 0 {
                            failed += 1;
                        }
                    }
                    list.text
                }
                ChunkKind::Text if chunk.oversized => {
                    translatable += 1;
                    outcome.needs_review = true;
                    match self.translate_oversized(index, &chunk.text, target_language, context, &mut outcome).await {
                        Some((text, strategy)) => {
                            strategies.push(strategy);
                            text
                        }
                        None => {
                            failed += 1;
                            chunk.text.clone()
                        }
                    }
                }
                ChunkKind::Text => {
                    translatable += 1;
                    let result = self.cascade.run(&chunk.text, target_language, FieldPlan::General, context).await;
                    outcome.attempts += result.attempts;
                    if let (true, Some(strategy)) = (result.success, result.strategy) {
                        strategies.push(strategy);
                        outcome.dropped.extend(result.dropped_placeholders);
                    } else {
                        failed += 1;
                        outcome.notes.push(format!(
                            "chunk {} kept original: {}",
                            index,
                            result.error.map(|e| e.to_string()).unwrap_or_default()
                        ));
                    }
                    result.text
                }
            };
            outputs.push(text);
        }

        if failed > 0 {
            warn!("{}/{} chunk(s) kept in the source language", failed, translatable);
            outcome.needs_review = true;
        }
        outcome.success = translatable == 0 || failed < translatable;
        outcome.strategy = strategies.into_iter().max_by_key(|s| degradation(*s));
        outcome.text = join_chunks(chunks.iter().zip(outputs));
        outcome
    }

    /// Translate the head of an indivisible chunk and reattach the rest
    async fn translate_oversized(
        &self,
        index: usize,
        text: &str,
        target_language: &str,
        context: ValidationContext,
        outcome: &mut TextOutcome,
    ) -> Option<(String, StrategyKind)> {
        let Some(cut) = head_boundary(text, self.chunker.max_chunk_size()) else {
            outcome.notes.push(format!(
                "chunk {} is a single unit of {} chars, kept original",
                index,
                text.chars().count()
            ));
            return None;
        };

        let (head, tail) = text.split_at(cut);
        let result = self.cascade.run(head, target_language, FieldPlan::General, context).await;
        outcome.attempts += result.attempts;
        match (result.success, result.strategy) {
            (true, Some(strategy)) => {
                outcome.notes.push(format!(
                    "chunk {}: translated first {} chars, {} chars reattached untranslated",
                    index,
                    head.chars().count(),
                    tail.chars().count()
                ));
                Some((format!("{}{}", result.text, tail), strategy))
            }
            _ => {
                outcome.notes.push(format!(
                    "chunk {} kept original: {}",
                    index,
                    result.error.map(|e| e.to_string()).unwrap_or_default()
                ));
                None
            }
        }
    }
}

/// Position of a strategy in the general fallback order; list items count as first choice
fn degradation(kind: StrategyKind) -> usize {
    FieldPlan::General.steps().iter().position(|s| *s == kind).unwrap_or(0)
}

/// Byte offset to cut `text` at so the head fits `max_chars`, never inside a tag or placeholder
pub(crate) fn head_boundary(text: &str, max_chars: usize) -> Option<usize> {
    let limit = text.char_indices().nth(max_chars).map_or(text.len(), |(i, _)| i);
    let atoms: Vec<Range<usize>> = ATOM_RE.find_iter(text).map(|m| m.range()).collect();
    let inside = |pos: usize| atoms.iter().find(|r| r.start < pos && pos < r.end).cloned();

    let at_space = text[..limit]
        .char_indices()
        .rev()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .find(|&i| i > 0 && inside(i).is_none());
    if at_space.is_some() {
        return at_space;
    }

    let mut pos = limit;
    while let Some(atom) = inside(pos) {
        pos = atom.start;
    }
    (pos > 0 && pos < text.len()).then_some(pos)
}
