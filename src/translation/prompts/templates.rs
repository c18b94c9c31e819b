/*!
 * Prompt templates for commerce content translation.
 *
 * Each strategy of the cascade owns one system prompt. The field text is
 * always sent as the user message, untouched.
 */

use crate::language_utils::prompt_language_name;

/// Reply the model is told to give when it cannot fit the translation
pub const TOO_LONG_SENTINEL: &str = "TEXT_TOO_LONG";

/// The prompt families used by the cascade and the field flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    /// Full-context prompt with placeholder and brand rules
    Enhanced,
    /// Minimal last-resort prompt
    Simplified,
    /// Concise product/page titles
    Title,
    /// Meta descriptions within a length band
    SeoDescription,
    /// Marker-delimited batch of list items
    ListItems,
    /// Space-delimited URL handle words
    Handle,
    /// Short residual English phrases
    Residual,
}

impl PromptKind {
    /// Stable family name, used as part of the cache key
    pub fn family(&self) -> &'static str {
        match self {
            Self::Enhanced => "enhanced",
            Self::Simplified => "simplified",
            Self::Title => "title",
            Self::SeoDescription => "seo_description",
            Self::ListItems => "list_items",
            Self::Handle => "handle",
            Self::Residual => "residual",
        }
    }
}

/// System prompt template for one prompt family.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// The template string with placeholders
    template: &'static str,
}

impl PromptTemplate {
    pub const ENHANCED: &'static str = r#"You are a professional e-commerce translator. Translate the user's text into {target_language}.

## Rules
- Output ONLY the translation. No explanations, no quotes, no notes.
- Translate every sentence completely. Never summarise or skip content.
- Keep every token of the form __PROTECTED_XXX_N__ exactly as written, in the same position. Never translate, split or remove them.
- Keep all HTML tags and attributes exactly as they are; translate only the visible text between tags.
- Keep URLs, e-mail addresses, SKUs, model numbers and measurements unchanged.
- Never translate these brand terms: {brand_terms}
- Use natural, persuasive {target_language} suited to an online store.
- If the text is too long for you to translate completely, reply with exactly TEXT_TOO_LONG and nothing else."#;

    pub const SIMPLIFIED: &'static str = r#"Translate the following text into {target_language}. Keep HTML tags and tokens like __PROTECTED_XXX_N__ unchanged. Output only the translation."#;

    pub const TITLE: &'static str = r#"You translate product and page titles for an online store into {target_language}.
- Output ONLY the translated title on one line.
- Keep it concise; do not add words, punctuation or quotes.
- Keep brand names, model numbers and sizes unchanged. Brand terms: {brand_terms}
- The title must actually be translated: do not return the original text."#;

    pub const SEO_DESCRIPTION: &'static str = r#"You translate SEO meta descriptions into {target_language}.
- Output ONLY the translated description as plain text, no HTML.
- Keep it under {max_chars} characters while keeping the key selling points.
- Keep brand names unchanged. Brand terms: {brand_terms}"#;

    pub const LIST_ITEMS: &'static str = r#"You translate bullet-point items of a product description into {target_language}.
The input is a list of items, each introduced by a marker line <<ITEM_N>> and terminated by <<END>>.
- Return the same markers, in the same order, each followed by the translation of its item.
- Translate every item; never merge, split, reorder or drop items.
- Keep HTML tags and tokens like __PROTECTED_XXX_N__ unchanged.
- Never translate these brand terms: {brand_terms}
- End your answer with <<END>>."#;

    pub const HANDLE: &'static str = r#"You translate URL handles (slugs) of an online store into {target_language}.
The input is a handle with its words separated by spaces.
- Output ONLY the translated words separated by single spaces, lowercase where the script has case.
- For languages written without spaces, insert a space between meaningful word units.
- Use at most {max_words} word units. No punctuation, no explanations."#;

    pub const RESIDUAL: &'static str = r#"Translate this short phrase into {target_language}. Output only the translation, nothing else. Keep brand names unchanged: {brand_terms}"#;

    /// Template for a prompt family
    pub fn for_kind(kind: PromptKind) -> Self {
        let template = match kind {
            PromptKind::Enhanced => Self::ENHANCED,
            PromptKind::Simplified => Self::SIMPLIFIED,
            PromptKind::Title => Self::TITLE,
            PromptKind::SeoDescription => Self::SEO_DESCRIPTION,
            PromptKind::ListItems => Self::LIST_ITEMS,
            PromptKind::Handle => Self::HANDLE,
            PromptKind::Residual => Self::RESIDUAL,
        };
        Self { template }
    }

    /// Render the template with the given variables.
    pub fn render(&self, target_language: &str, brand_terms: &[String]) -> String {
        let brands = if brand_terms.is_empty() {
            "(none)".to_string()
        } else {
            brand_terms.join(", ")
        };
        self.template
            .replace("{target_language}", &prompt_language_name(target_language))
            .replace("{brand_terms}", &brands)
    }

    /// Render with an additional numeric limit (`{max_chars}` / `{max_words}`)
    pub fn render_with_limit(&self, target_language: &str, brand_terms: &[String], limit: usize) -> String {
        self.render(target_language, brand_terms)
            .replace("{max_chars}", &limit.to_string())
            .replace("{max_words}", &limit.to_string())
    }
}

/// Whether a model reply is the explicit too-long sentinel
pub fn is_too_long_sentinel(reply: &str) -> bool {
    reply.trim().trim_matches(|c: char| c == '"' || c == '.' || c == '`') == TOO_LONG_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_promptTemplate_render_shouldReplaceVariables() {
        let prompt = PromptTemplate::for_kind(PromptKind::Enhanced).render("zh-CN", &["Acme".to_string()]);
        assert!(prompt.contains("Simplified Chinese"));
        assert!(prompt.contains("Acme"));
        assert!(!prompt.contains("{target_language}"));
    }

    #[test]
    fn test_renderWithLimit_shouldFillLimit() {
        let prompt = PromptTemplate::for_kind(PromptKind::SeoDescription).render_with_limit("fr", &[], 160);
        assert!(prompt.contains("160 characters"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn test_isTooLongSentinel_shouldTolerateDecoration() {
        assert!(is_too_long_sentinel("TEXT_TOO_LONG"));
        assert!(is_too_long_sentinel(" \"TEXT_TOO_LONG\". "));
        assert!(!is_too_long_sentinel("The TEXT_TOO_LONG marker"));
    }
}
