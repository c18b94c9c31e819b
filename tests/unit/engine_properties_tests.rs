/*!
 * Properties of the protect / chunk / validate stages on realistic content
 */

use once_cell::sync::Lazy;
use regex::Regex;
use storelingo::translation::chunker::join_chunks;
use storelingo::translation::protector::PlaceholderKind;
use storelingo::translation::{Chunker, CompletenessValidator, PlaceholderProtector, ValidationContext};

use crate::common::translators::long_product_html;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__PROTECTED_[A-Z]+_\d+__").unwrap());

fn samples() -> Vec<String> {
    vec![
        String::new(),
        "Plain text with no markup at all.".to_string(),
        "<p>Visit https://shop.example/hammocks?ref=mail for details.</p>".to_string(),
        "<style>.x{color:red}</style><p class=\"lead\" data-id=\"9\">Hello</p><!-- note -->".to_string(),
        "<svg viewBox=\"0 0 10 10\"><path d=\"M0 0\"/></svg><img src=\"a.png\"><p>Ünïcødé 防水 ✓</p>".to_string(),
        "Already __PROTECTED_URL_0__ in the input".to_string(),
        "<a href=\"https://x.example\" aria-label=\"go\">go</a><script>var a = '<p>';</script>".to_string(),
        long_product_html(),
    ]
}

#[test]
fn test_restoreProtect_shouldReproduceEverySample() {
    let protector = PlaceholderProtector::with_brand_terms(&["Trailhaven".to_string()]);
    for sample in samples() {
        let protected = protector.protect(&sample);
        let restored = PlaceholderProtector::restore(&protected.text, &protected.map);
        assert_eq!(restored.text, sample);
        assert!(restored.is_complete(), "missing {:?} in {:?}", restored.missing, sample);
    }
}

#[test]
fn test_protect_placeholderValues_shouldNeverNestPlaceholders() {
    let protector = PlaceholderProtector::new();
    for sample in samples() {
        let protected = protector.protect(&sample);
        for placeholder in protected.map.iter() {
            assert!(
                !TOKEN_RE.is_match(&placeholder.original) || placeholder.kind == PlaceholderKind::Literal,
                "nested placeholder in {:?}",
                placeholder.original
            );
        }
    }
}

#[test]
fn test_chunk_boundaries_shouldNotSplitTagsOrPlaceholders() {
    let protected = PlaceholderProtector::new().protect(&long_product_html());
    let chunks = Chunker::new(400, 3).chunk(&protected.text);
    assert!(chunks.len() > 1);

    for chunk in &chunks {
        let whole_tokens = TOKEN_RE.find_iter(&chunk.text).count();
        assert_eq!(whole_tokens, chunk.text.matches("__PROTECTED_").count(), "cut placeholder in {:?}", chunk.text);
        assert_eq!(chunk.text.matches('<').count(), chunk.text.matches('>').count(), "cut tag in {:?}", chunk.text);
        assert!(chunk.oversized || chunk.char_len() <= 400);
    }

    let rejoined = join_chunks(chunks.iter().map(|c| (c, c.text.clone())));
    assert_eq!(rejoined, protected.text);
}

#[test]
fn test_validate_trivialInputs_shouldAlwaysBeComplete() {
    let validator = CompletenessValidator::default();
    for original in ["Hi", "Tarp", "Free shipping!", "   x   ", "15 characters.."] {
        for translated in ["", "Hi", "...", "<p"] {
            for lang in ["fr", "ja", "ru"] {
                let outcome = validator.validate_with(original, translated, lang, ValidationContext::product());
                assert!(outcome.is_complete, "{:?} -> {:?} ({})", original, translated, lang);
            }
        }
    }
}
