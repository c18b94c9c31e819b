use anyhow::{anyhow, Result};
use isolang::Language;

/// Language utilities for locale handling and script detection
///
/// Commerce locales arrive as ISO 639-1 codes, optionally with a region
/// (`zh-CN`, `pt-BR`). The helpers here resolve names for prompts and
/// classify target languages by writing system, which drives the
/// completeness heuristics and the handle word caps.

/// Writing system family of a target language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    /// Latin alphabet (en, fr, de, ...)
    Latin,
    /// Chinese, Japanese, Korean
    Cjk,
    /// Any other non-Latin script (ru, ar, th, ...)
    Other,
}

/// Strip the region part of a locale (`zh-CN` -> `zh`)
pub fn base_code(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Resolve a locale to an isolang language
fn resolve(code: &str) -> Option<Language> {
    let base = base_code(code);
    match base.len() {
        2 => Language::from_639_1(&base),
        3 => Language::from_639_3(&base),
        _ => None,
    }
}

/// Validate that a locale carries a known ISO language
pub fn validate_language_code(code: &str) -> Result<()> {
    resolve(code)
        .map(|_| ())
        .ok_or_else(|| anyhow!("Invalid language code: {}", code))
}

/// Get the English language name for a locale, used in prompts
pub fn get_language_name(code: &str) -> Result<String> {
    let normalized = code.trim().to_lowercase().replace('_', "-");
    match normalized.as_str() {
        "zh-cn" | "zh-hans" | "zh-sg" => return Ok("Simplified Chinese".to_string()),
        "zh-tw" | "zh-hant" | "zh-hk" => return Ok("Traditional Chinese".to_string()),
        "pt-br" => return Ok("Brazilian Portuguese".to_string()),
        _ => {}
    }

    let lang = resolve(code).ok_or_else(|| anyhow!("Invalid language code: {}", code))?;
    Ok(lang.to_name().to_string())
}

/// Language name for prompts, falling back to the raw code
pub fn prompt_language_name(code: &str) -> String {
    get_language_name(code).unwrap_or_else(|_| code.to_string())
}

/// Check if two locales refer to the same base language
pub fn language_codes_match(code1: &str, code2: &str) -> bool {
    match (resolve(code1), resolve(code2)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Writing system of a target locale
pub fn target_script(code: &str) -> Script {
    match base_code(code).as_str() {
        "zh" | "ja" | "ko" | "zho" | "jpn" | "kor" => Script::Cjk,
        "ru" | "uk" | "bg" | "sr" | "mk" | "be" | "el" | "ar" | "fa" | "he" | "ur" | "hi" | "bn"
        | "ta" | "te" | "th" | "ka" | "hy" | "km" | "lo" | "my" => Script::Other,
        _ => Script::Latin,
    }
}

pub fn is_cjk_language(code: &str) -> bool {
    target_script(code) == Script::Cjk
}

/// Han ideographs, kana, hangul and CJK punctuation
pub fn is_cjk_char(c: char) -> bool {
    matches!(c as u32,
        0x3000..=0x303F
        | 0x3040..=0x309F
        | 0x30A0..=0x30FF
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xAC00..=0xD7AF
        | 0x1100..=0x11FF
        | 0xF900..=0xFAFF
        | 0xFF00..=0xFFEF
        | 0x20000..=0x2A6DF)
}

/// ASCII and Latin-1/Extended letters
pub fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || matches!(c as u32, 0x00C0..=0x024F if c.is_alphabetic())
}

pub fn count_cjk(text: &str) -> usize {
    text.chars().filter(|c| is_cjk_char(*c)).count()
}

pub fn count_latin(text: &str) -> usize {
    text.chars().filter(|c| is_latin_letter(*c)).count()
}

/// Number of Latin words (runs of at least two Latin letters)
pub fn count_latin_words(text: &str) -> usize {
    text.split(|c: char| !is_latin_letter(c))
        .filter(|w| w.chars().count() >= 2)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseCode_withRegion_shouldStripRegion() {
        assert_eq!(base_code("zh-CN"), "zh");
        assert_eq!(base_code("pt_BR"), "pt");
        assert_eq!(base_code("FR"), "fr");
    }

    #[test]
    fn test_getLanguageName_shouldResolveVariants() {
        assert_eq!(get_language_name("zh-CN").unwrap(), "Simplified Chinese");
        assert_eq!(get_language_name("fr").unwrap(), "French");
        assert_eq!(get_language_name("deu").unwrap(), "German");
        assert!(get_language_name("xx").is_err());
        assert_eq!(prompt_language_name("xx"), "xx");
    }

    #[test]
    fn test_targetScript_shouldClassify() {
        assert_eq!(target_script("ja"), Script::Cjk);
        assert_eq!(target_script("zh-TW"), Script::Cjk);
        assert_eq!(target_script("ru"), Script::Other);
        assert_eq!(target_script("de"), Script::Latin);
    }

    #[test]
    fn test_charCounts_shouldSeparateScripts() {
        let text = "防水Hammock天幕";
        assert_eq!(count_cjk(text), 4);
        assert_eq!(count_latin(text), 7);
        assert_eq!(count_latin_words("Ultra light tarp, 3 x 3 m"), 3);
    }

    #[test]
    fn test_languageCodesMatch_shouldIgnoreRegion() {
        assert!(language_codes_match("en-US", "en"));
        assert!(!language_codes_match("en", "fr"));
    }
}
