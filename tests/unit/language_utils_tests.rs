/*!
 * Tests for language utility functions
 */

use storelingo::language_utils::{
    Script, base_code, count_latin_words, get_language_name, is_cjk_language, language_codes_match,
    target_script, validate_language_code,
};

/// Test validation of store locales
#[test]
fn test_validate_language_code_withLocales_shouldAcceptKnownLanguages() {
    assert!(validate_language_code("fr").is_ok());
    assert!(validate_language_code("zh-CN").is_ok());
    assert!(validate_language_code("pt_BR").is_ok());
    assert!(validate_language_code(" DE ").is_ok());

    assert!(validate_language_code("xx").is_err());
    assert!(validate_language_code("").is_err());
    assert!(validate_language_code("e").is_err());
}

#[test]
fn test_get_language_name_withRegionalChinese_shouldNameTheScript() {
    assert_eq!(get_language_name("zh-CN").unwrap(), "Simplified Chinese");
    assert_eq!(get_language_name("zh-TW").unwrap(), "Traditional Chinese");
    assert_eq!(get_language_name("ja").unwrap(), "Japanese");
    assert_eq!(get_language_name("fr").unwrap(), "French");
}

#[test]
fn test_language_codes_match_shouldIgnoreRegion() {
    assert!(language_codes_match("pt-BR", "pt"));
    assert!(language_codes_match("zh-CN", "zh-TW"));
    assert!(!language_codes_match("fr", "de"));
    assert!(!language_codes_match("fr", "not-a-code"));
    assert_eq!(base_code("zh-Hant"), "zh");
}

#[test]
fn test_target_script_shouldClassifyWritingSystems() {
    assert_eq!(target_script("ja"), Script::Cjk);
    assert_eq!(target_script("ko-KR"), Script::Cjk);
    assert_eq!(target_script("ru"), Script::Other);
    assert_eq!(target_script("th"), Script::Other);
    assert_eq!(target_script("es"), Script::Latin);
    assert!(is_cjk_language("zh-CN"));
    assert!(!is_cjk_language("de"));
}

#[test]
fn test_count_latin_words_shouldSkipSingleLetters() {
    assert_eq!(count_latin_words("防水 Hammock 天幕 a B tarp"), 2);
    assert_eq!(count_latin_words("完全中文"), 0);
}
