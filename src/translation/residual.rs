/*!
 * Residual English clean-up for CJK output.
 *
 * Models translating long product copy into Chinese, Japanese or Korean
 * sometimes leave whole English sentences, repeated selling points or
 * `title`/`alt` attribute values untouched. This pass finds such phrases in
 * the restored output, re-translates each one on its own and, if that does
 * not help, substitutes known technical terms from a static dictionary.
 */

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

use crate::language_utils::{base_code, count_cjk, is_cjk_language};
use crate::translation::client::CallSpec;
use crate::translation::prompts::PromptKind;
use crate::translation::strategy::StrategyCascade;

/// Markup the pass never looks into: comments, non-text containers, tags and
/// placeholder tokens. Tags are the only alternative starting with `<` that is
/// not a comment or a container, see `segments`.
static OPAQUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<!--.*?-->|<script\b.*?</script\s*>|<style\b.*?</style\s*>|<svg\b.*?</svg\s*>|<iframe\b.*?</iframe\s*>|<video\b.*?</video\s*>|<audio\b.*?</audio\s*>|<object\b.*?</object\s*>|<[^>]*>|__PROTECTED_[A-Z]+_\d+__",
    )
    .unwrap()
});

static CONTAINER_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^<(?:!--|script\b|style\b|svg\b|iframe\b|video\b|audio\b|object\b)").unwrap());

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).unwrap());

/// Four or more Latin words starting with a capital
static CAPITALIZED_SENTENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Z][a-z']+(?:[ ,\-]+[A-Za-z][A-Za-z']*){3,}[.!?]?").unwrap());

/// One to three Latin words of at least four letters
static SHORT_PHRASE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{4,}(?: [A-Za-z]{4,}){0,2}").unwrap());

static TEXT_ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)\s(?:title|alt)\s*=\s*"([^"]*)""#).unwrap());

/// English technical term with its Chinese, Japanese and Korean renderings
struct TechTerm {
    en: &'static str,
    zh: &'static str,
    ja: &'static str,
    ko: &'static str,
}

const TECH_TERMS: &[TechTerm] = &[
    TechTerm { en: "stainless steel", zh: "不锈钢", ja: "ステンレス鋼", ko: "스테인리스강" },
    TechTerm { en: "free shipping", zh: "免费送货", ja: "送料無料", ko: "무료 배송" },
    TechTerm { en: "package includes", zh: "包装内含", ja: "セット内容", ko: "구성품" },
    TechTerm { en: "waterproof", zh: "防水", ja: "防水", ko: "방수" },
    TechTerm { en: "water resistant", zh: "防泼水", ja: "撥水", ko: "생활 방수" },
    TechTerm { en: "lightweight", zh: "轻便", ja: "軽量", ko: "경량" },
    TechTerm { en: "breathable", zh: "透气", ja: "通気性", ko: "통기성" },
    TechTerm { en: "durable", zh: "耐用", ja: "耐久性", ko: "내구성" },
    TechTerm { en: "adjustable", zh: "可调节", ja: "調節可能", ko: "조절 가능" },
    TechTerm { en: "portable", zh: "便携", ja: "ポータブル", ko: "휴대용" },
    TechTerm { en: "wireless", zh: "无线", ja: "ワイヤレス", ko: "무선" },
    TechTerm { en: "rechargeable", zh: "可充电", ja: "充電式", ko: "충전식" },
    TechTerm { en: "battery", zh: "电池", ja: "バッテリー", ko: "배터리" },
    TechTerm { en: "charger", zh: "充电器", ja: "充電器", ko: "충전기" },
    TechTerm { en: "cable", zh: "线缆", ja: "ケーブル", ko: "케이블" },
    TechTerm { en: "warranty", zh: "保修", ja: "保証", ko: "보증" },
    TechTerm { en: "capacity", zh: "容量", ja: "容量", ko: "용량" },
    TechTerm { en: "weight", zh: "重量", ja: "重量", ko: "무게" },
    TechTerm { en: "dimensions", zh: "尺寸", ja: "寸法", ko: "치수" },
    TechTerm { en: "material", zh: "材质", ja: "素材", ko: "소재" },
    TechTerm { en: "cotton", zh: "棉", ja: "綿", ko: "면" },
    TechTerm { en: "leather", zh: "皮革", ja: "レザー", ko: "가죽" },
    TechTerm { en: "polyester", zh: "聚酯纤维", ja: "ポリエステル", ko: "폴리에스터" },
    TechTerm { en: "nylon", zh: "尼龙", ja: "ナイロン", ko: "나일론" },
    TechTerm { en: "aluminum", zh: "铝", ja: "アルミニウム", ko: "알루미늄" },
    TechTerm { en: "features", zh: "特点", ja: "特徴", ko: "특징" },
    TechTerm { en: "specifications", zh: "规格", ja: "仕様", ko: "사양" },
];

/// Dictionary regexes per language, longest terms first
static TERM_PATTERNS: Lazy<Vec<(Regex, &'static TechTerm)>> = Lazy::new(|| {
    let mut terms: Vec<&TechTerm> = TECH_TERMS.iter().collect();
    terms.sort_by_key(|t| std::cmp::Reverse(t.en.len()));
    terms
        .into_iter()
        .map(|t| (Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t.en))).unwrap(), t))
        .collect()
});

/// Where a residual phrase was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResidualKind {
    CapitalizedSentence,
    RepeatedPhrase,
    AttributeValue,
}

/// A Latin phrase left in CJK output
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResidualPhrase {
    pub kind: ResidualKind,
    pub text: String,
}

/// Outcome of the post-pass
#[derive(Debug, Clone, Default)]
pub struct ResidualReport {
    pub text: String,
    pub detected: usize,
    pub retranslated: usize,
    pub dictionary: usize,
    pub attempts: u32,
    pub notes: Vec<String>,
}

/// Substitute dictionary terms inside `phrase` for the target language
pub fn dictionary_substitute(phrase: &str, target_language: &str) -> Option<String> {
    let lang = base_code(target_language);
    let mut out = phrase.to_string();
    for (re, term) in TERM_PATTERNS.iter() {
        let replacement = match lang.as_str() {
            "zh" => term.zh,
            "ja" => term.ja,
            "ko" => term.ko,
            _ => return None,
        };
        out = re.replace_all(&out, replacement).into_owned();
    }
    (out != phrase).then_some(out)
}

/// Find residual Latin phrases in the visible text and text attributes
pub fn detect_residuals(html: &str, brand_terms: &[String]) -> Vec<ResidualPhrase> {
    let brands: Vec<String> = brand_terms.iter().map(|b| b.to_lowercase()).collect();
    let is_brand_only = |phrase: &str| {
        phrase
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .all(|w| brands.iter().any(|b| b.split_whitespace().any(|bw| bw == w.to_lowercase())))
    };

    let mut found = BTreeSet::new();
    let mut phrase_counts: HashMap<String, usize> = HashMap::new();

    let segments = segments(html);
    for run in segments.iter().filter(|s| s.kind == SegmentKind::Text).map(|s| s.text) {
        let urls: Vec<_> = URL_RE.find_iter(run).map(|m| m.range()).collect();
        let outside_urls = |r: &std::ops::Range<usize>| !urls.iter().any(|u| r.start < u.end && u.start < r.end);

        for m in CAPITALIZED_SENTENCE_RE.find_iter(run) {
            if outside_urls(&m.range()) && !is_brand_only(m.as_str()) {
                found.insert(ResidualPhrase { kind: ResidualKind::CapitalizedSentence, text: m.as_str().trim().to_string() });
            }
        }
        for m in SHORT_PHRASE_RE.find_iter(run) {
            if outside_urls(&m.range()) && !is_brand_only(m.as_str()) {
                *phrase_counts.entry(m.as_str().to_string()).or_default() += 1;
            }
        }
    }

    for (phrase, count) in phrase_counts {
        let inside_sentence = found.iter().any(|p| p.text.contains(&phrase));
        if count >= 2 && !inside_sentence {
            found.insert(ResidualPhrase { kind: ResidualKind::RepeatedPhrase, text: phrase });
        }
    }

    for tag in segments.iter().filter(|s| s.kind == SegmentKind::Tag) {
        for caps in TEXT_ATTR_RE.captures_iter(tag.text) {
            let value = caps[1].trim();
            if value.chars().any(|c| c.is_ascii_alphabetic()) && count_cjk(value) == 0 && !is_brand_only(value) {
                found.insert(ResidualPhrase { kind: ResidualKind::AttributeValue, text: value.to_string() });
            }
        }
    }

    found.into_iter().collect()
}

/// Re-translate residual phrases in CJK output, falling back to the dictionary
pub async fn clean_residuals(cascade: &StrategyCascade, html: &str, target_language: &str) -> ResidualReport {
    let mut report = ResidualReport { text: html.to_string(), ..ResidualReport::default() };
    if !is_cjk_language(target_language) {
        return report;
    }

    let phrases = detect_residuals(html, cascade.client().brand_terms());
    report.detected = phrases.len();
    if phrases.is_empty() {
        return report;
    }
    debug!("Residual pass found {} Latin phrase(s) in {} output", phrases.len(), target_language);

    for phrase in phrases {
        let call = cascade
            .client()
            .translate(&phrase.text, target_language, CallSpec::new(PromptKind::Residual))
            .await;
        report.attempts += call.attempts;

        let replacement = match call.result {
            Ok(t) if count_cjk(&t) > 0 && t.trim() != phrase.text && !t.contains('<') => {
                report.retranslated += 1;
                Some(t.trim().to_string())
            }
            _ => dictionary_substitute(&phrase.text, target_language).inspect(|_| report.dictionary += 1),
        };

        match replacement {
            Some(r) => report.text = replace_in_text(&report.text, &phrase, &r),
            None => report.notes.push(format!("residual English left: '{}'", phrase.text)),
        }
    }

    if report.retranslated + report.dictionary > 0 {
        info!(
            "Residual pass fixed {}/{} phrase(s) ({} via dictionary)",
            report.retranslated + report.dictionary,
            report.detected,
            report.dictionary
        );
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentKind {
    /// Visible text between tags
    Text,
    /// A single tag, whose title/alt values may be rewritten
    Tag,
    /// Comments, containers and placeholders, always kept byte for byte
    Opaque,
}

#[derive(Debug, Clone, Copy)]
struct Segment<'a> {
    kind: SegmentKind,
    text: &'a str,
}

/// Cut `html` into text, tag and opaque segments that concatenate back to it
fn segments(html: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for m in OPAQUE_RE.find_iter(html) {
        if m.start() > cursor {
            out.push(Segment { kind: SegmentKind::Text, text: &html[cursor..m.start()] });
        }
        let token = m.as_str();
        let kind = if token.starts_with('<') && !CONTAINER_START_RE.is_match(token) {
            SegmentKind::Tag
        } else {
            SegmentKind::Opaque
        };
        out.push(Segment { kind, text: token });
        cursor = m.end();
    }
    if cursor < html.len() {
        out.push(Segment { kind: SegmentKind::Text, text: &html[cursor..] });
    }
    out
}

/// Replace a phrase in text segments, or inside title/alt values for attribute residues
fn replace_in_text(html: &str, phrase: &ResidualPhrase, replacement: &str) -> String {
    segments(html)
        .into_iter()
        .map(|segment| match (segment.kind, phrase.kind) {
            (SegmentKind::Text, ResidualKind::CapitalizedSentence | ResidualKind::RepeatedPhrase) => {
                replace_outside_urls(segment.text, &phrase.text, replacement)
            }
            (SegmentKind::Tag, ResidualKind::AttributeValue) => TEXT_ATTR_RE
                .replace_all(segment.text, |caps: &regex::Captures| {
                    if caps[1].trim() == phrase.text {
                        caps[0].replacen(&phrase.text, replacement, 1)
                    } else {
                        caps[0].to_string()
                    }
                })
                .into_owned(),
            _ => segment.text.to_string(),
        })
        .collect()
}

fn replace_outside_urls(run: &str, from: &str, to: &str) -> String {
    let mut out = String::with_capacity(run.len());
    let mut cursor = 0;
    for url in URL_RE.find_iter(run) {
        out.push_str(&replace_words(&run[cursor..url.start()], from, to));
        out.push_str(url.as_str());
        cursor = url.end();
    }
    out.push_str(&replace_words(&run[cursor..], from, to));
    out
}

/// Replace `from` only where it is not glued to other Latin letters or digits.
/// CJK neighbours count as boundaries, unlike the regex `\b`.
fn replace_words(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let glued = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, _) in text.match_indices(from) {
        if start < cursor {
            continue;
        }
        let end = start + from.len();
        if glued(text[..start].chars().next_back()) || glued(text[end..].chars().next()) {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(to);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}
