/*!
 * Reversible protection of non-translatable substrings.
 *
 * Protection runs a list of named matchers in priority order. Each matcher
 * returns `(span, kind)` pairs over the current text; every accepted span is
 * replaced by a unique `__PROTECTED_<KIND>_<seq>__` token. A span that
 * overlaps a token placed by an earlier matcher is skipped, so a stored value
 * never contains another token and restoration is a single exact pass.
 */

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Any token shaped like a placeholder
static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__PROTECTED_[A-Z]+_\d+__").unwrap());

static COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

/// One regex per container element (the regex crate has no backreferences)
static CONTAINER_RES: Lazy<Vec<(PlaceholderKind, Regex)>> = Lazy::new(|| {
    [
        (PlaceholderKind::Script, "script"),
        (PlaceholderKind::Style, "style"),
        (PlaceholderKind::Iframe, "iframe"),
        (PlaceholderKind::Video, "video"),
        (PlaceholderKind::Audio, "audio"),
        (PlaceholderKind::Object, "object"),
        (PlaceholderKind::Svg, "svg"),
    ]
    .into_iter()
    .map(|(kind, tag)| {
        let pattern = format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>");
        (kind, Regex::new(&pattern).unwrap())
    })
    .collect()
});

static MEDIA_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<(?:img|source|embed|track)\b[^>]*>").unwrap());

static OPEN_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[a-zA-Z][^>]*>").unwrap());

static ANY_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());

static PROTECTED_ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s(?:class|id|style|href|src|srcset|data-[\w-]+|aria-[\w-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .unwrap()
});

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^\s<>"']+"#).unwrap());

/// What a placeholder stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceholderKind {
    /// Input text that already looked like a placeholder
    Literal,
    Comment,
    Script,
    Style,
    Iframe,
    Video,
    Audio,
    Object,
    Svg,
    /// Self-closing media tag (img, source, embed, track)
    Media,
    /// Attribute value inside a tag
    Attr,
    Url,
    Brand,
}

impl PlaceholderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Literal => "LITERAL",
            Self::Comment => "COMMENT",
            Self::Script => "SCRIPT",
            Self::Style => "STYLE",
            Self::Iframe => "IFRAME",
            Self::Video => "VIDEO",
            Self::Audio => "AUDIO",
            Self::Object => "OBJECT",
            Self::Svg => "SVG",
            Self::Media => "MEDIA",
            Self::Attr => "ATTR",
            Self::Url => "URL",
            Self::Brand => "BRAND",
        }
    }
}

impl fmt::Display for PlaceholderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A byte range of the text a matcher wants protected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub range: Range<usize>,
    pub kind: PlaceholderKind,
}

type FindFn = Arc<dyn Fn(&str) -> Vec<Span> + Send + Sync>;

/// A named protection rule
#[derive(Clone)]
pub struct NamedMatcher {
    pub name: &'static str,
    find: FindFn,
}

impl NamedMatcher {
    pub fn new<F>(name: &'static str, find: F) -> Self
    where
        F: Fn(&str) -> Vec<Span> + Send + Sync + 'static,
    {
        Self { name, find: Arc::new(find) }
    }

    /// Spans this matcher would protect in `text`
    pub fn find(&self, text: &str) -> Vec<Span> {
        (self.find)(text)
    }
}

impl fmt::Debug for NamedMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedMatcher").field("name", &self.name).finish()
    }
}

/// A placeholder and the text it replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub token: String,
    pub kind: PlaceholderKind,
    pub original: String,
}

/// Ordered token -> original text mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMap {
    entries: Vec<Placeholder>,
    index: HashMap<String, usize>,
}

impl PlaceholderMap {
    fn push(&mut self, placeholder: Placeholder) {
        self.index.insert(placeholder.token.clone(), self.entries.len());
        self.entries.push(placeholder);
    }

    pub fn get(&self, token: &str) -> Option<&Placeholder> {
        self.index.get(token).map(|i| &self.entries[*i])
    }

    pub fn contains(&self, token: &str) -> bool {
        self.index.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Placeholder> {
        self.entries.iter()
    }

    /// Placeholders of a given kind
    pub fn of_kind(&self, kind: PlaceholderKind) -> impl Iterator<Item = &Placeholder> {
        self.entries.iter().filter(move |p| p.kind == kind)
    }

    /// Tokens of this map occurring in `text`, in order of appearance
    pub fn tokens_in(&self, text: &str) -> Vec<String> {
        PLACEHOLDER_RE
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|t| self.contains(t))
            .map(str::to_string)
            .collect()
    }
}

/// Text with placeholders plus the mapping needed to undo it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedText {
    pub text: String,
    pub map: PlaceholderMap,
}

/// Result of restoring a translated text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub text: String,
    /// Tokens of the map that were not found in the translated text
    pub missing: Vec<String>,
    /// Placeholder-shaped tokens that do not belong to the map
    pub unknown: Vec<String>,
}

impl Restored {
    /// Whether every protected substring made it back
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.unknown.is_empty()
    }
}

/// Reversible placeholder protection
#[derive(Debug, Clone)]
pub struct PlaceholderProtector {
    matchers: Vec<NamedMatcher>,
}

impl Default for PlaceholderProtector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaceholderProtector {
    /// Protector with the default matcher chain and no brand terms
    pub fn new() -> Self {
        Self::with_brand_terms(&[])
    }

    /// Protector that additionally shields the given brand terms
    pub fn with_brand_terms(brand_terms: &[String]) -> Self {
        let mut matchers = vec![
            NamedMatcher::new("literal_placeholders", |text| {
                regex_spans(&PLACEHOLDER_RE, text, PlaceholderKind::Literal)
            }),
            NamedMatcher::new("comments", |text| regex_spans(&COMMENT_RE, text, PlaceholderKind::Comment)),
            NamedMatcher::new("containers", |text| {
                CONTAINER_RES
                    .iter()
                    .flat_map(|(kind, re)| regex_spans(re, text, *kind))
                    .collect()
            }),
            NamedMatcher::new("media_tags", |text| regex_spans(&MEDIA_TAG_RE, text, PlaceholderKind::Media)),
            NamedMatcher::new("attribute_values", find_attribute_values),
            NamedMatcher::new("urls", find_urls),
        ];

        let terms: Vec<Regex> = brand_terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .filter_map(|t| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t.trim()))).ok())
            .collect();
        if !terms.is_empty() {
            matchers.push(NamedMatcher::new("brand_terms", move |text| {
                let tags = tag_ranges(text);
                terms
                    .iter()
                    .flat_map(|re| regex_spans(re, text, PlaceholderKind::Brand))
                    .filter(|span| !inside_any(&span.range, &tags))
                    .collect()
            }));
        }

        Self { matchers }
    }

    /// Names of the matchers, in priority order
    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|m| m.name).collect()
    }

    /// Replace every protected substring with a unique placeholder
    pub fn protect(&self, text: &str) -> ProtectedText {
        let mut current = text.to_string();
        let mut map = PlaceholderMap::default();
        let mut seq = 0usize;

        for matcher in &self.matchers {
            let taken: Vec<Range<usize>> = PLACEHOLDER_RE
                .find_iter(&current)
                .filter(|m| map.contains(m.as_str()))
                .map(|m| m.range())
                .collect();

            let mut spans = matcher.find(&current);
            if spans.is_empty() {
                continue;
            }
            spans.sort_by_key(|s| (s.range.start, std::cmp::Reverse(s.range.end)));

            let mut rebuilt = String::with_capacity(current.len());
            let mut cursor = 0;
            let mut accepted = 0;
            for span in spans {
                if span.range.start < cursor || span.range.is_empty() || overlaps_any(&span.range, &taken) {
                    continue;
                }
                let token = format!("__PROTECTED_{}_{}__", span.kind.as_str(), seq);
                seq += 1;
                rebuilt.push_str(&current[cursor..span.range.start]);
                rebuilt.push_str(&token);
                map.push(Placeholder {
                    token,
                    kind: span.kind,
                    original: current[span.range.clone()].to_string(),
                });
                cursor = span.range.end;
                accepted += 1;
            }
            rebuilt.push_str(&current[cursor..]);
            current = rebuilt;

            if accepted > 0 {
                debug!("Matcher '{}' protected {} span(s)", matcher.name, accepted);
            }
        }

        ProtectedText { text: current, map }
    }

    /// Substitute placeholders back, reporting missing and unknown tokens
    pub fn restore(text: &str, map: &PlaceholderMap) -> Restored {
        let unknown: Vec<String> = PLACEHOLDER_RE
            .find_iter(text)
            .map(|m| m.as_str())
            .filter(|t| !map.contains(t))
            .map(str::to_string)
            .collect();

        if map.is_empty() {
            return Restored { text: text.to_string(), missing: Vec::new(), unknown };
        }

        let alternation = map
            .iter()
            .map(|p| regex::escape(&p.token))
            .collect::<Vec<_>>()
            .join("|");
        let restored_text;
        let mut seen = HashSet::new();
        match Regex::new(&alternation) {
            Ok(re) => {
                restored_text = re
                    .replace_all(text, |caps: &regex::Captures| {
                        let token = &caps[0];
                        seen.insert(token.to_string());
                        map.get(token).map(|p| p.original.clone()).unwrap_or_else(|| token.to_string())
                    })
                    .into_owned();
            }
            Err(e) => {
                warn!("Falling back to sequential placeholder restore: {}", e);
                let mut out = text.to_string();
                for p in map.iter() {
                    if out.contains(&p.token) {
                        seen.insert(p.token.clone());
                        out = out.replace(&p.token, &p.original);
                    }
                }
                restored_text = out;
            }
        }

        let missing: Vec<String> = map
            .iter()
            .filter(|p| !seen.contains(&p.token))
            .map(|p| p.token.clone())
            .collect();
        if !missing.is_empty() {
            warn!("{} placeholder(s) missing after translation: {}", missing.len(), missing.join(", "));
        }

        Restored { text: restored_text, missing, unknown }
    }
}

/// Every placeholder-shaped token in `text`, in order of appearance
pub fn placeholder_tokens(text: &str) -> Vec<String> {
    PLACEHOLDER_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn regex_spans(re: &Regex, text: &str, kind: PlaceholderKind) -> Vec<Span> {
    re.find_iter(text).map(|m| Span { range: m.range(), kind }).collect()
}

fn find_attribute_values(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    for tag in OPEN_TAG_RE.find_iter(text) {
        for caps in PROTECTED_ATTR_RE.captures_iter(tag.as_str()) {
            if let Some(value) = caps.get(1).or_else(|| caps.get(2)) {
                if value.as_str().trim().is_empty() {
                    continue;
                }
                let start = tag.start() + value.start();
                spans.push(Span { range: start..start + value.len(), kind: PlaceholderKind::Attr });
            }
        }
    }
    spans
}

fn find_urls(text: &str) -> Vec<Span> {
    let tags = tag_ranges(text);
    URL_RE
        .find_iter(text)
        .filter_map(|m| {
            let trimmed = m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?', ')']);
            if trimmed.len() <= "https://".len() {
                return None;
            }
            let range = m.start()..m.start() + trimmed.len();
            (!inside_any(&range, &tags)).then_some(Span { range, kind: PlaceholderKind::Url })
        })
        .collect()
}

/// Byte ranges of every HTML tag in `text`
pub(crate) fn tag_ranges(text: &str) -> Vec<Range<usize>> {
    ANY_TAG_RE.find_iter(text).map(|m| m.range()).collect()
}

fn overlaps_any(range: &Range<usize>, others: &[Range<usize>]) -> bool {
    others.iter().any(|o| range.start < o.end && o.start < range.end)
}

fn inside_any(range: &Range<usize>, others: &[Range<usize>]) -> bool {
    others.iter().any(|o| o.start <= range.start && range.end <= o.end)
}
