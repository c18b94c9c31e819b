/*!
 * Splitting of long protected text into request-sized chunks.
 *
 * Every chunk carries the `glue` that followed it in the input, so
 * `chunks.map(|c| c.text + c.glue).concat()` always reproduces the input
 * exactly. HTML is cut only between tags and never inside a placeholder.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::app_config::TranslationConfig;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[a-zA-Z/!][^>]*>").unwrap());

static TAG_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<(/?)([a-zA-Z][a-zA-Z0-9]*)").unwrap());

static PLACEHOLDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__PROTECTED_[A-Z]+_\d+__").unwrap());

static PARAGRAPH_BREAK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n\s*").unwrap());

/// Closing tags after which a chunk boundary reads naturally
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "table", "blockquote",
    "pre", "header", "footer", "figure", "br", "hr",
];

const LATIN_TERMINATORS: &[char] = &['.', '!', '?'];
const CJK_TERMINATORS: &[char] = &['。', '！', '？'];

/// How a chunk must be handled by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    /// Translatable text, possibly with inline markup
    Text,
    /// Tags and placeholders only, passed through untranslated
    Markup,
    /// A whole `<ul>`/`<ol>` block routed to the list strategy
    List,
}

/// A bounded slice of protected text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub kind: ChunkKind,
    /// Separator that followed this chunk in the input
    pub glue: String,
    /// A single indivisible unit larger than the chunk size
    pub oversized: bool,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Concatenate per-chunk outputs with each chunk's glue
pub fn join_chunks<'a>(parts: impl IntoIterator<Item = (&'a Chunk, String)>) -> String {
    let mut out = String::new();
    for (chunk, text) in parts {
        out.push_str(&text);
        out.push_str(&chunk.glue);
    }
    out
}

/// Whether the text contains HTML tags
pub fn is_html(text: &str) -> bool {
    TAG_RE.is_match(text)
}

/// Text left after removing tags and placeholders
pub fn visible_text(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    PLACEHOLDER_RE.replace_all(&without_tags, " ").trim().to_string()
}

/// A unit the packer cannot split further at the current level
#[derive(Debug, Clone)]
struct Piece {
    text: String,
    glue: String,
    /// A natural boundary follows this piece
    block_break: bool,
    list: bool,
}

impl Piece {
    fn new(text: impl Into<String>, glue: impl Into<String>) -> Self {
        Self { text: text.into(), glue: glue.into(), block_break: false, list: false }
    }

    fn len(&self) -> usize {
        self.text.chars().count() + self.glue.chars().count()
    }
}

/// Splits long text into chunks of at most `max_chunk_size` chars
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chunk_size: usize,
    markup_only_threshold: usize,
}

impl Chunker {
    pub fn new(max_chunk_size: usize, markup_only_threshold: usize) -> Self {
        Self {
            max_chunk_size: max_chunk_size.max(1),
            markup_only_threshold,
        }
    }

    pub fn from_config(config: &TranslationConfig) -> Self {
        Self::new(config.max_chunk_size, config.markup_only_threshold)
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    /// Chunk text, choosing the HTML or plain-text splitter
    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chunks = if text.chars().count() <= self.max_chunk_size {
            vec![self.finish(text.to_string(), String::new(), false)]
        } else if is_html(text) {
            self.chunk_html(text)
        } else {
            self.chunk_plain(text)
        };
        debug!(
            "Chunked {} chars into {} chunk(s) (max {})",
            text.chars().count(),
            chunks.len(),
            self.max_chunk_size
        );
        chunks
    }

    /// Greedy tag-aware packing of HTML
    pub fn chunk_html(&self, text: &str) -> Vec<Chunk> {
        let mut pieces = Vec::new();
        for piece in tokenize_html(text) {
            if piece.list || TAG_RE.is_match(&piece.text) || piece.len() <= self.max_chunk_size {
                pieces.push(piece);
            } else {
                pieces.extend(self.split_run(&piece.text));
            }
        }
        self.pack(pieces)
    }

    /// Paragraph, then sentence, then word splitting of plain text
    pub fn chunk_plain(&self, text: &str) -> Vec<Chunk> {
        let mut pieces = Vec::new();
        for paragraph in split_keep(text, &PARAGRAPH_BREAK_RE) {
            if paragraph.len() <= self.max_chunk_size {
                let mut p = paragraph;
                p.block_break = true;
                pieces.push(p);
            } else {
                let mut sub = self.split_run(&paragraph.text);
                if let Some(last) = sub.last_mut() {
                    last.glue.push_str(&paragraph.glue);
                    last.block_break = true;
                }
                pieces.extend(sub);
            }
        }
        self.pack(pieces)
    }

    /// Sentence pieces, falling back to words for overlong sentences
    fn split_run(&self, text: &str) -> Vec<Piece> {
        let mut out = Vec::new();
        for sentence in split_sentences(text) {
            if sentence.len() <= self.max_chunk_size {
                out.push(sentence);
                continue;
            }
            let mut words = split_words(&sentence.text);
            if let Some(last) = words.last_mut() {
                last.glue.push_str(&sentence.glue);
            }
            out.extend(words);
        }
        out
    }

    fn pack(&self, pieces: Vec<Piece>) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut current: Vec<Piece> = Vec::new();
        let mut current_len = 0;

        for piece in pieces {
            if piece.list {
                self.flush(&mut current, &mut chunks);
                current_len = 0;
                chunks.push(Chunk {
                    text: piece.text,
                    kind: ChunkKind::List,
                    glue: piece.glue,
                    oversized: false,
                });
                continue;
            }

            let len = piece.len();
            if !current.is_empty() && current_len + len > self.max_chunk_size {
                // Prefer the last natural boundary if it keeps the chunk at least half full
                let mut cut = current.len();
                let mut acc = 0;
                let mut best = None;
                for (i, p) in current.iter().enumerate() {
                    acc += p.len();
                    if p.block_break && acc * 2 >= self.max_chunk_size {
                        best = Some(i + 1);
                    }
                }
                if let Some(b) = best {
                    cut = b;
                }
                let rest = current.split_off(cut);
                self.flush(&mut current, &mut chunks);
                current = rest;
                current_len = current.iter().map(Piece::len).sum();
                if !current.is_empty() && current_len + len > self.max_chunk_size {
                    self.flush(&mut current, &mut chunks);
                    current_len = 0;
                }
            }
            current_len += len;
            current.push(piece);
        }
        self.flush(&mut current, &mut chunks);
        chunks
    }

    fn flush(&self, current: &mut Vec<Piece>, chunks: &mut Vec<Chunk>) {
        if current.is_empty() {
            return;
        }
        let pieces = std::mem::take(current);
        let last = pieces.len() - 1;
        let mut text = String::new();
        let mut glue = String::new();
        for (i, p) in pieces.into_iter().enumerate() {
            text.push_str(&p.text);
            if i == last {
                glue = p.glue;
            } else {
                text.push_str(&p.glue);
            }
        }
        let oversized = text.chars().count() > self.max_chunk_size;
        chunks.push(self.finish(text, glue, oversized));
    }

    fn finish(&self, text: String, glue: String, oversized: bool) -> Chunk {
        let kind = if visible_text(&text).chars().count() < self.markup_only_threshold {
            ChunkKind::Markup
        } else {
            ChunkKind::Text
        };
        Chunk { text, kind, glue, oversized }
    }
}

/// Tag and text runs, with whole `<ul>`/`<ol>` blocks folded into list pieces
fn tokenize_html(text: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let tags: Vec<regex::Match> = TAG_RE.find_iter(text).collect();
    let mut cursor = 0;
    let mut i = 0;

    while i < tags.len() {
        let tag = tags[i];
        if tag.start() > cursor {
            pieces.push(Piece::new(&text[cursor..tag.start()], ""));
        }

        let (closing, name) = tag_name(tag.as_str());
        if !closing && (name == "ul" || name == "ol") {
            if let Some(end_idx) = matching_close(&tags, i, &name) {
                let block = &text[tag.start()..tags[end_idx].end()];
                if block.to_ascii_lowercase().contains("<li") {
                    let mut piece = Piece::new(block, "");
                    piece.list = true;
                    piece.block_break = true;
                    pieces.push(piece);
                    cursor = tags[end_idx].end();
                    i = end_idx + 1;
                    continue;
                }
            }
        }

        let mut piece = Piece::new(tag.as_str(), "");
        piece.block_break = (closing || name == "br" || name == "hr") && BLOCK_TAGS.contains(&name.as_str());
        pieces.push(piece);
        cursor = tag.end();
        i += 1;
    }
    if cursor < text.len() {
        pieces.push(Piece::new(&text[cursor..], ""));
    }
    pieces
}

fn tag_name(tag: &str) -> (bool, String) {
    match TAG_NAME_RE.captures(tag) {
        Some(caps) => (!caps[1].is_empty(), caps[2].to_ascii_lowercase()),
        None => (false, String::new()),
    }
}

fn matching_close(tags: &[regex::Match], open: usize, name: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, tag) in tags.iter().enumerate().skip(open) {
        let (closing, tname) = tag_name(tag.as_str());
        if tname != name {
            continue;
        }
        if closing {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Some(idx);
            }
        } else {
            depth += 1;
        }
    }
    None
}

/// Split by a separator regex, attaching each separator as glue
fn split_keep(text: &str, separator: &Regex) -> Vec<Piece> {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut cursor = 0;
    let mut prefix = String::new();
    for m in separator.find_iter(text) {
        let body = &text[cursor..m.start()];
        if body.is_empty() {
            match pieces.last_mut() {
                Some(last) => last.glue.push_str(m.as_str()),
                None => prefix.push_str(m.as_str()),
            }
        } else {
            pieces.push(Piece::new(format!("{}{}", std::mem::take(&mut prefix), body), m.as_str()));
        }
        cursor = m.end();
    }
    if cursor < text.len() || !prefix.is_empty() {
        pieces.push(Piece::new(format!("{}{}", prefix, &text[cursor..]), ""));
    }
    pieces
}

/// Sentences with their trailing whitespace as glue
fn split_sentences(text: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let cjk = CJK_TERMINATORS.contains(&c);
        if !cjk && !LATIN_TERMINATORS.contains(&c) {
            continue;
        }
        // Swallow repeated terminators ("?!", "...")
        let mut end = idx + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if LATIN_TERMINATORS.contains(&next) || CJK_TERMINATORS.contains(&next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let followed_by_space = chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if !cjk && !followed_by_space {
            continue;
        }
        let mut glue_end = end;
        while let Some(&(j, next)) = chars.peek() {
            if next.is_whitespace() {
                glue_end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        pieces.push(Piece::new(&text[start..end], &text[end..glue_end]));
        start = glue_end;
    }
    if start < text.len() {
        pieces.push(Piece::new(&text[start..], ""));
    }
    pieces
}

fn split_words(text: &str) -> Vec<Piece> {
    static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    split_keep(text, &WS_RE)
}
