use crate::error::IngestError;
use crate::models::{chunk_id, Article, ChunkMetadata, IndexedChunk, RagSettings};
use regex::Regex;

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub snippet_chars: usize,
}

impl From<&RagSettings> for ChunkingConfig {
    fn from(value: &RagSettings) -> Self {
        Self {
            max_chars: value.chunk_size,
            overlap_chars: value.chunk_overlap,
            snippet_chars: value.snippet_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        Self {
            max_chars,
            overlap_chars,
            snippet_chars: RagSettings::default().snippet_chars,
        }
    }

    /// Window size and overlap with the overlap clamped below the size, so
    /// the window always advances by at least one char.
    fn clamped(&self) -> (usize, usize) {
        let size = self.max_chars.max(1);
        (size, self.overlap_chars.min(size - 1))
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Char-offset windows `[start, end)` over a text of `len` chars.
pub fn chunk_spans(len: usize, config: ChunkingConfig) -> Vec<(usize, usize)> {
    let (size, overlap) = config.clamped();
    let step = size - overlap;

    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let end = (start + size).min(len);
        spans.push((start, end));
        if end == len {
            break;
        }
        start += step;
    }
    spans
}

pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();

    chunk_spans(chars.len(), config)
        .into_iter()
        .filter_map(|(start, end)| {
            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Splits an article into indexable chunks with contiguous indices.
/// Whitespace-only windows are dropped before numbering.
pub fn build_chunks(article: &Article, config: ChunkingConfig) -> Vec<IndexedChunk> {
    let metadata = ChunkMetadata::from(article);

    chunk_text(&article.content, config)
        .into_iter()
        .enumerate()
        .map(|(index, text)| IndexedChunk {
            chunk_id: chunk_id(article.id, index),
            article_id: article.id,
            chunk_index: index,
            snippet: snippet(&text, config.snippet_chars),
            text,
            metadata: metadata.clone(),
        })
        .collect()
}

/// Turns feed and page markup into plain text.
#[derive(Debug, Clone)]
pub struct HtmlCleaner {
    tag_re: Regex,
    numeric_entity_re: Regex,
}

impl HtmlCleaner {
    pub fn new() -> Result<Self, IngestError> {
        Ok(Self {
            tag_re: Regex::new(r"<[^>]+>")?,
            numeric_entity_re: Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);")?,
        })
    }

    pub fn clean(&self, raw_html: &str) -> String {
        let text = self.tag_re.replace_all(raw_html, " ");
        let text = self.unescape(&text);
        normalize_whitespace(&text).trim().to_string()
    }

    fn unescape(&self, text: &str) -> String {
        let decoded = self
            .numeric_entity_re
            .replace_all(text, |captures: &regex::Captures<'_>| {
                let code = &captures[1];
                let value = match code.strip_prefix('x') {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => code.parse::<u32>().ok(),
                };
                value
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default()
            });

        decoded
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&apos;", "'")
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
    }
}
