
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const PARAGRAPH_SEPARATOR: &str = "\n\n";
const PARAGRAPH_SEPARATOR_CHARS: usize = 2;

/// A passage of one page, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The passage text
    pub text: String,
    /// 1-based page the passage was taken from
    pub page: u32,
    /// Position of this chunk within the whole document
    pub chunk_index: usize,
    /// Length of `text` in characters
    pub char_count: usize,
}

/// Configuration for content chunking. All sizes are in characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Sliding window size, and the largest chunk ever produced
    pub max_chunk_chars: usize,
    /// Characters shared by adjacent windows of one oversized paragraph
    pub overlap_chars: usize,
    /// Paragraphs shorter than this are merged with a neighbor
    pub min_chunk_chars: usize,
    /// Hard cap on chunks taken from a single page
    pub max_chunks_per_page: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_chars: 750,
            overlap_chars: 150,
            min_chunk_chars: 200,
            max_chunks_per_page: 50,
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of two adjacent windows
    #[inline]
    pub fn stride(&self) -> usize {
        self.max_chunk_chars.saturating_sub(self.overlap_chars).max(1)
    }

    /// Share of a full window repeated at the start of the next one
    #[inline]
    pub fn overlap_fraction(&self) -> f32 {
        if self.max_chunk_chars == 0 {
            return 0.0;
        }
        self.overlap_chars as f32 / self.max_chunk_chars as f32
    }
}

/// Chunk every page of a document, numbering chunks across the document
#[inline]
pub fn chunk_document(pages: &[String], config: &ChunkingConfig) -> Vec<TextChunk> {
    let mut chunks = Vec::new();

    for (page_offset, page_text) in pages.iter().enumerate() {
        let page = u32::try_from(page_offset + 1).unwrap_or(u32::MAX);
        for text in chunk_page(page_text, config) {
            let char_count = text.chars().count();
            chunks.push(TextChunk {
                text,
                page,
                chunk_index: chunks.len(),
                char_count,
            });
        }
    }

    debug!(
        "Chunked {} pages into {} chunks (avg {} chars)",
        pages.len(),
        chunks.len(),
        chunks.iter().map(|c| c.char_count).sum::<usize>() / chunks.len().max(1)
    );

    chunks
}

/// Chunk the text of a single page.
///
/// Paragraphs are blank-line delimited. Short paragraphs are merged with
/// their neighbors first, then any block longer than the window is cut
/// into overlapping windows.
#[inline]
pub fn chunk_page(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let paragraphs = split_paragraphs(text);
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for block in merge_short_paragraphs(paragraphs, config) {
        chunks.extend(sliding_window(
            &block,
            config.max_chunk_chars,
            config.stride(),
        ));
    }

    if chunks.len() > config.max_chunks_per_page {
        warn!(
            "Page produced {} chunks, keeping the first {}",
            chunks.len(),
            config.max_chunks_per_page
        );
        chunks.truncate(config.max_chunks_per_page);
    }

    chunks
}

/// Split text on blank lines, trimming each paragraph
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut paragraphs);
        } else {
            current.push(line.trim_end());
        }
    }
    flush_paragraph(&mut current, &mut paragraphs);

    paragraphs
}

fn flush_paragraph(lines: &mut Vec<&str>, paragraphs: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let paragraph = lines.join("\n").trim().to_string();
    lines.clear();
    if !paragraph.is_empty() {
        paragraphs.push(paragraph);
    }
}

/// Merge paragraphs below the minimum size into their predecessor, as long
/// as the merged block still fits in one window
fn merge_short_paragraphs(paragraphs: Vec<String>, config: &ChunkingConfig) -> Vec<String> {
    let mut blocks: Vec<(String, usize)> = Vec::with_capacity(paragraphs.len());

    for paragraph in paragraphs {
        let len = paragraph.chars().count();

        if let Some((last, last_len)) = blocks.last_mut() {
            let merged_len = *last_len + PARAGRAPH_SEPARATOR_CHARS + len;
            let either_short = *last_len < config.min_chunk_chars || len < config.min_chunk_chars;
            if either_short && merged_len <= config.max_chunk_chars {
                last.push_str(PARAGRAPH_SEPARATOR);
                last.push_str(&paragraph);
                *last_len = merged_len;
                continue;
            }
        }

        blocks.push((paragraph, len));
    }

    blocks.into_iter().map(|(block, _)| block).collect()
}

/// Cut `text` into windows of `window` characters advancing by `stride`.
///
/// Text that fits in one window is returned whole; the final window is
/// capped at the end of the text.
fn sliding_window(text: &str, window: usize, stride: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window {
        return vec![text.to_string()];
    }

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + window).min(chars.len());
        windows.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += stride;
    }

    windows
}
