//! Paragraph-first segmentation that respects document structure.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::ChunkingConfig;

use super::text::{char_len, split_sentences};
use super::{enforce_min_size, Segmenter};

/// Matches record-like lines such as `Иванов, инженер: ...` or
/// `Smith, Lead Engineer: ...` at the start of a line.
static RECORD_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*\p{Lu}[^,:\n]{0,40},\s*[^:\n]{1,60}:").expect("record pattern is valid")
});

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("paragraph pattern is valid"));

/// Characters of neighbor context carried by an annotation snippet.
const CONTEXT_SNIPPET_LEN: usize = 60;

/// Splits on blank-line-separated paragraphs. Paragraphs under the target
/// size stay whole; larger ones are split on sentence boundaries with tail
/// sentences of the previous piece re-prepended as overlap. Structured
/// "Name, Role: ..." lists are split on record boundaries instead. With
/// `annotate_context` enabled, each chunk carries short snippets of its
/// neighbors to preserve cross-boundary meaning.
#[derive(Clone, Debug)]
pub struct StructureAwareSegmenter {
    config: ChunkingConfig,
}

impl StructureAwareSegmenter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    fn split_large_paragraph(&self, paragraph: &str) -> Vec<String> {
        if self.looks_like_record_list(paragraph) {
            return self.split_records(paragraph);
        }
        self.split_by_sentences(paragraph)
    }

    fn looks_like_record_list(&self, paragraph: &str) -> bool {
        RECORD_PATTERN.find_iter(paragraph).count() >= 2
    }

    /// Each record-pattern line starts a new record; records are packed into
    /// chunks up to the target size.
    fn split_records(&self, paragraph: &str) -> Vec<String> {
        let mut records: Vec<String> = Vec::new();
        for line in paragraph.lines() {
            let starts_record = RECORD_PATTERN.is_match(line);
            match records.last_mut() {
                Some(current) if !starts_record => {
                    current.push('\n');
                    current.push_str(line);
                }
                _ => records.push(line.to_string()),
            }
        }
        pack(records, self.config.target_size)
    }

    /// Sentence-boundary splitting with tail-sentence overlap.
    fn split_by_sentences(&self, paragraph: &str) -> Vec<String> {
        let sentences = split_sentences(paragraph);
        if sentences.len() < 2 {
            // Degenerate structure: return the paragraph as a single unit.
            return vec![paragraph.trim().to_string()];
        }

        let mut chunks: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let sentence_len = char_len(&sentence);
            if current_len > 0 && current_len + sentence_len + 1 > self.config.target_size {
                let chunk = current.join(" ");
                // Re-prepend the tail sentences as overlap for the next chunk.
                let tail = overlap_tail(&current, self.config.overlap);
                chunks.push(chunk);
                current = tail;
                current_len = current.iter().map(|s| char_len(s) + 1).sum();
            }
            current_len += sentence_len + 1;
            current.push(sentence);
        }
        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }

    fn annotate(&self, chunks: Vec<String>) -> Vec<String> {
        let snippets: Vec<(String, String)> = chunks
            .iter()
            .map(|chunk| {
                let head: String = chunk.chars().take(CONTEXT_SNIPPET_LEN).collect();
                let tail_start = char_len(chunk).saturating_sub(CONTEXT_SNIPPET_LEN);
                let tail: String = chunk.chars().skip(tail_start).collect();
                (head, tail)
            })
            .collect();

        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let mut annotated = String::new();
                if i > 0 {
                    annotated.push_str("[предыдущий контекст: ");
                    annotated.push_str(snippets[i - 1].1.trim());
                    annotated.push_str("]\n");
                }
                annotated.push_str(chunk);
                if i + 1 < chunks.len() {
                    annotated.push_str("\n[следующий контекст: ");
                    annotated.push_str(snippets[i + 1].0.trim());
                    annotated.push(']');
                }
                annotated
            })
            .collect()
    }
}

impl Segmenter for StructureAwareSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        let normalized = text.replace("\r\n", "\n");
        if normalized.trim().is_empty() {
            return Vec::new();
        }

        let paragraphs: Vec<&str> = PARAGRAPH_BREAK
            .split(&normalized)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        // Text without blank-line structure arrives here as one paragraph and
        // falls through to sentence splitting when it exceeds the target.
        let mut chunks: Vec<String> = Vec::new();
        for paragraph in paragraphs {
            if char_len(paragraph) <= self.config.target_size {
                chunks.push(paragraph.to_string());
            } else {
                chunks.extend(self.split_large_paragraph(paragraph));
            }
        }

        let chunks: Vec<String> = chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        let chunks = enforce_min_size(chunks, self.config.min_chunk_size, text);
        if self.config.annotate_context && chunks.len() > 1 {
            self.annotate(chunks)
        } else {
            chunks
        }
    }
}

/// Tail sentences of `current` totalling at most `overlap` characters.
fn overlap_tail(current: &[String], overlap: usize) -> Vec<String> {
    if overlap == 0 {
        return Vec::new();
    }
    let mut tail: Vec<String> = Vec::new();
    let mut total = 0usize;
    for sentence in current.iter().rev() {
        let len = char_len(sentence) + 1;
        if total + len > overlap {
            break;
        }
        total += len;
        tail.push(sentence.clone());
    }
    tail.reverse();
    tail
}

/// Pack pieces into chunks no longer than `target` characters, keeping order.
fn pack(pieces: Vec<String>, target: usize) -> Vec<String> {
    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for piece in pieces {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if !current.is_empty() && char_len(&current) + char_len(piece) + 1 > target {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(piece);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
