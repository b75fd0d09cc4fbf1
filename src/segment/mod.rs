//! Segmentation strategies.
//!
//! All strategies implement one contract: cut raw text into an ordered list
//! of non-empty chunk strings. Configuration is injected at construction and
//! strategy selection is a closed enum ([`SegmentationStrategy`]) resolved by
//! [`build_segmenter`], never a runtime string comparison.
//!
//! ```text
//! raw text ──► Segmenter ──► ordered chunks ──► AdaptiveRefiner
//!                │
//!                ├─ FixedWindowSegmenter     char windows, snapped boundaries
//!                ├─ StructureAwareSegmenter  paragraphs, records, annotations
//!                └─ SemanticGroupSegmenter   key-phrase sentence grouping
//! ```

pub mod fixed;
pub mod semantic;
pub mod structure;
pub mod text;

use crate::config::{ChunkingConfig, SegmentationStrategy};

pub use fixed::FixedWindowSegmenter;
pub use semantic::SemanticGroupSegmenter;
pub use structure::StructureAwareSegmenter;

/// Common contract for all segmentation strategies.
///
/// Implementations return trimmed, non-empty chunks no shorter than the
/// configured minimum. Degenerate input (empty or whitespace-only text)
/// yields an empty list, never an error.
pub trait Segmenter: Send + Sync {
    fn segment(&self, text: &str) -> Vec<String>;
}

/// Construct the segmenter selected by `config.strategy`.
pub fn build_segmenter(config: &ChunkingConfig) -> Box<dyn Segmenter> {
    match config.strategy {
        SegmentationStrategy::FixedWindow => Box::new(FixedWindowSegmenter::new(config.clone())),
        SegmentationStrategy::StructureAware => {
            Box::new(StructureAwareSegmenter::new(config.clone()))
        }
        SegmentationStrategy::SemanticGroup => {
            Box::new(SemanticGroupSegmenter::new(config.clone()))
        }
    }
}

/// Drop chunks under the minimum size, unless the entire input was already
/// shorter than the minimum (then the single chunk is the whole input).
pub(crate) fn enforce_min_size(chunks: Vec<String>, min_chunk_size: usize, source: &str) -> Vec<String> {
    let source_len = text::char_len(source.trim());
    if source_len > 0 && source_len < min_chunk_size && chunks.len() <= 1 {
        return chunks;
    }
    chunks
        .into_iter()
        .filter(|chunk| text::char_len(chunk) >= min_chunk_size)
        .collect()
}
