//! Fixed-size character windows with sentence-aware boundary snapping.

use crate::config::ChunkingConfig;

use super::text::snap_to_terminal;
use super::{enforce_min_size, Segmenter};

/// How far (in characters) a window boundary may move to reach a sentence
/// terminator.
const SNAP_RADIUS: usize = 100;

/// Walks the text in windows of `target_size` characters. When a window
/// boundary does not land at the end of the text, it snaps to the nearest
/// sentence terminator within [`SNAP_RADIUS`] characters. The next window
/// starts `overlap` characters before the previous end, so consecutive chunks
/// share controlled context.
#[derive(Clone, Debug)]
pub struct FixedWindowSegmenter {
    config: ChunkingConfig,
}

impl FixedWindowSegmenter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }
}

impl Segmenter for FixedWindowSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        let target = self.config.target_size.max(1);
        let overlap = self.config.overlap.min(target.saturating_sub(1));

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < total {
            let tentative = (start + target).min(total);
            let end = if tentative < total {
                snap_to_terminal(&chars, tentative, SNAP_RADIUS, start + 1).unwrap_or(tentative)
            } else {
                tentative
            };

            let window: String = chars[start..end].iter().collect();
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= total {
                break;
            }
            // Overlap is measured back from the snapped end; always advance.
            start = (end.saturating_sub(overlap)).max(start + 1);
        }

        enforce_min_size(chunks, self.config.min_chunk_size, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationStrategy;
    use crate::segment::text::char_len;
    use proptest::prelude::*;

    fn segmenter(target_size: usize, overlap: usize, min_chunk_size: usize) -> FixedWindowSegmenter {
        FixedWindowSegmenter::new(ChunkingConfig {
            strategy: SegmentationStrategy::FixedWindow,
            target_size,
            overlap,
            min_chunk_size,
            max_chunk_size: target_size * 4,
            ..Default::default()
        })
    }

    #[test]
    fn two_russian_sentences_split_at_periods() {
        // Scenario: 40-char windows with 10 chars of overlap over two
        // Cyrillic sentences.
        let text =
            "Это первое предложение. Это второе предложение, которое чуть длиннее первого.";
        let chunks = segmenter(40, 10, 20).segment(text);

        assert_eq!(chunks.len(), 2, "chunks: {chunks:?}");
        assert!(chunks[0].ends_with('.'));
        assert!(chunks[1].ends_with('.'));

        // The second chunk starts inside the overlap window of the first's tail.
        let second_head: String = chunks[1].chars().take(10).collect();
        assert!(
            chunks[0].ends_with(&second_head),
            "second chunk must begin within the first chunk's tail: {chunks:?}"
        );
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(segmenter(100, 20, 50).segment("").is_empty());
        assert!(segmenter(100, 20, 50).segment("   \n\t ").is_empty());
    }

    #[test]
    fn short_trailing_fragments_are_dropped() {
        let text = "A sentence that fills one full window nicely, with enough words. tail.";
        let chunks = segmenter(60, 0, 40).segment(text);
        assert_eq!(chunks.len(), 1, "chunks: {chunks:?}");
        assert!(chunks[0].ends_with("words."));
    }

    #[test]
    fn input_shorter_than_min_is_kept_whole() {
        let chunks = segmenter(100, 10, 50).segment("Short input.");
        assert_eq!(chunks, vec!["Short input.".to_string()]);
    }

    proptest! {
        /// Every character of the input appears in some chunk: walking the
        /// chunks and matching each against the source at or after the
        /// previous chunk's start covers the full text (interior text is
        /// never dropped, only leading/trailing whitespace trimmed).
        #[test]
        fn windows_cover_the_whole_text(
            body in proptest::collection::vec("[a-z]{2,8}", 10..60),
        ) {
            // Suffix every word with its index so no long substring repeats
            // and byte positions found below are the true ones.
            let text = body
                .iter()
                .enumerate()
                .map(|(i, w)| format!("{w}{i}"))
                .collect::<Vec<_>>()
                .join(" ")
                + ".";
            let config = ChunkingConfig {
                strategy: SegmentationStrategy::FixedWindow,
                target_size: 60,
                overlap: 15,
                min_chunk_size: 1,
                max_chunk_size: 240,
                ..Default::default()
            };
            let chunks = FixedWindowSegmenter::new(config).segment(&text);
            prop_assert!(!chunks.is_empty());

            // Each chunk occurs in the source, and consecutive chunks leave
            // no uncovered gap between them.
            let mut covered_to = 0usize;
            for chunk in &chunks {
                let at = text.find(chunk.as_str());
                prop_assert!(at.is_some(), "chunk not found in source: {chunk}");
                let at = at.unwrap_or_default();
                prop_assert!(
                    at <= covered_to,
                    "gap before chunk at byte {at}, covered to {covered_to}"
                );
                covered_to = covered_to.max(at + chunk.len());
            }
            prop_assert!(covered_to >= text.trim_end().len());
        }

        #[test]
        fn no_chunk_under_minimum(
            body in proptest::collection::vec("[a-z]{2,8}", 5..40),
            min in 5usize..40,
        ) {
            let text = body.join(" ") + ".";
            let config = ChunkingConfig {
                strategy: SegmentationStrategy::FixedWindow,
                target_size: 50,
                overlap: 10,
                min_chunk_size: min,
                max_chunk_size: 200,
                ..Default::default()
            };
            let chunks = FixedWindowSegmenter::new(config).segment(&text);
            if char_len(text.trim()) >= min {
                for chunk in &chunks {
                    prop_assert!(char_len(chunk) >= min);
                }
            }
        }
    }
}
