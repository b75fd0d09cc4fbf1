//! Iterative quality refinement of a segmented chunk list.
//!
//! The refiner walks the working list, scores every chunk, and repairs the
//! ones under the quality threshold — one repair strategy per chunk per
//! iteration, chosen by the first matching trigger:
//!
//! 1. boundary expansion (low completeness) — extend forward in the source
//!    text to the next sentence terminator;
//! 2. neighbor merge (low density, under target size) — fold into the
//!    previous or next chunk when the merge scores well;
//! 3. coherence split (low coherence, comfortably above twice the minimum)
//!    — cut at the sentence-count midpoint.
//!
//! A repair that would make a chunk strictly worse is discarded; heuristic
//! misses are not errors. The loop stops early when an iteration changes
//! nothing.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{ChunkingConfig, RefinerConfig};
use crate::quality::{QualityReport, QualityScorer};
use crate::segment::text::{char_len, is_terminal, split_sentences};

/// Finalized chunks plus the operator-facing analysis report.
#[derive(Clone, Debug)]
pub struct RefinementOutcome {
    pub chunks: Vec<String>,
    pub report: RefinementReport,
}

/// Aggregate quality analysis for one refinement run. Observability only;
/// correctness never depends on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefinementReport {
    pub chunk_count: usize,
    pub mean_score: f64,
    pub iterations_run: usize,
    pub repairs_applied: usize,
    pub suggestions: Vec<String>,
}

/// Drives the repair loop. Collaborators arrive at construction; the refiner
/// itself is synchronous, CPU-only, and free of shared mutable state.
#[derive(Clone, Debug)]
pub struct AdaptiveRefiner {
    scorer: QualityScorer,
    chunking: ChunkingConfig,
    config: RefinerConfig,
}

impl AdaptiveRefiner {
    pub fn new(scorer: QualityScorer, chunking: ChunkingConfig, config: RefinerConfig) -> Self {
        Self {
            scorer,
            chunking,
            config,
        }
    }

    /// Refine `initial` chunks cut from `source`.
    pub fn refine(&self, source: &str, initial: Vec<String>) -> RefinementOutcome {
        let mut chunks = initial;
        let mut iterations_run = 0usize;
        let mut repairs_applied = 0usize;

        for _ in 0..self.config.max_iterations {
            iterations_run += 1;
            let mut changed = false;

            let mut i = 0usize;
            while i < chunks.len() {
                let report = self.scorer.score(&chunks[i]);
                if report.overall < self.config.quality_threshold
                    && self.repair(source, &mut chunks, i, &report)
                {
                    changed = true;
                    repairs_applied += 1;
                }
                i += 1;
            }

            if !changed {
                break;
            }
        }

        let chunks = self.finalize(source, chunks);
        let report = self.analyze(&chunks, iterations_run, repairs_applied);
        RefinementOutcome { chunks, report }
    }

    /// Attempt the single repair whose trigger matches first. Returns whether
    /// the list changed.
    fn repair(
        &self,
        source: &str,
        chunks: &mut Vec<String>,
        i: usize,
        report: &QualityReport,
    ) -> bool {
        let trigger = self.config.metric_trigger;
        let len = char_len(&chunks[i]);

        if report.completeness < trigger {
            return self.expand_boundary(source, chunks, i, report);
        }
        if report.density < trigger && len < self.chunking.target_size {
            return self.merge_neighbor(chunks, i);
        }
        if report.coherence < trigger && len > 2 * self.chunking.min_chunk_size {
            return self.split_for_coherence(chunks, i, report);
        }
        false
    }

    /// Extend the chunk forward in the source text up to the next sentence
    /// terminator, bounded by the max size and the forward-search cap.
    fn expand_boundary(
        &self,
        source: &str,
        chunks: &mut [String],
        i: usize,
        report: &QualityReport,
    ) -> bool {
        let chunk = &chunks[i];
        let Some(start) = source.find(chunk.as_str()) else {
            // The chunk no longer matches the source verbatim (merged or
            // annotated); expansion does not apply.
            return false;
        };

        let rest = &source[start + chunk.len()..];
        let room = self
            .chunking
            .max_chunk_size
            .saturating_sub(char_len(chunk));
        let limit = self.config.forward_search_limit.min(room);
        if limit == 0 {
            return false;
        }

        let mut extension = String::new();
        let mut found_terminal = false;
        for (taken, c) in rest.chars().enumerate() {
            if taken >= limit {
                break;
            }
            extension.push(c);
            if is_terminal(c) {
                found_terminal = true;
                break;
            }
        }
        if !found_terminal {
            return false;
        }

        let candidate = format!("{chunk}{extension}");
        let candidate_score = self.scorer.score(&candidate);
        if candidate_score.overall >= report.overall {
            debug!(
                chunk_index = i,
                before = report.overall,
                after = candidate_score.overall,
                "boundary expansion applied"
            );
            chunks[i] = candidate;
            return true;
        }
        false
    }

    /// Merge with the previous chunk, then the next, keeping the first merge
    /// that stays under the max size and scores past 0.5.
    fn merge_neighbor(&self, chunks: &mut Vec<String>, i: usize) -> bool {
        const MERGE_ACCEPT: f64 = 0.5;

        if i > 0 {
            let merged = format!("{} {}", chunks[i - 1], chunks[i]);
            if char_len(&merged) <= self.chunking.max_chunk_size
                && self.scorer.score(&merged).overall > MERGE_ACCEPT
            {
                chunks[i - 1] = merged;
                chunks.remove(i);
                return true;
            }
        }
        if i + 1 < chunks.len() {
            let merged = format!("{} {}", chunks[i], chunks[i + 1]);
            if char_len(&merged) <= self.chunking.max_chunk_size
                && self.scorer.score(&merged).overall > MERGE_ACCEPT
            {
                chunks[i] = merged;
                chunks.remove(i + 1);
                return true;
            }
        }
        false
    }

    /// Split at the sentence-count midpoint. Both halves must meet the
    /// minimum size and the first half must not score worse than the whole;
    /// the second half joins the list immediately so no text is dropped.
    fn split_for_coherence(
        &self,
        chunks: &mut Vec<String>,
        i: usize,
        report: &QualityReport,
    ) -> bool {
        let sentences = split_sentences(&chunks[i]);
        if sentences.len() < 2 {
            return false;
        }

        let mid = sentences.len() / 2;
        let first = sentences[..mid].join(" ");
        let second = sentences[mid..].join(" ");
        if char_len(&first) < self.chunking.min_chunk_size
            || char_len(&second) < self.chunking.min_chunk_size
        {
            return false;
        }

        if self.scorer.score(&first).overall < report.overall {
            return false;
        }

        chunks[i] = first;
        chunks.insert(i + 1, second);
        true
    }

    /// Trim whitespace and drop chunks still under the minimum size. A lone
    /// chunk of an input that was always shorter than the minimum survives.
    fn finalize(&self, source: &str, chunks: Vec<String>) -> Vec<String> {
        let min = self.chunking.min_chunk_size;
        let whole_input_short =
            char_len(source.trim()) < min && chunks.len() <= 1;

        chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && (whole_input_short || char_len(c) >= min))
            .collect()
    }

    fn analyze(
        &self,
        chunks: &[String],
        iterations_run: usize,
        repairs_applied: usize,
    ) -> RefinementReport {
        let mut suggestions = Vec::new();
        let mut total = 0.0;
        for (i, chunk) in chunks.iter().enumerate() {
            let report = self.scorer.score(chunk);
            total += report.overall;
            if report.overall < self.config.quality_threshold {
                suggestions.push(match report.weakest_metric() {
                    "completeness" => format!(
                        "chunk {i}: truncated phrasing (completeness {:.2}); consider widening its boundaries",
                        report.completeness
                    ),
                    "coherence" => format!(
                        "chunk {i}: mixed topics (coherence {:.2}); consider splitting at a topic boundary",
                        report.coherence
                    ),
                    "density" => format!(
                        "chunk {i}: low information density ({:.2}); consider merging with a neighbor",
                        report.density
                    ),
                    _ => format!(
                        "chunk {i}: ragged boundaries ({:.2}); check for mid-word cuts or unbalanced brackets",
                        report.boundary
                    ),
                });
            }
        }
        let mean_score = if chunks.is_empty() {
            0.0
        } else {
            total / chunks.len() as f64
        };
        RefinementReport {
            chunk_count: chunks.len(),
            mean_score,
            iterations_run,
            repairs_applied,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SegmentationStrategy;

    fn refiner(min: usize, target: usize, max: usize) -> AdaptiveRefiner {
        AdaptiveRefiner::new(
            QualityScorer::default(),
            ChunkingConfig {
                strategy: SegmentationStrategy::FixedWindow,
                target_size: target,
                overlap: 0,
                min_chunk_size: min,
                max_chunk_size: max,
                ..Default::default()
            },
            RefinerConfig::default(),
        )
    }

    #[test]
    fn expansion_completes_a_truncated_chunk() {
        let source = "Хранилище данных отвечает на запросы быстро и стабильно работает под нагрузкой. Репликация выполняется асинхронно.";
        let truncated = "Хранилище данных отвечает на запросы быстро и стабильно работает под наг";
        let refiner = refiner(20, 200, 400);
        let outcome = refiner.refine(source, vec![truncated.to_string()]);
        assert_eq!(outcome.chunks.len(), 1);
        assert!(
            outcome.chunks[0].ends_with('.'),
            "expanded chunk should end at a sentence terminator: {}",
            outcome.chunks[0]
        );
    }

    #[test]
    fn repairs_never_make_a_chunk_worse() {
        let scorer = QualityScorer::default();
        let source = "просто набор слов без структуры и без завершения мысли тут";
        let chunk = source.to_string();
        let refiner = refiner(10, 100, 200);
        let before = scorer.score(&chunk).overall;
        let outcome = refiner.refine(source, vec![chunk.clone()]);
        // Either untouched or improved; never strictly worse.
        for result in &outcome.chunks {
            if result != &chunk {
                assert!(scorer.score(result).overall >= before);
            }
        }
    }

    #[test]
    fn finalization_drops_sub_minimum_chunks() {
        let source = "A full sentence that comfortably exceeds the minimum size. tiny";
        let refiner = refiner(30, 100, 200);
        let outcome = refiner.refine(
            source,
            vec![
                "A full sentence that comfortably exceeds the minimum size.".to_string(),
                "tiny".to_string(),
            ],
        );
        assert_eq!(outcome.chunks.len(), 1);
        assert!(outcome.chunks[0].starts_with("A full sentence"));
    }

    #[test]
    fn whole_short_input_survives_finalization() {
        let source = "Коротко.";
        let refiner = refiner(50, 100, 200);
        let outcome = refiner.refine(source, vec![source.to_string()]);
        assert_eq!(outcome.chunks, vec![source.to_string()]);
    }

    #[test]
    fn split_keeps_all_text() {
        // Two unrelated topics force low coherence; a strict threshold makes
        // the chunk a repair candidate.
        let source = "Векторная база данных хранит вложения документов и индексирует их для поиска по сходству запросов. \
                      Садовые растения требуют регулярного полива летом и хорошего освещения в течение всего дня.";
        let refiner = AdaptiveRefiner::new(
            QualityScorer::default(),
            ChunkingConfig {
                target_size: 400,
                overlap: 0,
                min_chunk_size: 40,
                max_chunk_size: 800,
                ..Default::default()
            },
            RefinerConfig {
                quality_threshold: 0.75,
                ..Default::default()
            },
        );
        let outcome = refiner.refine(source, vec![source.to_string()]);
        assert_eq!(outcome.chunks.len(), 2, "chunks: {:?}", outcome.chunks);
        let rejoined: String = outcome.chunks.join(" ");
        // Every word of the source survives somewhere in the output.
        for word in source.split_whitespace() {
            assert!(rejoined.contains(word), "lost word: {word}");
        }
    }

    #[test]
    fn iteration_cap_is_respected() {
        let source = "плохой кусок";
        let refiner = refiner(5, 50, 100);
        let outcome = refiner.refine(source, vec![source.to_string()]);
        assert!(outcome.report.iterations_run <= RefinerConfig::default().max_iterations);
    }

    #[test]
    fn report_flags_weak_chunks() {
        let source = "слова без смысла и связи просто чтобы было от и до";
        let refiner = refiner(5, 100, 200);
        let outcome = refiner.refine(source, vec![source.to_string()]);
        assert_eq!(outcome.report.chunk_count, outcome.chunks.len());
        if outcome
            .chunks
            .iter()
            .any(|c| QualityScorer::default().score(c).overall < 0.6)
        {
            assert!(!outcome.report.suggestions.is_empty());
        }
    }

    #[test]
    fn empty_initial_list_stays_empty() {
        let refiner = refiner(50, 800, 1600);
        let outcome = refiner.refine("", Vec::new());
        assert!(outcome.chunks.is_empty());
        assert_eq!(outcome.report.chunk_count, 0);
    }
}
