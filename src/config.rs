//! Configuration for segmentation, refinement, and the embedding pipeline.
//!
//! Strategy selection is a closed enum resolved at construction time; nothing
//! dispatches on strategy names at runtime. [`PipelineConfig::from_env`]
//! layers environment overrides (via `dotenvy`) over the defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The closed set of segmentation strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationStrategy {
    /// Character windows snapped to sentence terminators.
    FixedWindow,
    /// Paragraph-first splitting with sentence-level recursion.
    #[default]
    StructureAware,
    /// Key-phrase guided grouping of consecutive sentences.
    SemanticGroup,
}

impl SegmentationStrategy {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "fixed_window" => Some(Self::FixedWindow),
            "structure_aware" => Some(Self::StructureAware),
            "semantic_group" => Some(Self::SemanticGroup),
            _ => None,
        }
    }
}

/// Shared segmentation parameters. All sizes are measured in characters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: SegmentationStrategy,
    /// Soft target length for a chunk.
    pub target_size: usize,
    /// Characters shared between consecutive chunks.
    pub overlap: usize,
    /// Chunks shorter than this are discarded.
    pub min_chunk_size: usize,
    /// Hard ceiling a repair may grow a chunk to.
    pub max_chunk_size: usize,
    /// Number of key phrases the semantic-group strategy extracts.
    pub key_phrase_count: usize,
    /// Annotate structure-aware chunks with neighbor context snippets.
    pub annotate_context: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: SegmentationStrategy::default(),
            target_size: 800,
            overlap: 100,
            min_chunk_size: 50,
            max_chunk_size: 1600,
            key_phrase_count: 10,
            annotate_context: false,
        }
    }
}

/// Parameters for the adaptive refinement loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Chunks scoring below this overall value are repair candidates.
    pub quality_threshold: f64,
    /// Sub-scores below this value trigger their repair strategy.
    pub metric_trigger: f64,
    pub max_iterations: usize,
    /// How far past a chunk's end boundary expansion may scan.
    pub forward_search_limit: usize,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 0.6,
            metric_trigger: 0.5,
            max_iterations: 3,
            forward_search_limit: 200,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub chunking: ChunkingConfig,
    pub refiner: RefinerConfig,
    /// Delay between consecutive embedding units: unit `i` starts after
    /// `stagger * i`. Respects external provider rate limits.
    pub stagger: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            refiner: RefinerConfig::default(),
            stagger: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    /// Build a configuration from the environment, falling back to defaults.
    ///
    /// Loads `.env` if present. Recognized variables:
    /// `CHUNK_STRATEGY` (`fixed_window` | `structure_aware` | `semantic_group`),
    /// `CHUNK_TARGET_SIZE`, `CHUNK_OVERLAP`, `CHUNK_MIN_SIZE`, `CHUNK_MAX_SIZE`,
    /// `REFINE_QUALITY_THRESHOLD`, `REFINE_MAX_ITERATIONS`,
    /// `EMBED_STAGGER_MS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Some(strategy) = env_var("CHUNK_STRATEGY")
            .as_deref()
            .and_then(SegmentationStrategy::from_label)
        {
            config.chunking.strategy = strategy;
        }
        if let Some(value) = env_parse::<usize>("CHUNK_TARGET_SIZE") {
            config.chunking.target_size = value;
        }
        if let Some(value) = env_parse::<usize>("CHUNK_OVERLAP") {
            config.chunking.overlap = value;
        }
        if let Some(value) = env_parse::<usize>("CHUNK_MIN_SIZE") {
            config.chunking.min_chunk_size = value;
        }
        if let Some(value) = env_parse::<usize>("CHUNK_MAX_SIZE") {
            config.chunking.max_chunk_size = value;
        }
        if let Some(value) = env_parse::<f64>("REFINE_QUALITY_THRESHOLD") {
            config.refiner.quality_threshold = value;
        }
        if let Some(value) = env_parse::<usize>("REFINE_MAX_ITERATIONS") {
            config.refiner.max_iterations = value;
        }
        if let Some(value) = env_parse::<u64>("EMBED_STAGGER_MS") {
            config.stagger = Duration::from_millis(value);
        }

        config
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_consistent() {
        let config = ChunkingConfig::default();
        assert!(config.overlap < config.target_size);
        assert!(config.min_chunk_size < config.target_size);
        assert!(config.target_size < config.max_chunk_size);
    }

    #[test]
    fn strategy_labels_parse() {
        assert_eq!(
            SegmentationStrategy::from_label("fixed_window"),
            Some(SegmentationStrategy::FixedWindow)
        );
        assert_eq!(SegmentationStrategy::from_label("nope"), None);
    }

    #[test]
    fn env_overrides_apply() {
        unsafe {
            std::env::set_var("CHUNK_TARGET_SIZE", "300");
            std::env::set_var("CHUNK_STRATEGY", "semantic_group");
        }
        let config = PipelineConfig::from_env();
        assert_eq!(config.chunking.target_size, 300);
        assert_eq!(
            config.chunking.strategy,
            SegmentationStrategy::SemanticGroup
        );
        unsafe {
            std::env::remove_var("CHUNK_TARGET_SIZE");
            std::env::remove_var("CHUNK_STRATEGY");
        }
    }
}
