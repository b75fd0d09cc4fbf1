//! Chunk quality scoring.
//!
//! [`QualityScorer::score`] is a pure function: given the same text and the
//! same [`ScorerConfig`] it returns bit-identical results. It performs no I/O
//! and keeps no state, so it is safe on request threads and background tasks
//! alike. The stopword and discourse-connective lists default to combined
//! English + Russian vocabularies matching the corpus.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::segment::text::{char_len, is_terminal, lower_words, split_sentences, words};

/// English + Russian stopwords used by the default configuration.
static DEFAULT_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "in", "on", "at", "to",
        "for", "from", "by", "with", "about", "as", "into", "through", "is", "are", "was", "were",
        "be", "been", "being", "have", "has", "had", "do", "does", "did", "will", "would", "can",
        "could", "should", "may", "might", "this", "that", "these", "those", "it", "its", "he",
        "she", "they", "we", "you", "i", "not", "no", "so", "such", "than", "too", "very", "just",
        "there", "here", "what", "which", "who", "when", "where", "how", "all", "any", "both",
        "each", "more", "most", "other", "some",
        // Russian
        "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
        "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "только", "ее",
        "мне", "было", "вот", "от", "меня", "еще", "нет", "о", "из", "ему", "теперь", "когда",
        "уже", "для", "мы", "чтобы", "есть", "надо", "при", "или", "ни", "быть", "был", "него",
        "до", "вас", "них", "это", "эта", "этот", "эти", "их", "чем", "без", "будет",
        "если", "тоже", "себя", "ничего", "может", "они", "тут", "где", "который", "которая",
    ]
    .into_iter()
    .collect()
});

/// Discourse connectives that reward cross-sentence cohesion.
static DEFAULT_CONNECTIVES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        // English
        "however", "therefore", "moreover", "furthermore", "thus", "hence", "consequently",
        "additionally", "also", "besides", "meanwhile", "nevertheless", "nonetheless", "instead",
        "finally", "similarly",
        // Russian
        "однако", "поэтому", "кроме", "также", "таким", "следовательно", "затем", "наконец",
        "впрочем", "тем",
    ]
});

/// The default English + Russian stopword set, shared with the segmenters.
pub fn default_stopwords() -> &'static HashSet<&'static str> {
    &DEFAULT_STOPWORDS
}

/// Weights for combining the four sub-scores into the overall score.
///
/// A tunable policy, not a contract; the defaults favor completeness and
/// coherence.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScorerWeights {
    pub completeness: f64,
    pub coherence: f64,
    pub density: f64,
    pub boundary: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            completeness: 0.3,
            coherence: 0.3,
            density: 0.2,
            boundary: 0.2,
        }
    }
}

/// Token-classification rules and weights for the scorer.
#[derive(Clone, Debug)]
pub struct ScorerConfig {
    pub stopwords: HashSet<String>,
    pub connectives: Vec<String>,
    pub weights: ScorerWeights,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
            connectives: DEFAULT_CONNECTIVES.iter().map(|s| s.to_string()).collect(),
            weights: ScorerWeights::default(),
        }
    }
}

/// The four sub-scores plus the weighted overall score, all in `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub completeness: f64,
    pub coherence: f64,
    pub density: f64,
    pub boundary: f64,
    pub overall: f64,
}

impl QualityReport {
    /// Name of the weakest sub-score, for operator-facing suggestions.
    pub fn weakest_metric(&self) -> &'static str {
        let metrics = [
            ("completeness", self.completeness),
            ("coherence", self.coherence),
            ("density", self.density),
            ("boundary", self.boundary),
        ];
        metrics
            .into_iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
            .unwrap_or("completeness")
    }
}

/// Deterministic heuristic scorer for a single chunk of text.
#[derive(Clone, Debug, Default)]
pub struct QualityScorer {
    config: ScorerConfig,
}

impl QualityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    /// Score one chunk. Pure and deterministic for a fixed configuration.
    pub fn score(&self, text: &str) -> QualityReport {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return QualityReport {
                completeness: 0.0,
                coherence: 0.0,
                density: 0.0,
                boundary: 0.0,
                overall: 0.0,
            };
        }

        let sentences = split_sentences(trimmed);
        let completeness = self.completeness(trimmed, &sentences);
        let coherence = self.coherence(&sentences);
        let density = self.density(trimmed);
        let boundary = self.boundary(trimmed);

        let w = &self.config.weights;
        let overall = (completeness * w.completeness
            + coherence * w.coherence
            + density * w.density
            + boundary * w.boundary)
            .clamp(0.0, 1.0);

        QualityReport {
            completeness,
            coherence,
            density,
            boundary,
            overall,
        }
    }

    /// Terminal punctuation, capitalized start, and multiple non-trivial
    /// sentences.
    fn completeness(&self, text: &str, sentences: &[String]) -> f64 {
        let mut score: f64 = 0.0;

        if text.chars().next_back().map(is_terminal).unwrap_or(false) {
            score += 0.4;
        }
        if first_alphabetic(text).map(char::is_uppercase).unwrap_or(false) {
            score += 0.3;
        }
        let substantial = sentences.iter().filter(|s| char_len(s) > 10).count();
        if substantial >= 2 {
            score += 0.3;
        } else if substantial == 1 {
            score += 0.15;
        }

        score.min(1.0)
    }

    /// Lexical overlap between adjacent sentences plus a connective bonus.
    /// Single-sentence chunks are neutral.
    fn coherence(&self, sentences: &[String]) -> f64 {
        if sentences.len() < 2 {
            return 0.5;
        }

        let token_sets: Vec<(Vec<String>, HashSet<String>)> = sentences
            .iter()
            .map(|sentence| {
                let tokens = lower_words(sentence);
                let content: HashSet<String> = tokens
                    .iter()
                    .filter(|t| !self.is_stopword(t))
                    .cloned()
                    .collect();
                (tokens, content)
            })
            .collect();

        let mut total = 0.0;
        let mut pairs = 0usize;
        for pair in token_sets.windows(2) {
            let (ref tokens_a, ref content_a) = pair[0];
            let (ref tokens_b, ref content_b) = pair[1];
            let larger = tokens_a.len().max(tokens_b.len());
            let shared = content_a.intersection(content_b).count();
            let mut pair_score = if larger == 0 {
                0.0
            } else {
                shared as f64 / larger as f64
            };
            if tokens_b
                .first()
                .map(|w| self.is_connective(w))
                .unwrap_or(false)
            {
                pair_score += 0.15;
            }
            total += pair_score.min(1.0);
            pairs += 1;
        }

        total / pairs as f64
    }

    /// Ratio of non-stopword tokens, with small bonuses for digits and
    /// proper-noun-like tokens.
    fn density(&self, text: &str) -> f64 {
        let tokens = words(text);
        if tokens.is_empty() {
            return 0.0;
        }

        let content = tokens
            .iter()
            .filter(|t| !self.is_stopword(&t.to_lowercase()))
            .count();
        let mut score = content as f64 / tokens.len() as f64;

        if tokens.iter().any(|t| t.chars().any(|c| c.is_ascii_digit())) {
            score += 0.05;
        }
        // Capitalized tokens past the first word hint at named entities.
        if tokens
            .iter()
            .skip(1)
            .any(|t| t.chars().next().map(char::is_uppercase).unwrap_or(false))
        {
            score += 0.05;
        }

        score.min(1.0)
    }

    /// Clean start/end and balanced brackets and quotes.
    fn boundary(&self, text: &str) -> f64 {
        let mut score: f64 = 1.0;

        if first_alphabetic(text).map(char::is_lowercase).unwrap_or(false) {
            score -= 0.2;
        }
        if text
            .chars()
            .next_back()
            .map(|c| c.is_alphanumeric())
            .unwrap_or(false)
        {
            score -= 0.2;
        }

        for (open, close) in [('(', ')'), ('[', ']'), ('{', '}'), ('«', '»')] {
            let opens = text.chars().filter(|&c| c == open).count();
            let closes = text.chars().filter(|&c| c == close).count();
            if opens != closes {
                score -= 0.15;
            }
        }
        if text.chars().filter(|&c| c == '"').count() % 2 != 0 {
            score -= 0.15;
        }

        score.max(0.0)
    }

    fn is_stopword(&self, token: &str) -> bool {
        self.config.stopwords.contains(token)
    }

    fn is_connective(&self, token: &str) -> bool {
        self.config.connectives.iter().any(|c| c == token)
    }
}

fn first_alphabetic(text: &str) -> Option<char> {
    text.chars().find(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> QualityScorer {
        QualityScorer::default()
    }

    #[test]
    fn score_is_deterministic() {
        let text = "Машинное обучение меняет индустрию. Однако модели требуют данных.";
        let first = scorer().score(text);
        let second = scorer().score(text);
        assert_eq!(first, second);
    }

    #[test]
    fn terminal_punctuation_beats_fragment() {
        // Scenario: lowercase unterminated text vs. a proper sentence.
        let fragment = scorer().score("машинное обучение это интересно");
        let sentence = scorer().score("Машинное обучение — это интересно.");
        assert!(fragment.completeness < sentence.completeness);
    }

    #[test]
    fn single_sentence_coherence_is_neutral() {
        let report = scorer().score("A single sentence stands alone here.");
        assert_eq!(report.coherence, 0.5);
    }

    #[test]
    fn shared_vocabulary_raises_coherence() {
        let cohesive = scorer().score(
            "The compiler optimizes memory layout. However, the compiler cannot optimize layout across crates.",
        );
        let disjoint = scorer().score(
            "The compiler optimizes memory layout. Elephants migrate across grassy plains yearly.",
        );
        assert!(cohesive.coherence > disjoint.coherence);
    }

    #[test]
    fn stopword_heavy_text_has_low_density() {
        let dense = scorer().score("Rust compiles 48 binary crates quickly.");
        let sparse = scorer().score("it is what it is and so it was to be");
        assert!(dense.density > sparse.density);
    }

    #[test]
    fn unbalanced_brackets_hurt_boundary() {
        let balanced = scorer().score("Everything (including brackets) is fine.");
        let unbalanced = scorer().score("Everything (including brackets is fine.");
        assert!(balanced.boundary > unbalanced.boundary);
    }

    #[test]
    fn empty_text_scores_zero() {
        let report = scorer().score("   ");
        assert_eq!(report.overall, 0.0);
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        for text in [
            "Short.",
            "A long chunk. With several sentences. And 42 numbers. Plus Proper Nouns.",
            "(((",
            "слово",
        ] {
            let report = scorer().score(text);
            for value in [
                report.completeness,
                report.coherence,
                report.density,
                report.boundary,
                report.overall,
            ] {
                assert!((0.0..=1.0).contains(&value), "{text}: {value}");
            }
        }
    }

    #[test]
    fn weakest_metric_names_the_minimum() {
        let report = QualityReport {
            completeness: 0.9,
            coherence: 0.2,
            density: 0.8,
            boundary: 0.7,
            overall: 0.6,
        };
        assert_eq!(report.weakest_metric(), "coherence");
    }
}
