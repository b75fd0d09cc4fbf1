//! Key-phrase guided grouping of consecutive sentences.

use std::collections::{HashMap, HashSet};

use crate::config::ChunkingConfig;
use crate::quality::default_stopwords;

use super::text::{char_len, lower_words, split_sentences};
use super::{enforce_min_size, Segmenter};

/// Tokens shorter than this never become key phrases.
const MIN_PHRASE_LEN: usize = 4;

/// Extracts the most frequent non-stopword tokens of the whole text as key
/// phrases, then greedily groups consecutive sentences that share at least
/// one key phrase with the running group. Groups are concatenated into
/// chunks up to the target size.
#[derive(Clone, Debug)]
pub struct SemanticGroupSegmenter {
    config: ChunkingConfig,
}

impl SemanticGroupSegmenter {
    pub fn new(config: ChunkingConfig) -> Self {
        Self { config }
    }

    fn key_phrases(&self, text: &str) -> HashSet<String> {
        let stopwords = default_stopwords();
        let mut frequency: HashMap<String, usize> = HashMap::new();
        for token in lower_words(text) {
            if token.chars().count() < MIN_PHRASE_LEN || stopwords.contains(token.as_str()) {
                continue;
            }
            *frequency.entry(token).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, usize)> = frequency.into_iter().collect();
        // Deterministic order: frequency desc, then token asc.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
            .into_iter()
            .take(self.config.key_phrase_count)
            .map(|(token, _)| token)
            .collect()
    }

    /// Group consecutive sentences while they keep sharing a key phrase with
    /// the running group and the group stays under the target size.
    fn group_sentences(&self, sentences: Vec<String>, key_phrases: &HashSet<String>) -> Vec<String> {
        let mut groups: Vec<String> = Vec::new();
        let mut current: Vec<String> = Vec::new();
        let mut current_phrases: HashSet<String> = HashSet::new();
        let mut current_len = 0usize;

        for sentence in sentences {
            let phrases: HashSet<String> = lower_words(&sentence)
                .into_iter()
                .filter(|t| key_phrases.contains(t))
                .collect();

            let connected =
                current.is_empty() || phrases.iter().any(|p| current_phrases.contains(p));
            let fits = current_len + char_len(&sentence) + 1 <= self.config.target_size;
            if !current.is_empty() && (!connected || !fits) {
                groups.push(current.join(" "));
                current.clear();
                current_phrases.clear();
                current_len = 0;
            }
            current_phrases.extend(phrases);
            current_len += char_len(&sentence) + 1;
            current.push(sentence);
        }
        if !current.is_empty() {
            groups.push(current.join(" "));
        }
        groups
    }
}

impl Segmenter for SemanticGroupSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sentences = split_sentences(text);
        if sentences.len() < 2 {
            let single = text.trim().to_string();
            return enforce_min_size(vec![single], self.config.min_chunk_size, text);
        }

        let key_phrases = self.key_phrases(text);
        let groups = self.group_sentences(sentences, &key_phrases);

        // Concatenate groups into chunks bounded by the target size.
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        for group in groups {
            if !current.is_empty()
                && char_len(&current) + char_len(&group) + 1 > self.config.target_size
            {
                chunks.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&group);
        }
        if !current.is_empty() {
            chunks.push(current);
        }

        enforce_min_size(chunks, self.config.min_chunk_size, text)
    }
}
