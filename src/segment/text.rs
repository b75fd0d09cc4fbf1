//! Sentence and token helpers shared by the segmenters, the quality scorer,
//! and the refiner. All measurements are in characters, never bytes, so
//! multi-byte scripts (the corpus is partly Cyrillic) behave the same as
//! ASCII.

use unicode_segmentation::UnicodeSegmentation;

/// Sentence-terminal punctuation.
pub fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…')
}

/// Number of characters in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split `text` into sentences, keeping each sentence's terminator.
///
/// A sentence ends at a run of terminal punctuation (optionally followed by a
/// closing quote or bracket) that is itself followed by whitespace or the end
/// of input. Interior abbreviations are not special-cased; the callers'
/// heuristics tolerate occasional over-splitting.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        if is_terminal(chars[i]) {
            // Consume the full terminator run plus trailing closers.
            let mut end = i + 1;
            while end < chars.len() && (is_terminal(chars[end]) || is_closer(chars[end])) {
                end += 1;
            }
            let at_break = end >= chars.len() || chars[end].is_whitespace();
            if at_break {
                push_trimmed(&mut sentences, &chars[start..end]);
                // Skip the whitespace between sentences.
                while end < chars.len() && chars[end].is_whitespace() {
                    end += 1;
                }
                start = end;
                i = end;
                continue;
            }
            i = end;
            continue;
        }
        i += 1;
    }

    if start < chars.len() {
        push_trimmed(&mut sentences, &chars[start..]);
    }

    sentences
}

fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '»' | '”' | '’')
}

fn push_trimmed(out: &mut Vec<String>, chars: &[char]) {
    let sentence: String = chars.iter().collect();
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Unicode word tokens of `text`, original casing preserved.
pub fn words(text: &str) -> Vec<&str> {
    text.unicode_words().collect()
}

/// Lowercased word tokens of `text`.
pub fn lower_words(text: &str) -> Vec<String> {
    text.unicode_words().map(|w| w.to_lowercase()).collect()
}

/// Search outward from `pos` for the nearest sentence terminator within
/// `radius` characters, returning the index one past the terminator. Results
/// at or before `floor` are rejected so windows always make progress.
pub fn snap_to_terminal(
    chars: &[char],
    pos: usize,
    radius: usize,
    floor: usize,
) -> Option<usize> {
    let len = chars.len();
    for distance in 0..=radius {
        let forward = pos + distance;
        if forward < len && is_terminal(chars[forward]) && forward + 1 > floor {
            return Some(forward + 1);
        }
        if distance > 0 && distance <= pos {
            let backward = pos - distance;
            if backward < len && is_terminal(chars[backward]) && backward + 1 > floor {
                return Some(backward + 1);
            }
        }
    }
    None
}
