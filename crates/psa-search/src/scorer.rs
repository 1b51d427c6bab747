//! Relevance Scorer: heuristic keyword scoring over weighted text fields.

use psa_adapters::NormalizedRecord;
use regex::Regex;

const MIN_WORD_CHARS: usize = 2;
const COMPLETENESS_BONUS: f64 = 10.0;
const PHRASE_BONUS: f64 = 5.0;
const POSITION_WINDOW: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldWeights {
    pub name: f64,
    pub brand: f64,
    pub store: f64,
    pub description: f64,
    pub category: f64,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self {
            name: 10.0,
            brand: 7.0,
            store: 5.0,
            description: 3.0,
            category: 5.0,
        }
    }
}

#[derive(Debug)]
struct QueryWord {
    text: String,
    whole_word: Option<Regex>,
}

/// A search term compiled once per request and applied to every candidate.
#[derive(Debug)]
pub struct QueryMatcher {
    words: Vec<QueryWord>,
    phrase: String,
    weights: FieldWeights,
}

impl QueryMatcher {
    pub fn new(term: &str) -> Self {
        Self::with_weights(term, FieldWeights::default())
    }

    pub fn with_weights(term: &str, weights: FieldWeights) -> Self {
        let words = term
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|w| w.chars().count() >= MIN_WORD_CHARS)
            .map(|text| QueryWord {
                whole_word: Regex::new(&format!(r"\b{}\b", regex::escape(&text))).ok(),
                text,
            })
            .collect();
        Self {
            words,
            phrase: term.trim().to_lowercase(),
            weights,
        }
    }

    pub fn score(&self, record: &NormalizedRecord) -> f64 {
        if self.phrase.is_empty() {
            return 0.0;
        }
        let fields = [
            (record.product.name.to_lowercase(), self.weights.name),
            (record.brand.to_lowercase(), self.weights.brand),
            (record.product.store.to_lowercase(), self.weights.store),
            (record.description.to_lowercase(), self.weights.description),
            (record.category.to_lowercase(), self.weights.category),
        ];

        let mut score = 0.0;
        let mut matched_words = 0usize;
        for word in &self.words {
            let mut matched = false;
            for (text, weight) in &fields {
                let Some(byte_idx) = text.find(&word.text) else {
                    continue;
                };
                matched = true;
                let whole = word.whole_word.as_ref().is_some_and(|re| re.is_match(text));
                score += if whole { 2.0 * weight } else { *weight };
                let char_idx = text[..byte_idx].chars().count() as f64;
                let position_bonus = (1.0 - char_idx / POSITION_WINDOW).max(0.0);
                score += position_bonus * weight * 0.5;
            }
            if matched {
                matched_words += 1;
            }
        }

        if !self.words.is_empty() {
            score += COMPLETENESS_BONUS * matched_words as f64 / self.words.len() as f64;
        }

        let haystack = fields.iter().map(|(text, _)| text.as_str()).collect::<Vec<_>>().join(" ");
        if haystack.contains(&self.phrase) {
            score += PHRASE_BONUS;
        }
        score.max(0.0)
    }
}

/// Scores one record against a search term.
pub fn score(record: &NormalizedRecord, term: &str) -> f64 {
    QueryMatcher::new(term).score(record)
}
