use std::collections::HashSet;

use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::bm25::Bm25Index;
use crate::tokenizer::words;

const RUSSIAN_VOWELS: &[char] = &['а', 'е', 'ё', 'и', 'о', 'у', 'ы', 'э', 'ю', 'я'];
const DEFAULT_STOP_WORDS: &[&str] = &[
    "на", "под", "в", "среди", "перед", "затем", "после", "до", "сразу",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub limit: usize,
    pub min_len: usize,
    pub strip_vowel_endings: bool,
    pub stop_words: Vec<String>,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self {
            limit: 15,
            min_len: 4,
            strip_vowel_endings: true,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

/// Picks the words of `text` that weigh most against the corpus of `index`.
///
/// Candidates are Cyrillic words of at least `min_len` characters outside the
/// stop list; each is weighted by the sum of its BM25 scores over the corpus.
pub fn extract_keywords(text: &str, index: &Bm25Index, config: &KeywordConfig) -> Vec<String> {
    let stop: HashSet<&str> = config.stop_words.iter().map(String::as_str).collect();
    let candidates: Vec<String> = words(text)
        .into_iter()
        .filter(|word| word.chars().count() >= config.min_len)
        .filter(|word| !stop.contains(word.as_str()))
        .filter(|word| has_cyrillic(word))
        .unique()
        .collect();
    if candidates.is_empty() || config.limit == 0 {
        return Vec::new();
    }

    let mut weights: FxHashMap<&str, f32> = FxHashMap::default();
    for word in &candidates {
        let weight: f32 = index.score(std::slice::from_ref(word)).iter().sum();
        weights.insert(word.as_str(), weight);
    }
    let mut ranked: Vec<&String> = candidates.iter().collect();
    ranked.sort_by(|a, b| weights[b.as_str()].total_cmp(&weights[a.as_str()]));

    let picked = ranked.into_iter().take(config.limit);
    if !config.strip_vowel_endings {
        return picked.cloned().collect();
    }
    picked
        .map(|word| strip_vowel_endings(word))
        .filter(|word| !word.is_empty())
        .unique()
        .collect()
}

/// Trims trailing Russian vowels, a crude stand-in for stemming.
pub fn strip_vowel_endings(word: &str) -> String {
    word.trim_end_matches(RUSSIAN_VOWELS).to_string()
}

fn has_cyrillic(word: &str) -> bool {
    word.chars().any(|c| matches!(c, 'а'..='я' | 'ё'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bm25::Bm25Params;
    use crate::chunk::Chunk;

    fn index(texts: &[&str]) -> Bm25Index {
        let corpus = texts
            .iter()
            .enumerate()
            .map(|(idx, text)| Chunk::new("kb", idx, *text))
            .collect();
        Bm25Index::build(corpus, Bm25Params::default()).unwrap()
    }

    #[test]
    fn strips_trailing_vowels() {
        assert_eq!(strip_vowel_endings("энергия"), "энерги");
        assert_eq!(strip_vowel_endings("поставка"), "поставк");
        assert_eq!(strip_vowel_endings("суд"), "суд");
        assert_eq!(strip_vowel_endings("ая"), "");
    }

    #[test]
    fn filters_short_latin_and_stop_words() {
        let index = index(&["договор аренды", "иск"]);
        let config = KeywordConfig {
            strip_vowel_endings: false,
            stop_words: vec!["сразу".to_string()],
            ..KeywordConfig::default()
        };
        let keywords = extract_keywords("Договор contract сразу иск 2024 года", &index, &config);
        assert_eq!(keywords, vec!["договор", "года"]);
    }

    #[test]
    fn corpus_terms_rank_first() {
        let index = index(&["неустойка по договору", "неустойка", "залог"]);
        let config = KeywordConfig {
            strip_vowel_endings: false,
            ..KeywordConfig::default()
        };
        let keywords = extract_keywords("Стороны обсудили залог и неустойку, залог", &index, &config);
        assert_eq!(keywords[0], "залог");
        assert_eq!(keywords.len(), 4);
    }

    #[test]
    fn limit_caps_the_output() {
        let index = index(&["текст"]);
        let config = KeywordConfig {
            limit: 2,
            strip_vowel_endings: false,
            ..KeywordConfig::default()
        };
        let keywords = extract_keywords("первый второй третий", &index, &config);
        assert_eq!(keywords, vec!["первый", "второй"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let index = index(&["текст"]);
        assert!(extract_keywords("", &index, &KeywordConfig::default()).is_empty());
        assert!(extract_keywords("...", &index, &KeywordConfig::default()).is_empty());
    }
}
