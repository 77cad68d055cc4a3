use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bm25::{Bm25Index, Bm25Params};
use crate::chunk::Chunk;
use crate::error::{JurisError, Result};
use crate::tokenizer::tokenize;

pub const DEFAULT_DEDUP_PREFIX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub top_n: usize,
    pub min_score: f32,
    /// How many times each auxiliary keyword is appended to the query.
    pub keyword_weight: u32,
    /// Results whose first `dedup_prefix_chars` characters hash the same are
    /// treated as duplicates. `0` compares the whole text.
    pub dedup_prefix_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_n: 5,
            min_score: 0.1,
            keyword_weight: 1,
            dedup_prefix_chars: DEFAULT_DEDUP_PREFIX_CHARS,
        }
    }
}

impl SearchOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.min_score.is_finite() {
            return Err(JurisError::config("min_score must be finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub chunk: Chunk,
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: usize,
}

/// Ranks the corpus of `index` against `query`.
///
/// Fails only on invalid `options`. Degenerate input never fails: an empty
/// query, a query that is all punctuation or a threshold nothing reaches all
/// yield an empty vector.
pub fn search(index: &Bm25Index, query: &str, options: &SearchOptions) -> Result<Vec<ScoredResult>> {
    search_with_keywords(index, query, &[], options)
}

/// Like [`search`], with extra keywords appended to the query tokens.
pub fn search_with_keywords(
    index: &Bm25Index,
    query: &str,
    keywords: &[String],
    options: &SearchOptions,
) -> Result<Vec<ScoredResult>> {
    options.validate()?;
    let tokens = query_tokens(query, keywords, options.keyword_weight);
    if tokens.is_empty() || index.is_empty() || options.top_n == 0 {
        return Ok(Vec::new());
    }
    let scores = index.score(&tokens);
    let mut candidates: Vec<(usize, f32)> = scores
        .into_iter()
        .enumerate()
        .filter(|(_, score)| *score >= options.min_score)
        .collect();
    // stable: ties keep corpus order
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut seen = HashSet::new();
    let mut results = Vec::with_capacity(options.top_n.min(candidates.len()));
    for (idx, score) in candidates {
        let chunk = &index.chunks()[idx];
        if !seen.insert(content_key(&chunk.text, options.dedup_prefix_chars)) {
            continue;
        }
        results.push(ScoredResult {
            chunk: chunk.clone(),
            score,
            rank: results.len() + 1,
        });
        if results.len() == options.top_n {
            break;
        }
    }
    debug!(
        tokens = tokens.len(),
        hits = results.len(),
        "retrieval finished"
    );
    Ok(results)
}

fn query_tokens(query: &str, keywords: &[String], weight: u32) -> Vec<String> {
    let mut tokens = tokenize(query);
    for keyword in keywords {
        let keyword_tokens = tokenize(keyword);
        for _ in 0..weight {
            tokens.extend(keyword_tokens.iter().cloned());
        }
    }
    tokens
}

fn content_key(text: &str, prefix_chars: usize) -> blake3::Hash {
    if prefix_chars == 0 {
        return blake3::hash(text.as_bytes());
    }
    let end = text
        .char_indices()
        .nth(prefix_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    blake3::hash(text[..end].as_bytes())
}

/// Shared, read-mostly slot holding the current index.
///
/// Readers take a snapshot `Arc` and score without holding the lock; a
/// rebuild constructs the new index first and only then swaps the pointer,
/// so no reader ever observes a half-built index. An unbuilt handle answers
/// every search with an empty result set.
#[derive(Debug, Default, Clone)]
pub struct IndexHandle {
    current: Arc<RwLock<Option<Arc<Bm25Index>>>>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_index(index: Bm25Index) -> Self {
        let handle = Self::new();
        handle.replace(index);
        handle
    }

    pub fn is_built(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn snapshot(&self) -> Option<Arc<Bm25Index>> {
        self.current.read().clone()
    }

    /// Builds a fresh index and swaps it in. On failure the previous index
    /// stays in place and the error is returned.
    pub fn rebuild(&self, corpus: Vec<Chunk>, params: Bm25Params) -> Result<()> {
        let index = Bm25Index::build(corpus, params)?;
        self.replace(index);
        Ok(())
    }

    pub fn replace(&self, index: Bm25Index) -> Option<Arc<Bm25Index>> {
        let next = Arc::new(index);
        self.current.write().replace(next)
    }

    pub fn clear(&self) -> Option<Arc<Bm25Index>> {
        self.current.write().take()
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredResult>> {
        self.search_with_keywords(query, &[], options)
    }

    pub fn search_with_keywords(
        &self,
        query: &str,
        keywords: &[String],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredResult>> {
        match self.snapshot() {
            Some(index) => search_with_keywords(&index, query, keywords, options),
            None => {
                options.validate()?;
                Ok(Vec::new())
            }
        }
    }
}
