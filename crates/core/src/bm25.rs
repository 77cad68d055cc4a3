//! Okapi BM25 over an in-memory corpus of chunks.
//!
//! Statistics (document frequency, document length, IDF) are derived once at
//! build time and never mutated afterwards; a different corpus or different
//! parameters means a new index.

use std::io::{Read, Write};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunk::Chunk;
use crate::error::{JurisError, Result};

/// BM25 tuning knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length-normalisation strength, within `[0, 1]`.
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

impl Bm25Params {
    pub fn new(k1: f32, b: f32) -> Result<Self> {
        let params = Self { k1, b };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.k1.is_finite() || self.k1 <= 0.0 {
            return Err(JurisError::config(format!(
                "k1 must be a positive number, got {}",
                self.k1
            )));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(JurisError::config(format!(
                "b must lie within [0, 1], got {}",
                self.b
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Index {
    params: Bm25Params,
    chunks: Vec<Chunk>,
    doc_lens: Vec<u32>,
    term_freqs: Vec<FxHashMap<String, u32>>,
    doc_freq: FxHashMap<String, u32>,
    idf: FxHashMap<String, f32>,
    avgdl: f32,
}

impl Bm25Index {
    pub fn build(corpus: Vec<Chunk>, params: Bm25Params) -> Result<Self> {
        params.validate()?;
        if corpus.is_empty() {
            return Err(JurisError::EmptyCorpus);
        }
        let mut doc_lens = Vec::with_capacity(corpus.len());
        let mut term_freqs = Vec::with_capacity(corpus.len());
        let mut doc_freq: FxHashMap<String, u32> = FxHashMap::default();
        let mut total_len = 0u64;
        for chunk in &corpus {
            let tokens = chunk.tokens();
            total_len += tokens.len() as u64;
            doc_lens.push(tokens.len() as u32);
            let mut tf: FxHashMap<String, u32> = FxHashMap::default();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }
        let n = corpus.len() as f32;
        let idf = doc_freq
            .iter()
            .map(|(term, df)| {
                let df = *df as f32;
                (term.clone(), ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect();
        let avgdl = total_len as f32 / n;
        info!(
            chunks = corpus.len(),
            terms = doc_freq.len(),
            avgdl,
            "built bm25 index"
        );
        Ok(Self {
            params,
            chunks: corpus,
            doc_lens,
            term_freqs,
            doc_freq,
            idf,
            avgdl,
        })
    }

    /// Same corpus, different parameters.
    pub fn rebuild_with(&self, params: Bm25Params) -> Result<Self> {
        Self::build(self.chunks.clone(), params)
    }

    /// One score per chunk, in corpus order. Repeated query tokens count
    /// once per occurrence.
    pub fn score(&self, query_tokens: &[String]) -> Vec<f32> {
        let mut scores = vec![0.0f32; self.chunks.len()];
        if query_tokens.is_empty() {
            return scores;
        }
        let Bm25Params { k1, b } = self.params;
        for token in query_tokens {
            let Some(idf) = self.idf.get(token) else {
                continue;
            };
            for (idx, tf_map) in self.term_freqs.iter().enumerate() {
                let Some(tf) = tf_map.get(token) else {
                    continue;
                };
                let tf = *tf as f32;
                let length_ratio = if self.avgdl > 0.0 {
                    self.doc_lens[idx] as f32 / self.avgdl
                } else {
                    0.0
                };
                let denominator = tf + k1 * (1.0 - b + b * length_ratio);
                scores[idx] += idf * (tf * (k1 + 1.0)) / denominator;
            }
        }
        scores
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn avgdl(&self) -> f32 {
        self.avgdl
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.doc_freq.get(term).copied().unwrap_or(0)
    }

    pub fn idf(&self, term: &str) -> Option<f32> {
        self.idf.get(term).copied()
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let index: Self = serde_json::from_reader(reader)?;
        index.params.validate()?;
        index.check_shape()?;
        Ok(index)
    }

    /// Per-chunk statistics must line up with the chunks they describe.
    fn check_shape(&self) -> Result<()> {
        if self.chunks.is_empty() {
            return Err(JurisError::EmptyCorpus);
        }
        let n = self.chunks.len();
        if self.doc_lens.len() != n || self.term_freqs.len() != n {
            return Err(JurisError::config(format!(
                "snapshot holds {} chunks but {} lengths and {} term tables",
                n,
                self.doc_lens.len(),
                self.term_freqs.len()
            )));
        }
        if !self.avgdl.is_finite() || self.avgdl < 0.0 {
            return Err(JurisError::config(format!(
                "snapshot average length {} is invalid",
                self.avgdl
            )));
        }
        Ok(())
    }
}
