use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{JurisError, Result};
use crate::tokenizer::tokenize;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]\s+").expect("sentence regex"));
const CHUNK_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkMode {
    /// Fixed windows of `size` characters advancing by `size - overlap`.
    #[default]
    Window,
    /// Whole sentences packed up to `size` characters; `overlap` is ignored.
    Sentences,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    pub mode: ChunkMode,
    pub size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            mode: ChunkMode::Window,
            size: 1500,
            overlap: 500,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(JurisError::config("chunk size must be positive"));
        }
        if self.mode == ChunkMode::Window && self.overlap >= self.size {
            return Err(JurisError::config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

/// A contiguous span of a source document; the unit of indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    pub ordinal: usize,
    pub text: String,
}

impl Chunk {
    pub fn new(source: impl Into<String>, ordinal: usize, text: impl Into<String>) -> Self {
        let source = source.into();
        let text = text.into();
        let id = stable_chunk_id(&source, ordinal, &text);
        Self {
            id,
            source,
            ordinal,
            text,
        }
    }

    pub fn tokens(&self) -> Vec<String> {
        tokenize(&self.text)
    }
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        match self.config.mode {
            ChunkMode::Window => windows(text, self.config.size, self.config.overlap),
            ChunkMode::Sentences => pack_sentences(text, self.config.size),
        }
    }

    /// Splits `text` and tags every piece with `source` and its ordinal.
    pub fn chunk_document(&self, text: &str, source: &str) -> Vec<Chunk> {
        self.split(text)
            .into_iter()
            .enumerate()
            .map(|(ordinal, piece)| Chunk::new(source, ordinal, piece))
            .collect()
    }
}

/// Character windows of `size` with `overlap` characters shared between
/// neighbours. A window starts every `size - overlap` characters until the
/// start offset reaches the end of the text, so trailing windows may be short.
pub fn chunk(text: &str, size: usize, overlap: usize) -> Result<Vec<String>> {
    ChunkConfig {
        mode: ChunkMode::Window,
        size,
        overlap,
    }
    .validate()?;
    Ok(windows(text, size, overlap))
}

fn windows(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = bounds.len() - 1;
    let step = size - overlap;
    let mut pieces = Vec::new();
    let mut start = 0usize;
    while start < total {
        let end = (start + size).min(total);
        pieces.push(text[bounds[start]..bounds[end]].to_string());
        start += step;
    }
    pieces
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut last = 0usize;
    for m in SENTENCE_END.find_iter(text) {
        // the terminator is a single ASCII byte
        let cut = m.start() + 1;
        sentences.push(&text[last..cut]);
        last = m.end();
    }
    if last < text.len() {
        sentences.push(&text[last..]);
    }
    sentences
}

fn pack_sentences(text: &str, size: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;
    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        if current_len + len > size && !current.is_empty() {
            chunks.push(current.join(" "));
            current.clear();
            current_len = 0;
        }
        current.push(sentence);
        current_len += len;
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

fn stable_chunk_id(source: &str, ordinal: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(CHUNK_VERSION.to_be_bytes());
    hasher.update(ordinal.to_be_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
