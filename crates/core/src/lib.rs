mod bm25;
mod chunk;
mod error;
mod ingest;
mod keywords;
mod retrieval;
mod tokenizer;

pub use bm25::{Bm25Index, Bm25Params};
pub use chunk::{chunk, Chunk, ChunkConfig, ChunkMode, Chunker};
pub use error::{JurisError, Result};
pub use ingest::{corpus_from_dir, corpus_from_knowledge_base, is_supported, load_text};
pub use keywords::{extract_keywords, strip_vowel_endings, KeywordConfig};
pub use retrieval::{
    search, search_with_keywords, IndexHandle, ScoredResult, SearchOptions,
    DEFAULT_DEDUP_PREFIX_CHARS,
};
pub use tokenizer::{tokenize, words};
