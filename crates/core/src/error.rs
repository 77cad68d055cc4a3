use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JurisError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("cannot build an index over an empty corpus")]
    EmptyCorpus,
    #[error("unsupported input format: {0:?}")]
    UnsupportedInput(PathBuf),
    #[error("pdf extraction failed: {0}")]
    Pdf(String),
    #[error("docx extraction failed: {0}")]
    Docx(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, JurisError>;

impl JurisError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }
}
