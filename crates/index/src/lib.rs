use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const UNKNOWN_NAME: &str = "Неизвестно";
pub const UNKNOWN_DATE: &str = "Не указана";
pub const UNKNOWN_TYPE: &str = "Неизвестен";

/// Analysed documents, the searchable knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub doc_id: String,
    #[serde(default = "unknown_name")]
    pub doc_name: String,
    #[serde(default = "unknown_date")]
    pub doc_date: String,
    #[serde(default = "unknown_type")]
    pub doc_type: String,
    #[serde(default)]
    pub doc_summary: String,
    #[serde(default)]
    pub doc_keywords: Vec<String>,
    #[serde(default)]
    pub chunks: Vec<AnalyzedChunk>,
}

impl DocumentRecord {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            doc_name: unknown_name(),
            doc_date: unknown_date(),
            doc_type: unknown_type(),
            doc_summary: String::new(),
            doc_keywords: Vec::new(),
            chunks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AnalyzedChunk {
    #[serde(default)]
    pub chunk_text: String,
    #[serde(default)]
    pub chunk_summary: String,
    #[serde(default)]
    pub qa_pairs: Vec<QaPair>,
    #[serde(default)]
    pub chunk_keywords: Vec<String>,
}

impl AnalyzedChunk {
    /// Text fed to the lexical index: summary, keywords, then the body.
    pub fn index_text(&self) -> String {
        [
            self.chunk_summary.as_str(),
            &self.chunk_keywords.join(" "),
            self.chunk_text.as_str(),
        ]
        .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

impl KnowledgeBase {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open knowledge base {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("invalid knowledge base {}", path.display()))
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn push(&mut self, document: DocumentRecord) {
        self.documents.push(document);
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.iter().map(|doc| doc.chunks.len()).sum()
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn unknown_name() -> String {
    UNKNOWN_NAME.to_string()
}

fn unknown_date() -> String {
    UNKNOWN_DATE.to_string()
}

fn unknown_type() -> String {
    UNKNOWN_TYPE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KnowledgeBase {
        let mut doc = DocumentRecord::new("doc_1");
        doc.doc_name = "Гражданский кодекс".to_string();
        doc.chunks.push(AnalyzedChunk {
            chunk_text: "Статья 432. Договор считается заключенным".to_string(),
            chunk_summary: "Условия заключения договора".to_string(),
            qa_pairs: vec![QaPair {
                question: "Когда договор заключен?".to_string(),
                answer: "При согласии по существенным условиям".to_string(),
            }],
            chunk_keywords: vec!["договор".to_string(), "оферта".to_string()],
        });
        KnowledgeBase {
            documents: vec![doc],
        }
    }

    #[test]
    fn save_and_load_keep_cyrillic_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");
        let kb = sample();
        kb.save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Гражданский кодекс"));
        let loaded = KnowledgeBase::load(&path).unwrap();
        assert_eq!(loaded, kb);
        assert_eq!(loaded.chunk_count(), 1);
    }

    #[test]
    fn missing_fields_fall_back_to_placeholders() {
        let kb: KnowledgeBase =
            serde_json::from_str(r#"{"documents":[{"doc_id":"x","chunks":[{}]}]}"#).unwrap();
        let doc = &kb.documents[0];
        assert_eq!(doc.doc_name, UNKNOWN_NAME);
        assert_eq!(doc.doc_date, UNKNOWN_DATE);
        assert_eq!(doc.chunks[0], AnalyzedChunk::default());
    }

    #[test]
    fn index_text_orders_summary_keywords_body() {
        let kb = sample();
        assert_eq!(
            kb.documents[0].chunks[0].index_text(),
            "Условия заключения договора договор оферта Статья 432. Договор считается заключенным"
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::load_or_default(&dir.path().join("absent.json")).unwrap();
        assert!(kb.documents.is_empty());
    }

    #[test]
    fn jsonl_writer_terminates_records() {
        let mut writer = JsonlWriter::new(Vec::new());
        writer.write_record(&QaPair {
            question: "q".to_string(),
            answer: "a".to_string(),
        })
        .unwrap();
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        let parsed: QaPair = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.answer, "a");
    }
}
