use anyhow::{Context, Result};
use itertools::Itertools;
use juris_core::{ChunkConfig, ChunkMode, Chunker};
use juris_index::{AnalyzedChunk, DocumentRecord, QaPair};
use juris_llm::{LlmClient, LlmRequest};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::context::truncate_chars;

/// Longest slice of a chunk quoted in one analysis request.
const MAX_QUOTED_CHARS: usize = 5000;
const ANALYSIS_TEMPERATURE: f32 = 0.3;
const ANALYSIS_MAX_TOKENS: u32 = 2000;

/// Document-level fields reported in the reply to the first chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFields {
    pub doc_name: Option<String>,
    pub doc_date: Option<String>,
    pub doc_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkAnalysis {
    pub document: DocumentFields,
    pub chunk: AnalyzedChunk,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Qa,
    Keywords,
}

/// Parses the line-oriented analysis reply.
///
/// Recognised headers are `doc_name:`, `doc_date:`, `doc_type:`,
/// `chunk_summary:`, `qa_pairs:` and `chunk_keywords:`. QA lines use `::`
/// between question and answer. Anything unrecognised is ignored, so a
/// malformed reply degrades to empty fields rather than an error.
pub fn parse_analysis(reply: &str) -> ChunkAnalysis {
    let mut parsed = ChunkAnalysis::default();
    let mut section = None;
    for line in reply.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(value) = field(line, "doc_name:") {
            parsed.document.doc_name = non_empty(value);
        } else if let Some(value) = field(line, "doc_date:") {
            parsed.document.doc_date = non_empty(value);
        } else if let Some(value) = field(line, "doc_type:") {
            parsed.document.doc_type = non_empty(value);
        } else if let Some(value) = field(line, "chunk_summary:") {
            section = Some(Section::Summary);
            parsed.chunk.chunk_summary = value.to_string();
        } else if let Some(value) = field(line, "qa_pairs:") {
            section = Some(Section::Qa);
            push_qa(&mut parsed.chunk.qa_pairs, value);
        } else if let Some(value) = field(line, "chunk_keywords:") {
            section = Some(Section::Keywords);
            push_keywords(&mut parsed.chunk.chunk_keywords, value);
        } else {
            match section {
                Some(Section::Summary) => {
                    if !parsed.chunk.chunk_summary.is_empty() {
                        parsed.chunk.chunk_summary.push(' ');
                    }
                    parsed.chunk.chunk_summary.push_str(strip_bullet(line));
                }
                Some(Section::Qa) => push_qa(&mut parsed.chunk.qa_pairs, line),
                Some(Section::Keywords) => push_keywords(&mut parsed.chunk.chunk_keywords, line),
                None => {}
            }
        }
    }
    parsed
}

/// Splits `text` into sentence chunks and asks the model to analyse each one.
///
/// Document name, date and type come from the first chunk's reply; the
/// document id is the SHA-256 of the full text.
pub fn analyze_document(
    text: &str,
    prompt: &str,
    client: &LlmClient,
    chunking: &ChunkConfig,
) -> Result<DocumentRecord> {
    let chunker = Chunker::new(ChunkConfig {
        mode: ChunkMode::Sentences,
        ..*chunking
    })
    .context("invalid chunking for analysis")?;
    let mut record = DocumentRecord::new(hex::encode(Sha256::digest(text.as_bytes())));
    for (idx, chunk_text) in chunker.split(text).into_iter().enumerate() {
        let response = client
            .chat_blocking(&LlmRequest {
                system: None,
                user: format!(
                    "{prompt}\n\nТекст: {}",
                    truncate_chars(&chunk_text, MAX_QUOTED_CHARS)
                ),
                history: None,
                temperature: Some(ANALYSIS_TEMPERATURE),
                max_tokens: Some(ANALYSIS_MAX_TOKENS),
            })
            .with_context(|| format!("analysis request for chunk {idx} failed"))?;
        let mut analysis = parse_analysis(&response.content);
        debug!(
            chunk = idx,
            qa_pairs = analysis.chunk.qa_pairs.len(),
            keywords = analysis.chunk.chunk_keywords.len(),
            "parsed chunk analysis"
        );
        if idx == 0 {
            let fields = analysis.document;
            if let Some(name) = fields.doc_name {
                record.doc_name = name;
            }
            if let Some(date) = fields.doc_date {
                record.doc_date = date;
            }
            if let Some(kind) = fields.doc_type {
                record.doc_type = kind;
            }
            record.doc_summary = analysis.chunk.chunk_summary.clone();
        }
        analysis.chunk.chunk_text = chunk_text;
        record.chunks.push(analysis.chunk);
    }
    record.doc_keywords = record
        .chunks
        .iter()
        .flat_map(|chunk| chunk.chunk_keywords.iter().cloned())
        .unique()
        .collect();
    info!(
        doc_id = %record.doc_id,
        doc_name = %record.doc_name,
        chunks = record.chunks.len(),
        "analysed document"
    );
    Ok(record)
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn strip_bullet(line: &str) -> &str {
    line.trim_start_matches(['-', '*', '•']).trim()
}

fn push_qa(pairs: &mut Vec<QaPair>, line: &str) {
    if let Some((question, answer)) = strip_bullet(line).split_once("::") {
        pairs.push(QaPair {
            question: question.trim().to_string(),
            answer: answer.trim().to_string(),
        });
    }
}

fn push_keywords(keywords: &mut Vec<String>, line: &str) {
    keywords.extend(
        strip_bullet(line)
            .split([',', ';'])
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use juris_index::{UNKNOWN_DATE, UNKNOWN_NAME};
    use juris_llm::LlmSettings;

    const REPLY: &str = "doc_name: Гражданский кодекс РФ
doc_date: 1994-11-30
doc_type: закон
chunk_summary: Регулирует аренду.
- Определяет срок договора.
qa_pairs:
1. Каков срок аренды?:: Определяется договором.
строка без разделителя
- Можно ли продлить?:: Да.
chunk_keywords:
аренда
срок договора, наймодатель";

    #[test]
    fn parses_every_section() {
        let parsed = parse_analysis(REPLY);
        assert_eq!(parsed.document.doc_name.as_deref(), Some("Гражданский кодекс РФ"));
        assert_eq!(parsed.document.doc_date.as_deref(), Some("1994-11-30"));
        assert_eq!(parsed.document.doc_type.as_deref(), Some("закон"));
        assert_eq!(
            parsed.chunk.chunk_summary,
            "Регулирует аренду. Определяет срок договора."
        );
        assert_eq!(parsed.chunk.qa_pairs.len(), 2);
        assert_eq!(parsed.chunk.qa_pairs[0].question, "1. Каков срок аренды?");
        assert_eq!(parsed.chunk.qa_pairs[1].answer, "Да.");
        assert_eq!(
            parsed.chunk.chunk_keywords,
            vec!["аренда", "срок договора", "наймодатель"]
        );
    }

    #[test]
    fn malformed_reply_degrades_to_empty_fields() {
        let parsed = parse_analysis("Извините, не могу помочь.\ndoc_name:");
        assert_eq!(parsed, ChunkAnalysis::default());
    }

    #[test]
    fn offline_analysis_keeps_defaults_and_chunk_text() {
        let client = LlmClient::new(LlmSettings::local()).unwrap();
        let text = "Первое предложение. Второе предложение! Третье?";
        let chunking = ChunkConfig {
            size: 25,
            overlap: 0,
            ..ChunkConfig::default()
        };
        let record = analyze_document(text, "Проанализируй", &client, &chunking).unwrap();
        assert_eq!(record.doc_name, UNKNOWN_NAME);
        assert_eq!(record.doc_date, UNKNOWN_DATE);
        assert_eq!(record.doc_id.len(), 64);
        assert!(record.chunks.len() >= 2);
        let rebuilt: Vec<&str> = record.chunks.iter().map(|c| c.chunk_text.as_str()).collect();
        assert_eq!(rebuilt[0], "Первое предложение.");
    }
}
