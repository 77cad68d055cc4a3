use std::fs;
#[cfg(feature = "docx")]
use std::io::Read;
use std::path::{Path, PathBuf};

use juris_index::KnowledgeBase;
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::{Chunk, ChunkConfig, Chunker};
use crate::error::{JurisError, Result};

pub fn is_supported(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("txt" | "md" | "pdf" | "docx"))
}

/// Reads a document as plain text. Plain-text formats are decoded as UTF-8,
/// PDFs go through `pdf-extract`, DOCX bodies are read from
/// `word/document.xml` with one line per paragraph.
pub fn load_text(path: &Path) -> Result<String> {
    match extension(path).as_deref() {
        Some("txt" | "md") => Ok(fs::read_to_string(path)?),
        Some("pdf") => load_pdf(path),
        Some("docx") => load_docx(path),
        _ => Err(JurisError::UnsupportedInput(path.to_path_buf())),
    }
}

#[cfg(feature = "pdf")]
fn load_pdf(path: &Path) -> Result<String> {
    pdf_extract::extract_text(path).map_err(|e| JurisError::Pdf(e.to_string()))
}

#[cfg(not(feature = "pdf"))]
fn load_pdf(path: &Path) -> Result<String> {
    Err(JurisError::UnsupportedInput(path.to_path_buf()))
}

#[cfg(feature = "docx")]
fn load_docx(path: &Path) -> Result<String> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| JurisError::Docx(e.to_string()))?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .map_err(|e| JurisError::Docx(e.to_string()))?
        .read_to_string(&mut xml)?;
    docx_body_text(&xml)
}

#[cfg(not(feature = "docx"))]
fn load_docx(path: &Path) -> Result<String> {
    Err(JurisError::UnsupportedInput(path.to_path_buf()))
}

/// Concatenates the `w:t` runs of a WordprocessingML body. Paragraphs end
/// with a newline; tabs and line breaks become whitespace.
#[cfg(feature = "docx")]
fn docx_body_text(xml: &str) -> Result<String> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;
    loop {
        match reader
            .read_event()
            .map_err(|e| JurisError::Docx(e.to_string()))?
        {
            Event::Start(e) if e.name().as_ref() == b"w:t" => in_run_text = true,
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_run_text = false,
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:tab" => text.push('\t'),
                b"w:br" | b"w:cr" => text.push('\n'),
                b"w:p" => text.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run_text => {
                let run = t.unescape().map_err(|e| JurisError::Docx(e.to_string()))?;
                text.push_str(&run);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(text.trim_end().to_string())
}

/// Chunks every supported file under `root` into one ordered corpus.
///
/// Files are visited in file-name order so repeated runs over the same tree
/// produce the same corpus. Unsupported files are skipped.
pub fn corpus_from_dir(root: &Path, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    let chunker = Chunker::new(*config)?;
    let files: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|path| {
            let supported = is_supported(path);
            if !supported {
                warn!(path = %path.display(), "skipping unsupported file");
            }
            supported
        })
        .collect();
    let per_file: Vec<Vec<Chunk>> = files
        .par_iter()
        .map(|path| {
            let text = load_text(path)?;
            let source = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");
            Ok(chunker.chunk_document(&text, &source))
        })
        .collect::<Result<_>>()?;
    let corpus: Vec<Chunk> = per_file.into_iter().flatten().collect();
    info!(
        files = files.len(),
        chunks = corpus.len(),
        root = %root.display(),
        "collected corpus"
    );
    Ok(corpus)
}

/// One chunk per analysed chunk of the knowledge base, sourced by document
/// name and numbered across the whole base.
pub fn corpus_from_knowledge_base(kb: &KnowledgeBase) -> Vec<Chunk> {
    kb.documents
        .iter()
        .flat_map(|doc| doc.chunks.iter().map(move |chunk| (doc, chunk)))
        .enumerate()
        .map(|(ordinal, (doc, chunk))| Chunk::new(doc.doc_name.clone(), ordinal, chunk.index_text()))
        .collect()
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use juris_index::{AnalyzedChunk, DocumentRecord};

    #[test]
    fn rejects_unknown_extensions() {
        assert!(matches!(
            load_text(Path::new("contract.rtf")),
            Err(JurisError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn directory_corpus_is_ordered_and_skips_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "второй документ").unwrap();
        fs::write(dir.path().join("a.txt"), "первый документ").unwrap();
        fs::write(dir.path().join("c.rtf"), "ignored").unwrap();
        let corpus = corpus_from_dir(dir.path(), &ChunkConfig::default()).unwrap();
        let sources: Vec<&str> = corpus.iter().map(|c| c.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "b.txt"]);
        assert_eq!(corpus[0].text, "первый документ");
    }

    #[cfg(feature = "docx")]
    fn write_docx(path: &Path, body: &str) {
        use std::io::Write;

        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("word/document.xml", zip::write::FileOptions::default())
            .unwrap();
        write!(
            zip,
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
        )
        .unwrap();
        zip.finish().unwrap();
    }

    #[cfg(feature = "docx")]
    #[test]
    fn docx_paragraphs_become_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claim.docx");
        write_docx(
            &path,
            r#"<w:p><w:r><w:t>Исковое </w:t></w:r><w:r><w:t xml:space="preserve">заявление</w:t></w:r></w:p><w:p><w:r><w:t>Истец &amp; ответчик</w:t><w:tab/><w:t>ст. 15</w:t></w:r></w:p>"#,
        );
        assert!(is_supported(&path));
        assert_eq!(
            load_text(&path).unwrap(),
            "Исковое заявление\nИстец & ответчик\tст. 15"
        );
    }

    #[cfg(feature = "docx")]
    #[test]
    fn docx_files_join_the_directory_corpus() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "первый документ").unwrap();
        write_docx(
            &dir.path().join("b.docx"),
            "<w:p><w:r><w:t>договор поставки</w:t></w:r></w:p>",
        );
        let corpus = corpus_from_dir(dir.path(), &ChunkConfig::default()).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus[1].source, "b.docx");
        assert_eq!(corpus[1].text, "договор поставки");
    }

    #[cfg(feature = "docx")]
    #[test]
    fn broken_docx_is_a_docx_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        fs::write(&path, "not a zip archive").unwrap();
        assert!(matches!(load_text(&path), Err(JurisError::Docx(_))));
    }

    #[test]
    fn invalid_chunking_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChunkConfig {
            size: 10,
            overlap: 10,
            ..ChunkConfig::default()
        };
        assert!(matches!(
            corpus_from_dir(dir.path(), &config),
            Err(JurisError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn knowledge_base_chunks_become_corpus() {
        let mut doc = DocumentRecord::new("d1");
        doc.doc_name = "Закон о защите прав потребителей".to_string();
        doc.chunks.push(AnalyzedChunk {
            chunk_text: "Статья 18".to_string(),
            chunk_summary: "Возврат товара".to_string(),
            qa_pairs: Vec::new(),
            chunk_keywords: vec!["возврат".to_string()],
        });
        doc.chunks.push(AnalyzedChunk::default());
        let kb = KnowledgeBase {
            documents: vec![doc],
        };
        let corpus = corpus_from_knowledge_base(&kb);
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus[0].source, "Закон о защите прав потребителей");
        assert_eq!(corpus[0].text, "Возврат товара возврат Статья 18");
        assert_eq!(corpus[1].ordinal, 1);
    }
}
