use juris_core::{extract_keywords, Bm25Index, KeywordConfig, ScoredResult};

pub const DEFAULT_CONTEXT_CHARS: usize = 4000;
/// Per-fragment cap on the quoted content.
pub const FRAGMENT_CHARS: usize = 1000;
const BLOCK_KEYWORDS: usize = 5;

pub const SYSTEM_PROMPT: &str = "Ты юрист-консультант. Отвечай доброжелательно и структурированно. \
Запрещено выдумывать законы и судебные решения. Оперируй только известной информацией из контекста USER_CONTEXT.";

pub const ANALYSIS_PROMPT: &str = "Извлеки данные из юридического документа. Формат ответа строго соблюдай:
doc_name: [полное название документа]
doc_date: [дата в формате ГГГГ-ММ-ДД или \"Не указана\"]
doc_type: [тип: закон, указ, постановление, судебный акт, статья или иное]
chunk_summary: [три тезиса о содержании]
qa_pairs: [3 пары в формате \"вопрос:: ответ\", по одной на строке]
chunk_keywords: [3 ключевых слова и 3 ключевые фразы, по одному на строке]";

/// One retrieved fragment as it is quoted to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub document: String,
    pub keywords: Vec<String>,
    pub content: String,
}

impl ContextBlock {
    pub fn new(document: impl Into<String>, keywords: Vec<String>, content: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            keywords,
            content: content.into(),
        }
    }

    /// Labels a hit with the terms of its own text that weigh most in `index`.
    pub fn from_result(result: &ScoredResult, index: &Bm25Index, keywords: &KeywordConfig) -> Self {
        let config = KeywordConfig {
            limit: keywords.limit.min(BLOCK_KEYWORDS),
            ..keywords.clone()
        };
        Self::new(
            result.chunk.source.clone(),
            extract_keywords(&result.chunk.text, index, &config),
            result.chunk.text.clone(),
        )
    }
}

/// Renders the query and the retrieved fragments into a prompt body of at
/// most `max_chars` characters.
pub fn build_context(query: &str, blocks: &[ContextBlock], max_chars: usize) -> String {
    let mut parts = vec![
        format!("Запрос пользователя: {}", query.trim()),
        "Релевантные фрагменты из документов:".to_string(),
    ];
    for block in blocks {
        parts.push(format!("\nДокумент: {}", block.document));
        parts.push(format!("Ключевые слова: {}", block.keywords.join(", ")));
        parts.push(format!(
            "Содержание: {}",
            truncate_chars(&block.content, FRAGMENT_CHARS)
        ));
    }
    truncate_chars(&parts.join("\n"), max_chars).to_string()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
