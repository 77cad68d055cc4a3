use anyhow::{anyhow, Result};
use juris_core::{
    extract_keywords, search, Bm25Index, KeywordConfig, ScoredResult, SearchOptions,
};
use juris_llm::{LlmClient, LlmRequest, LlmResponse};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tiktoken_rs::CoreBPE;
use tracing::{debug, info};

use crate::context::{build_context, ContextBlock, DEFAULT_CONTEXT_CHARS, SYSTEM_PROMPT};
use crate::session::ChatSession;

static TOKENIZER: OnceCell<CoreBPE> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct ConsultConfig {
    pub search: SearchOptions,
    pub keywords: KeywordConfig,
    pub context_chars: usize,
    pub system_prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for ConsultConfig {
    fn default() -> Self {
        Self {
            search: SearchOptions::default(),
            keywords: KeywordConfig::default(),
            context_chars: DEFAULT_CONTEXT_CHARS,
            system_prompt: SYSTEM_PROMPT.to_string(),
            temperature: Some(0.7),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Consultation {
    /// `None` when retrieval found nothing and the model was not asked.
    pub answer: Option<String>,
    pub keywords: Vec<String>,
    pub results: Vec<ScoredResult>,
    pub context: String,
    pub metrics: Option<ConsultMetrics>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsultMetrics {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    /// cl100k_base count of the rendered context.
    pub context_tokens: u32,
}

/// Reviews an uploaded document against the corpus: its weightiest terms
/// form the query, and the hits plus the session history go to the model.
pub fn consult_document(
    text: &str,
    index: &Bm25Index,
    config: &ConsultConfig,
    session: &mut ChatSession,
    client: &LlmClient,
) -> Result<Consultation> {
    let keywords = extract_keywords(text, index, &config.keywords);
    debug!(keywords = ?keywords, "extracted document keywords");
    let query = keywords.join(" ");
    let results = search(index, &query, &config.search)?;
    respond(
        &query,
        keywords.clone(),
        results,
        index,
        config,
        session,
        client,
        Some(format!("Ключевые термины: {}\n", keywords.join(", "))),
    )
}

/// Answers a free-text question from the corpus.
pub fn answer_question(
    query: &str,
    index: &Bm25Index,
    config: &ConsultConfig,
    session: &mut ChatSession,
    client: &LlmClient,
) -> Result<Consultation> {
    let results = search(index, query, &config.search)?;
    respond(query, Vec::new(), results, index, config, session, client, None)
}

#[allow(clippy::too_many_arguments)]
fn respond(
    query: &str,
    keywords: Vec<String>,
    results: Vec<ScoredResult>,
    index: &Bm25Index,
    config: &ConsultConfig,
    session: &mut ChatSession,
    client: &LlmClient,
    preamble: Option<String>,
) -> Result<Consultation> {
    if results.is_empty() {
        info!(query, "nothing found, skipping model call");
        return Ok(Consultation {
            answer: None,
            keywords,
            results,
            context: String::new(),
            metrics: None,
        });
    }
    let blocks: Vec<ContextBlock> = results
        .iter()
        .map(|result| ContextBlock::from_result(result, index, &config.keywords))
        .collect();
    let context = build_context(query, &blocks, config.context_chars);
    // the session only changes once the model has answered
    let mut user = session.user_context().to_string();
    if let Some(preamble) = &preamble {
        user.push_str(preamble);
    }
    user.push_str(&context);

    let response = client.chat_blocking(&LlmRequest {
        system: Some(config.system_prompt.clone()),
        user,
        history: session.history(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    })?;
    session.record_answer(&response.content);
    let metrics = metrics_for(&context, &response)?;
    info!(
        hits = results.len(),
        context_tokens = metrics.context_tokens,
        completion_tokens = metrics.completion_tokens,
        "consultation answered"
    );
    Ok(Consultation {
        answer: Some(response.content),
        keywords,
        results,
        context,
        metrics: Some(metrics),
    })
}

fn metrics_for(context: &str, response: &LlmResponse) -> Result<ConsultMetrics> {
    Ok(ConsultMetrics {
        prompt_tokens: response.prompt_tokens,
        completion_tokens: response.completion_tokens,
        context_tokens: count_tokens(context)?,
    })
}

pub fn count_tokens(text: &str) -> Result<u32> {
    let bpe = TOKENIZER.get_or_try_init(|| {
        tiktoken_rs::cl100k_base().map_err(|e| anyhow!("failed to load tokenizer: {e}"))
    })?;
    Ok(bpe.encode_with_special_tokens(text).len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use juris_core::{Bm25Params, Chunk};
    use juris_llm::LlmSettings;

    fn index() -> Bm25Index {
        let corpus = vec![
            Chunk::new("ГК РФ", 0, "Договор аренды заключается на срок, определенный договором."),
            Chunk::new("ГК РФ", 1, "Неустойка взыскивается при просрочке исполнения."),
            Chunk::new("ЗоЗПП", 2, "Потребитель вправе вернуть товар надлежащего качества."),
        ];
        Bm25Index::build(corpus, Bm25Params::default()).unwrap()
    }

    fn client() -> LlmClient {
        LlmClient::new(LlmSettings::local()).unwrap()
    }

    #[test]
    fn question_without_hits_skips_the_model() {
        let mut session = ChatSession::new();
        let consultation =
            answer_question("биткоин", &index(), &ConsultConfig::default(), &mut session, &client())
                .unwrap();
        assert!(consultation.answer.is_none());
        assert!(consultation.results.is_empty());
        assert!(session.chat_log().is_empty());
    }

    #[test]
    fn question_with_hits_records_answer() {
        let mut session = ChatSession::new();
        let consultation =
            answer_question("неустойка", &index(), &ConsultConfig::default(), &mut session, &client())
                .unwrap();
        assert_eq!(consultation.results.len(), 1);
        assert_eq!(consultation.results[0].chunk.ordinal, 1);
        assert!(consultation.context.contains("Документ: ГК РФ"));
        assert!(consultation.answer.as_deref().unwrap().starts_with("USER_CONTEXT:"));
        assert!(session.chat_log().starts_with("\nАссистент: USER_CONTEXT:"));
        assert!(consultation.metrics.unwrap().context_tokens > 0);
    }

    #[test]
    fn document_keywords_drive_retrieval() {
        let mut session = ChatSession::new();
        let config = ConsultConfig {
            keywords: KeywordConfig {
                strip_vowel_endings: false,
                ..KeywordConfig::default()
            },
            ..ConsultConfig::default()
        };
        let consultation = consult_document(
            "Покупатель требует вернуть товар, ссылаясь на потребитель закон",
            &index(),
            &config,
            &mut session,
            &client(),
        )
        .unwrap();
        assert!(consultation.keywords.contains(&"потребитель".to_string()));
        assert_eq!(consultation.results[0].chunk.source, "ЗоЗПП");
        assert!(consultation.answer.is_some());
    }

    #[test]
    fn failed_model_call_leaves_session_untouched() {
        let mut settings = LlmSettings::new(juris_llm::LlmProvider::OpenAi);
        settings.base_url = Some("http://127.0.0.1:9".to_string());
        settings.api_key = Some("test-key".to_string());
        settings.max_retries = 0;
        settings.timeout = std::time::Duration::from_secs(2);
        let unreachable = LlmClient::new(settings).unwrap();

        let mut session = ChatSession::new();
        session.record_answer("Ранее: срок исковой давности три года.");
        let before = session.clone();
        let result = answer_question(
            "неустойка",
            &index(),
            &ConsultConfig::default(),
            &mut session,
            &unreachable,
        );
        assert!(result.is_err());
        assert_eq!(session, before);
        assert_eq!(session.user_context(), crate::session::USER_CONTEXT_PREFIX);

        let retry =
            answer_question("неустойка", &index(), &ConsultConfig::default(), &mut session, &client())
                .unwrap();
        assert!(retry.answer.is_some());
        assert!(session.chat_log().starts_with("\nАссистент: Ранее"));
        assert_eq!(session.chat_log().matches("Ассистент: ").count(), 2);
        assert_eq!(session.user_context(), crate::session::USER_CONTEXT_PREFIX);
    }

    #[test]
    fn consult_finds_hits_without_keyword_repetition() {
        let mut session = ChatSession::new();
        let config = ConsultConfig {
            search: SearchOptions {
                keyword_weight: 0,
                ..SearchOptions::default()
            },
            keywords: KeywordConfig {
                strip_vowel_endings: false,
                ..KeywordConfig::default()
            },
            ..ConsultConfig::default()
        };
        let consultation = consult_document(
            "Неустойка за просрочку исполнения",
            &index(),
            &config,
            &mut session,
            &client(),
        )
        .unwrap();
        assert!(!consultation.results.is_empty());
        assert_eq!(consultation.results[0].chunk.ordinal, 1);
    }

    #[test]
    fn invalid_search_options_surface_as_errors() {
        let mut session = ChatSession::new();
        let config = ConsultConfig {
            search: SearchOptions {
                min_score: f32::NAN,
                ..SearchOptions::default()
            },
            ..ConsultConfig::default()
        };
        assert!(answer_question("неустойка", &index(), &config, &mut session, &client()).is_err());
        assert_eq!(session, ChatSession::new());
    }

    #[test]
    fn token_counts_are_stable() {
        assert_eq!(count_tokens("").unwrap(), 0);
        assert_eq!(count_tokens("hello world").unwrap(), 2);
    }
}
