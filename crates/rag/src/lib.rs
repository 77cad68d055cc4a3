pub mod analysis;
pub mod context;
pub mod pipeline;
pub mod session;

pub use analysis::{analyze_document, parse_analysis, ChunkAnalysis, DocumentFields};
pub use context::{
    build_context, truncate_chars, ContextBlock, ANALYSIS_PROMPT, DEFAULT_CONTEXT_CHARS,
    FRAGMENT_CHARS, SYSTEM_PROMPT,
};
pub use pipeline::{
    answer_question, consult_document, count_tokens, ConsultConfig, ConsultMetrics, Consultation,
};
pub use session::{ChatSession, USER_CONTEXT_PREFIX};
pub use juris_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse, LlmSettings};
