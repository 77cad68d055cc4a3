use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use glob::glob;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use juris_core::{
    corpus_from_dir, corpus_from_knowledge_base, extract_keywords, is_supported, load_text,
    search_with_keywords, Bm25Index, Bm25Params, ChunkConfig, KeywordConfig, ScoredResult,
    SearchOptions, DEFAULT_DEDUP_PREFIX_CHARS,
};
use juris_index::{JsonlWriter, KnowledgeBase};
use juris_rag::{
    analyze_document, answer_question, consult_document, ChatSession, ConsultConfig, Consultation,
    LlmClient, LlmProvider, LlmSettings, ANALYSIS_PROMPT, DEFAULT_CONTEXT_CHARS, SYSTEM_PROMPT,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const VERSION_LONG: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (formats: ",
    env!("JURIS_FORMATS"),
    ")"
);

const DEFAULT_CONFIG: &str = "juris.toml";

#[derive(Parser, Debug)]
#[command(name = "juris", version = VERSION, long_version = VERSION_LONG, about = "Legal document retrieval assistant")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a BM25 snapshot from a directory of documents or a knowledge base JSON.
    Index {
        input: PathBuf,
        #[arg(long, default_value = "index.json")]
        out: PathBuf,
        #[command(flatten)]
        tuning: TuningArgs,
    },
    Search {
        query: String,
        #[arg(long)]
        index: PathBuf,
        /// Comma-separated auxiliary keywords.
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
        #[command(flatten)]
        tuning: TuningArgs,
        #[arg(long, action = ArgAction::SetTrue)]
        jsonl: bool,
    },
    Keywords {
        file: PathBuf,
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    Consult {
        file: PathBuf,
        #[arg(long)]
        index: PathBuf,
        #[command(flatten)]
        tuning: TuningArgs,
        #[command(flatten)]
        llm: LlmArgs,
    },
    Ask {
        query: String,
        #[arg(long)]
        index: PathBuf,
        #[command(flatten)]
        tuning: TuningArgs,
        #[command(flatten)]
        llm: LlmArgs,
    },
    /// Analyse documents with the model and append them to a knowledge base.
    Analyze {
        inputs: Vec<PathBuf>,
        #[arg(long, default_value = "knowledge_base.json")]
        kb: PathBuf,
        #[arg(long = "prompt-file")]
        prompt_file: Option<PathBuf>,
        #[command(flatten)]
        llm: LlmArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct TuningArgs {
    #[arg(long)]
    k1: Option<f32>,
    #[arg(long)]
    b: Option<f32>,
    #[arg(long = "top-n")]
    top_n: Option<usize>,
    #[arg(long = "min-score")]
    min_score: Option<f32>,
    #[arg(long = "keyword-weight")]
    keyword_weight: Option<u32>,
}

#[derive(Args, Debug, Clone, Default)]
struct LlmArgs {
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;

    match cli.command {
        Commands::Index { input, out, tuning } => {
            let params = file_config.retrieval.params(&tuning)?;
            let corpus = if input.is_dir() {
                corpus_from_dir(&input, &file_config.chunking)?
            } else {
                let kb = KnowledgeBase::load(&input)?;
                corpus_from_knowledge_base(&kb)
            };
            let index = Bm25Index::build(corpus, params)?;
            save_index(&index, &out)?;
            println!(
                "[juris] Indexed {} chunks (avgdl {:.1}) -> {}",
                index.len(),
                index.avgdl(),
                out.display()
            );
        }
        Commands::Search {
            query,
            index,
            keywords,
            tuning,
            jsonl,
        } => {
            let index = load_index(&index, file_config.retrieval.params(&tuning)?)?;
            let options = file_config.retrieval.options(&tuning)?;
            let results = search_with_keywords(&index, &query, &keywords, &options)?;
            if jsonl {
                let stdout = io::stdout();
                let mut writer = JsonlWriter::new(stdout.lock());
                for result in &results {
                    writer.write_record(result)?;
                }
            } else {
                print_results(&results);
            }
        }
        Commands::Keywords { file, index, limit } => {
            let index = load_index(&index, file_config.retrieval.params(&TuningArgs::default())?)?;
            let text = load_text(&file)?;
            let mut config = file_config.keywords.clone();
            if let Some(limit) = limit {
                config.limit = limit;
            }
            for keyword in extract_keywords(&text, &index, &config) {
                println!("{keyword}");
            }
        }
        Commands::Consult {
            file,
            index,
            tuning,
            llm,
        } => {
            let index = load_index(&index, file_config.retrieval.params(&tuning)?)?;
            let config = file_config.consult_config(&tuning)?;
            let client = build_llm_client(&file_config.llm, &llm)?;
            let text = load_text(&file)?;
            let mut session = ChatSession::new();
            let consultation = consult_document(&text, &index, &config, &mut session, &client)?;
            print_consultation(&consultation, &client);
        }
        Commands::Ask {
            query,
            index,
            tuning,
            llm,
        } => {
            let index = load_index(&index, file_config.retrieval.params(&tuning)?)?;
            let config = file_config.consult_config(&tuning)?;
            let client = build_llm_client(&file_config.llm, &llm)?;
            let mut session = ChatSession::new();
            let consultation = answer_question(&query, &index, &config, &mut session, &client)?;
            print_consultation(&consultation, &client);
        }
        Commands::Analyze {
            inputs,
            kb,
            prompt_file,
            llm,
        } => {
            let prompt = match prompt_file {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("failed to read prompt {}", path.display()))?,
                None => ANALYSIS_PROMPT.to_string(),
            };
            let client = build_llm_client(&file_config.llm, &llm)?;
            let files = gather_input_files(&inputs)?;
            if files.is_empty() {
                bail!("no supported documents among the inputs");
            }
            let mut base = KnowledgeBase::load_or_default(&kb)?;
            for path in &files {
                let text = load_text(path)?;
                if text.trim().is_empty() {
                    warn!(path = %path.display(), "document has no text, skipping");
                    continue;
                }
                let record = analyze_document(&text, &prompt, &client, &file_config.chunking)?;
                println!(
                    "[juris] {} -> {} ({}, {} chunks)",
                    path.display(),
                    record.doc_name,
                    record.doc_type,
                    record.chunks.len()
                );
                base.push(record);
            }
            base.save(&kb)?;
            info!(
                documents = base.documents.len(),
                chunks = base.chunk_count(),
                kb = %kb.display(),
                "knowledge base saved"
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

fn save_index(index: &Bm25Index, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    index.to_writer(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Loads a snapshot, rescoring with `params` when they differ from the ones it
/// was built with.
fn load_index(path: &Path, params: Bm25Params) -> Result<Bm25Index> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let index = Bm25Index::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid index snapshot {}", path.display()))?;
    if index.params() == params {
        return Ok(index);
    }
    Ok(index.rebuild_with(params)?)
}

fn gather_input_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let input_str = input.to_string_lossy();
        if input_str.contains('*') || input_str.contains('?') || input_str.contains('[') {
            for entry in glob(&input_str)? {
                let path = entry?;
                if path.is_file() {
                    files.push(path);
                }
            }
            continue;
        }
        let meta = fs::metadata(input)
            .with_context(|| format!("failed to inspect {}", input.display()))?;
        if meta.is_dir() {
            for entry in WalkDir::new(input)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                files.push(entry.path().to_path_buf());
            }
        } else if meta.is_file() {
            files.push(input.clone());
        }
    }
    files.retain(|path| {
        let keep = is_supported(path);
        if !keep {
            warn!(path = %path.display(), "unsupported format, skipping");
        }
        keep
    });
    Ok(files)
}

fn build_llm_client(section: &LlmSection, args: &LlmArgs) -> Result<LlmClient> {
    let name = args.provider.as_deref().unwrap_or(&section.provider);
    let provider: LlmProvider = name.parse()?;
    let mut settings = LlmSettings::new(provider);
    if let Some(model) = args.model.clone().or_else(|| section.model.clone()) {
        settings.model = model;
    }
    settings.base_url = section.base_url.clone();
    settings.timeout = Duration::from_secs(section.timeout_secs);
    LlmClient::new(settings)
}

fn print_results(results: &[ScoredResult]) {
    if results.is_empty() {
        println!("[juris] Nothing found");
        return;
    }
    for result in results {
        println!(
            "{:>2}. {:.3}  {} #{}  {}",
            result.rank,
            result.score,
            result.chunk.source,
            result.chunk.ordinal,
            preview(&result.chunk.text, 160)
        );
    }
}

fn print_consultation(consultation: &Consultation, client: &LlmClient) {
    if !consultation.keywords.is_empty() {
        println!("[juris] Keywords:   {}", consultation.keywords.join(", "));
    }
    println!("[juris] Fragments:  {}", consultation.results.len());
    let Some(answer) = &consultation.answer else {
        println!("[juris] Nothing relevant found in the corpus");
        return;
    };
    println!(
        "[juris] LLM:        {} {}",
        client.provider().as_str(),
        client.model()
    );
    if let Some(metrics) = consultation.metrics {
        println!(
            "[juris] Tokens:     context {} / prompt {} / completion {}",
            metrics.context_tokens, metrics.prompt_tokens, metrics.completion_tokens
        );
    }
    println!();
    println!("{answer}");
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    retrieval: RetrievalSection,
    #[serde(default)]
    chunking: ChunkConfig,
    #[serde(default)]
    keywords: KeywordConfig,
    #[serde(default)]
    llm: LlmSection,
}

impl AppConfig {
    fn consult_config(&self, tuning: &TuningArgs) -> Result<ConsultConfig> {
        Ok(ConsultConfig {
            search: self.retrieval.options(tuning)?,
            keywords: self.keywords.clone(),
            context_chars: self.llm.context_chars,
            system_prompt: self
                .llm
                .system_prompt
                .clone()
                .unwrap_or_else(|| SYSTEM_PROMPT.to_string()),
            temperature: Some(self.llm.temperature),
            max_tokens: self.llm.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RetrievalSection {
    k1: f32,
    b: f32,
    top_n: usize,
    min_score: f32,
    keyword_weight: u32,
    dedup_prefix_chars: usize,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        let params = Bm25Params::default();
        let options = SearchOptions::default();
        Self {
            k1: params.k1,
            b: params.b,
            top_n: options.top_n,
            min_score: options.min_score,
            keyword_weight: options.keyword_weight,
            dedup_prefix_chars: DEFAULT_DEDUP_PREFIX_CHARS,
        }
    }
}

impl RetrievalSection {
    fn params(&self, tuning: &TuningArgs) -> Result<Bm25Params> {
        Ok(Bm25Params::new(
            tuning.k1.unwrap_or(self.k1),
            tuning.b.unwrap_or(self.b),
        )?)
    }

    fn options(&self, tuning: &TuningArgs) -> Result<SearchOptions> {
        let options = SearchOptions {
            top_n: tuning.top_n.unwrap_or(self.top_n),
            min_score: tuning.min_score.unwrap_or(self.min_score),
            keyword_weight: tuning.keyword_weight.unwrap_or(self.keyword_weight),
            dedup_prefix_chars: self.dedup_prefix_chars,
        };
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct LlmSection {
    provider: String,
    model: Option<String>,
    base_url: Option<String>,
    temperature: f32,
    max_tokens: Option<u32>,
    timeout_secs: u64,
    context_chars: usize,
    system_prompt: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi.as_str().to_string(),
            model: None,
            base_url: None,
            temperature: 0.7,
            max_tokens: None,
            timeout_secs: 60,
            context_chars: DEFAULT_CONTEXT_CHARS,
            system_prompt: None,
        }
    }
}
