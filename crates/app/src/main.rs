use anyhow::{anyhow, bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use docquiz_core::completion::{DEFAULT_COMPLETION_BASE_URL, DEFAULT_COMPLETION_MODEL};
use docquiz_core::{
    load_document, CharacterNgramEmbedder, ChatCompletionsClient, ChatCompletionsConfig,
    Difficulty, Embedder, EngineError, EngineOptions, EngineServices, HttpEmbedder,
    HttpEmbedderConfig, MemoryHistoryStore, MemoryVectorStore, MemoryWeaknessStore, QdrantStore,
    Quiz, RetryPolicy, StudyEngine, SubmittedAnswers, VectorIndex, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "docquiz", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding local collections, journals and stored quizzes
    #[arg(long, env = "DOCQUIZ_STATE_DIR", default_value = ".docquiz")]
    state_dir: PathBuf,

    /// Qdrant base URL; the local collection store is used when unset
    #[arg(long, env = "DOCQUIZ_QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Prefix for Qdrant collection aliases
    #[arg(long, env = "DOCQUIZ_QDRANT_PREFIX", default_value = "docquiz")]
    qdrant_prefix: String,

    /// OpenAI-compatible embeddings base URL; the local trigram embedder is used when unset
    #[arg(long, env = "DOCQUIZ_EMBEDDING_URL")]
    embedding_url: Option<String>,

    /// Embedding model name
    #[arg(long, env = "DOCQUIZ_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// Embedding dimensions
    #[arg(long, env = "DOCQUIZ_EMBEDDING_DIMENSIONS")]
    embedding_dimensions: Option<usize>,

    /// Embedding API key
    #[arg(long, env = "DOCQUIZ_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// OpenAI-compatible chat completions base URL
    #[arg(long, env = "DOCQUIZ_LLM_BASE_URL", default_value = DEFAULT_COMPLETION_BASE_URL)]
    llm_base_url: String,

    /// Chat completion model
    #[arg(long, env = "DOCQUIZ_LLM_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    llm_model: String,

    /// Chat completion API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,

    /// Timeout per external service call, in seconds
    #[arg(long, env = "DOCQUIZ_REQUEST_TIMEOUT_SECS", default_value = "60")]
    request_timeout_secs: u64,

    /// Attempts for transient embedding and completion failures
    #[arg(long, env = "DOCQUIZ_MAX_ATTEMPTS", default_value = "3")]
    max_attempts: u32,

    /// Chunk window in whitespace tokens
    #[arg(long, env = "DOCQUIZ_CHUNK_WINDOW", default_value = "512")]
    chunk_window: usize,

    /// Tokens shared by consecutive chunks
    #[arg(long, env = "DOCQUIZ_CHUNK_OVERLAP", default_value = "50")]
    chunk_overlap: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Index a document (.pdf, or plain text with form-feed page breaks).
    Index {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Ask a question and get an answer citing document chunks.
    Ask {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        question: String,
    },
    /// Generate a multiple-choice quiz on a topic of the document.
    Quiz {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        document_id: String,
        #[arg(long)]
        topic: String,
        /// easy, medium or hard
        #[arg(long, default_value = "medium")]
        difficulty: String,
        #[arg(long, default_value = "5")]
        count: usize,
    },
    /// Grade answers for a stored quiz and record missed concepts.
    Grade {
        #[arg(long)]
        quiz_id: String,
        /// Answer as QUESTION_ID=OPTION_TEXT; repeat per question
        #[arg(long = "answer")]
        answers: Vec<String>,
        /// JSON object mapping question ids to chosen options
        #[arg(long)]
        answers_file: Option<PathBuf>,
    },
    /// List recurring weak concepts for an owner.
    Weaknesses {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Show quiz count, average score and weak concept count for an owner.
    Progress {
        #[arg(long)]
        owner: String,
    },
    /// List graded quizzes for an owner, newest first.
    History {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Remove a document's index.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        document_id: String,
    },
}

struct StatePaths {
    vectors: PathBuf,
    weaknesses: PathBuf,
    history: PathBuf,
    quizzes: PathBuf,
}

impl StatePaths {
    fn new(root: &Path) -> Self {
        Self {
            vectors: root.join("vectors"),
            weaknesses: root.join("weaknesses.jsonl"),
            history: root.join("history.jsonl"),
            quizzes: root.join("quizzes"),
        }
    }

    /// Only generated quiz ids (UUIDs) name files, so a user-supplied id
    /// cannot point outside the quiz directory.
    fn quiz(&self, quiz_id: &str) -> anyhow::Result<PathBuf> {
        let id = Uuid::parse_str(quiz_id.trim())
            .map_err(|_| anyhow!("quiz id {quiz_id:?} is not a UUID"))?;
        Ok(self.quizzes.join(format!("{}.json", id.hyphenated())))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let paths = StatePaths::new(&cli.state_dir);
    let timeout = Duration::from_secs(cli.request_timeout_secs);
    let policy = RetryPolicy {
        max_attempts: cli.max_attempts,
        ..RetryPolicy::default()
    };

    let embedder: Arc<dyn Embedder> = match &cli.embedding_url {
        Some(endpoint) => Arc::new(
            HttpEmbedder::new(HttpEmbedderConfig {
                endpoint: endpoint.clone(),
                model: cli.embedding_model.clone(),
                api_key: cli.embedding_api_key.clone(),
                dimensions: cli.embedding_dimensions.unwrap_or(1536),
                timeout: Some(timeout),
            })
            .map_err(engine_failure)?,
        ),
        None => Arc::new(CharacterNgramEmbedder::new(
            cli.embedding_dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        )),
    };

    let vectors: Arc<dyn VectorIndex> = match &cli.qdrant_url {
        Some(url) => Arc::new(QdrantStore::new(url, &cli.qdrant_prefix)),
        None => Arc::new(MemoryVectorStore::open(&paths.vectors).map_err(engine_failure)?),
    };
    let weaknesses =
        Arc::new(MemoryWeaknessStore::open(&paths.weaknesses).map_err(engine_failure)?);
    let history = Arc::new(MemoryHistoryStore::open(&paths.history).map_err(engine_failure)?);

    let completion = ChatCompletionsClient::new(ChatCompletionsConfig {
        base_url: cli.llm_base_url.clone(),
        model: cli.llm_model.clone(),
        api_key: cli.llm_api_key.clone(),
        timeout: Some(timeout),
    })
    .map_err(engine_failure)?;

    let options = EngineOptions {
        chunk_window_tokens: cli.chunk_window,
        chunk_overlap_tokens: cli.chunk_overlap,
        ..EngineOptions::default()
    };
    let engine = StudyEngine::new(
        EngineServices {
            embedder: embedder.clone(),
            vectors,
            completion: Arc::new(completion),
            weaknesses,
            history,
        },
        options,
    )
    .map_err(engine_failure)?;

    info!(
        version = app_version,
        embedder = embedder.model_id(),
        started_at = %Utc::now().to_rfc3339(),
        "docquiz boot"
    );

    match cli.command {
        Command::Index {
            owner,
            document_id,
            file,
        } => {
            let document = load_document(&owner, &document_id, &file).map_err(engine_failure)?;
            let report = policy
                .run("index_document", || engine.index_document(&document))
                .await
                .map_err(engine_failure)?;

            println!(
                "{} chunks indexed for {} ({} tokens, checksum {}) at {}",
                report.chunk_count,
                report.key,
                report.token_count,
                report.checksum,
                report.indexed_at.to_rfc3339()
            );
        }
        Command::Ask {
            owner,
            document_id,
            question,
        } => {
            let answer = policy
                .run("ask", || engine.ask(&owner, &document_id, &question))
                .await
                .map_err(engine_failure)?;

            println!("{}", answer.answer);
            println!();
            if answer.cited_chunk_ids.is_empty() {
                println!("citations: none");
            }
            for chunk_id in &answer.cited_chunk_ids {
                println!("cited chunk: {chunk_id}");
            }
        }
        Command::Quiz {
            owner,
            document_id,
            topic,
            difficulty,
            count,
        } => {
            let difficulty: Difficulty = difficulty.parse().map_err(engine_failure)?;
            let quiz = policy
                .run("generate_quiz", || {
                    engine.generate_quiz(&owner, &document_id, &topic, difficulty, count)
                })
                .await
                .map_err(engine_failure)?;

            write_json(&paths.quiz(&quiz.quiz_id)?, &quiz)?;
            print_quiz(&quiz);
        }
        Command::Grade {
            quiz_id,
            answers,
            answers_file,
        } => {
            let quiz: Quiz = read_json(&paths.quiz(&quiz_id)?)
                .with_context(|| format!("quiz {quiz_id} is not stored"))?;
            let mut submitted = match answers_file {
                Some(path) => read_answers_file(&path)?,
                None => SubmittedAnswers::new(),
            };
            for raw in &answers {
                let (id, option) = parse_answer(raw)?;
                submitted.insert(id, option);
            }

            let result = engine
                .submit_quiz(&quiz, &submitted, Utc::now())
                .await
                .map_err(engine_failure)?;

            println!(
                "score: {}% ({}/{})",
                result.score, result.correct_count, result.total_questions
            );
            for outcome in &result.outcomes {
                let mark = if outcome.correct { "correct" } else { "incorrect" };
                println!(
                    "  q{} {mark}: answered {:?}, expected {:?}",
                    outcome.question_id,
                    outcome.submitted.as_deref().unwrap_or("-"),
                    outcome.correct_option
                );
            }
            if !result.missed_concepts.is_empty() {
                println!("missed concepts: {}", result.missed_concepts.join(", "));
            }
        }
        Command::Weaknesses { owner, limit } => {
            let records = engine
                .top_weaknesses(&owner, limit)
                .await
                .map_err(engine_failure)?;
            if records.is_empty() {
                println!("no recorded weaknesses for {owner}");
            }
            for record in records {
                println!(
                    "{} misses={} last_miss={}",
                    record.concept,
                    record.miss_count,
                    record.last_miss_at.to_rfc3339()
                );
            }
        }
        Command::Progress { owner } => {
            let progress = engine.progress(&owner).await.map_err(engine_failure)?;
            println!(
                "{}: {} quizzes, average score {:.1}%, {} weak concepts",
                progress.owner,
                progress.total_quizzes,
                progress.average_score,
                progress.weak_concept_count
            );
            if let Some(last) = progress.last_completed_at {
                println!("last quiz completed at {}", last.to_rfc3339());
            }
        }
        Command::History { owner, limit } => {
            let attempts = engine.quiz_history(&owner).await.map_err(engine_failure)?;
            if attempts.is_empty() {
                println!("no graded quizzes for {owner}");
            }
            for attempt in attempts.into_iter().take(limit) {
                println!(
                    "{} {} {:?} ({}) score={}% ({}/{})",
                    attempt.completed_at.to_rfc3339(),
                    attempt.quiz_id,
                    attempt.topic,
                    attempt.difficulty,
                    attempt.score,
                    attempt.correct_count,
                    attempt.total_questions
                );
            }
        }
        Command::Delete { owner, document_id } => {
            let removed = engine
                .delete_document(&owner, &document_id)
                .await
                .map_err(engine_failure)?;
            if removed {
                println!("deleted index for {owner}/{document_id}");
            } else {
                println!("no index found for {owner}/{document_id}");
            }
        }
    }

    Ok(())
}

fn engine_failure(error: EngineError) -> anyhow::Error {
    anyhow!("[{}] {}", error.kind().as_str(), error)
}

fn print_quiz(quiz: &Quiz) {
    println!(
        "quiz {} on {:?} ({}, {} questions)",
        quiz.quiz_id,
        quiz.topic,
        quiz.difficulty,
        quiz.questions.len()
    );
    for question in &quiz.questions {
        println!();
        println!("{}. {}", question.id, question.prompt);
        for (letter, option) in ['A', 'B', 'C', 'D'].iter().zip(question.options.iter()) {
            println!("   {letter}) {option}");
        }
    }
}

fn parse_answer(raw: &str) -> anyhow::Result<(u32, String)> {
    let Some((id, option)) = raw.split_once('=') else {
        bail!("answer {raw:?} must look like QUESTION_ID=OPTION_TEXT");
    };
    let id = id
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid question id in {raw:?}"))?;
    Ok((id, option.trim().to_string()))
}

fn read_answers_file(path: &Path) -> anyhow::Result<SubmittedAnswers> {
    let raw: std::collections::BTreeMap<String, String> = read_json(path)?;
    raw.into_iter()
        .map(|(id, option)| -> anyhow::Result<(u32, String)> {
            let id = id
                .trim()
                .parse::<u32>()
                .with_context(|| format!("invalid question id {id:?} in {}", path.display()))?;
            Ok((id, option))
        })
        .collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(value)?)
        .with_context(|| format!("writing {}", path.display()))
}
