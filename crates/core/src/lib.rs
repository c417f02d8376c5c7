pub mod answer;
pub mod chunking;
pub mod completion;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod grading;
pub mod history;
pub mod indexer;
pub mod models;
pub mod quiz;
pub mod retriever;
pub mod retry;
pub mod stores;
pub mod traits;
pub mod weakness;

pub use answer::{AnswerConfig, AnswerSynthesizer};
pub use chunking::{build_chunks, ChunkSpans, ChunkingConfig, TokenStream};
pub use completion::{
    ChatCompletionsClient, ChatCompletionsConfig, CompletionRequest, CompletionService,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, HttpEmbedderConfig,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::{EngineServices, StudyEngine};
pub use error::{EngineError, ErrorKind};
pub use extractor::{extract_page_texts, load_document, PageExtractor, PageText};
pub use grading::grade;
pub use history::ProgressTracker;
pub use indexer::Indexer;
pub use models::{
    Chunk, CollectionInfo, CollectionKey, Difficulty, Document, EngineOptions, GradingResult,
    IndexReport, IndexedChunk, ProgressSummary, Question, QuestionOutcome, Quiz, QuizAttempt,
    RetrievalResult, ScoredChunk, SubmittedAnswers, SynthesizedAnswer, TokenSpan, WeaknessRecord,
};
pub use quiz::{QuizConfig, QuizGenerator};
pub use retriever::{cosine_similarity, Retriever};
pub use retry::RetryPolicy;
pub use stores::{MemoryHistoryStore, MemoryVectorStore, MemoryWeaknessStore, QdrantStore};
pub use traits::{HistoryStore, VectorIndex, WeaknessStore};
pub use weakness::WeaknessAggregator;
