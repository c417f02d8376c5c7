use crate::answer::{AnswerConfig, AnswerSynthesizer};
use crate::chunking::ChunkingConfig;
use crate::completion::CompletionService;
use crate::embeddings::Embedder;
use crate::grading::grade;
use crate::history::ProgressTracker;
use crate::indexer::Indexer;
use crate::models::{
    CollectionKey, Difficulty, Document, EngineOptions, GradingResult, IndexReport,
    ProgressSummary, Quiz, QuizAttempt, SubmittedAnswers, SynthesizedAnswer, WeaknessRecord,
};
use crate::quiz::{QuizConfig, QuizGenerator};
use crate::retriever::Retriever;
use crate::traits::{HistoryStore, VectorIndex, WeaknessStore};
use crate::weakness::WeaknessAggregator;
use crate::EngineError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Service handles the engine is built from. Each one is injected so callers
/// and tests choose the concrete collaborators.
#[derive(Clone)]
pub struct EngineServices {
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorIndex>,
    pub completion: Arc<dyn CompletionService>,
    pub weaknesses: Arc<dyn WeaknessStore>,
    pub history: Arc<dyn HistoryStore>,
}

pub struct StudyEngine {
    indexer: Indexer,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    generator: QuizGenerator,
    aggregator: WeaknessAggregator,
    tracker: ProgressTracker,
    options: EngineOptions,
}

impl StudyEngine {
    pub fn new(services: EngineServices, options: EngineOptions) -> Result<Self, EngineError> {
        validate_options(&options)?;
        let indexer = Indexer::new(
            services.embedder.clone(),
            services.vectors.clone(),
            ChunkingConfig::from(&options),
            options.embedding_batch_size,
        )?;
        let retriever = Retriever::new(services.embedder, services.vectors);
        let synthesizer = AnswerSynthesizer::new(
            services.completion.clone(),
            AnswerConfig {
                max_context_chunks: options.answer_max_context_chunks,
                max_output_tokens: options.answer_max_output_tokens,
                temperature: options.answer_temperature,
            },
        );
        let generator = QuizGenerator::new(
            services.completion,
            QuizConfig {
                max_questions: options.quiz_max_questions,
                max_context_chunks: options.quiz_max_context_chunks,
                max_output_tokens: options.quiz_max_output_tokens,
                temperature: options.quiz_temperature,
            },
        );

        Ok(Self {
            indexer,
            retriever,
            synthesizer,
            generator,
            aggregator: WeaknessAggregator::new(services.weaknesses),
            tracker: ProgressTracker::new(services.history),
            options,
        })
    }

    pub async fn index_document(&self, document: &Document) -> Result<IndexReport, EngineError> {
        self.indexer.index(document).await
    }

    pub async fn delete_document(&self, owner: &str, document_id: &str) -> Result<bool, EngineError> {
        self.indexer.delete(&CollectionKey::new(owner, document_id)).await
    }

    pub async fn ask(
        &self,
        owner: &str,
        document_id: &str,
        question: &str,
    ) -> Result<SynthesizedAnswer, EngineError> {
        let key = CollectionKey::new(owner, document_id);
        let retrieval = self
            .retriever
            .retrieve(&key, question, self.options.answer_top_k)
            .await?;
        self.synthesizer.synthesize(question, &retrieval).await
    }

    pub async fn generate_quiz(
        &self,
        owner: &str,
        document_id: &str,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Quiz, EngineError> {
        let key = CollectionKey::new(owner, document_id);
        let retrieval = self
            .retriever
            .retrieve(&key, topic, self.options.quiz_top_k)
            .await?;
        self.generator
            .generate(&retrieval, topic, difficulty, count)
            .await
    }

    pub fn grade_quiz(&self, quiz: &Quiz, answers: &SubmittedAnswers) -> GradingResult {
        grade(quiz, answers)
    }

    /// Grades the submission, records its misses against the quiz owner and
    /// adds the attempt to the owner's history.
    pub async fn submit_quiz(
        &self,
        quiz: &Quiz,
        answers: &SubmittedAnswers,
        submitted_at: DateTime<Utc>,
    ) -> Result<GradingResult, EngineError> {
        let result = grade(quiz, answers);
        self.aggregator
            .record_misses(&quiz.owner, &result.missed_concepts, submitted_at)
            .await?;
        self.tracker
            .record(&QuizAttempt::from_grading(quiz, &result, submitted_at))
            .await?;
        Ok(result)
    }

    pub async fn record_misses(
        &self,
        owner: &str,
        concept_tags: &[String],
        occurred_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.aggregator
            .record_misses(owner, concept_tags, occurred_at)
            .await
    }

    pub async fn list_weaknesses(&self, owner: &str) -> Result<Vec<WeaknessRecord>, EngineError> {
        self.aggregator.list_weaknesses(owner).await
    }

    pub async fn top_weaknesses(
        &self,
        owner: &str,
        limit: usize,
    ) -> Result<Vec<WeaknessRecord>, EngineError> {
        self.aggregator.top_weaknesses(owner, limit).await
    }

    pub async fn quiz_history(&self, owner: &str) -> Result<Vec<QuizAttempt>, EngineError> {
        self.tracker.history(owner).await
    }

    pub async fn progress(&self, owner: &str) -> Result<ProgressSummary, EngineError> {
        let weak_concepts = self.aggregator.list_weaknesses(owner).await?.len();
        self.tracker.progress(owner, weak_concepts).await
    }
}

fn validate_options(options: &EngineOptions) -> Result<(), EngineError> {
    let budgets = [
        ("answer_top_k", options.answer_top_k),
        ("answer_max_context_chunks", options.answer_max_context_chunks),
        ("quiz_top_k", options.quiz_top_k),
        ("quiz_max_context_chunks", options.quiz_max_context_chunks),
        ("quiz_max_questions", options.quiz_max_questions),
    ];
    match budgets.iter().find(|(_, value)| *value == 0) {
        Some((name, _)) => Err(EngineError::InvalidArgument(format!(
            "{name} must be at least 1"
        ))),
        None => Ok(()),
    }
}
