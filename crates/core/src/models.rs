use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Scope of one indexed document. Every read and write against the vector
/// store goes through this key, so owners never see each other's chunks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub owner: String,
    pub document_id: String,
}

impl CollectionKey {
    pub fn new(owner: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            document_id: document_id.into(),
        }
    }

    /// Hex SHA-256 of owner and document id; safe as a file or collection name.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.owner.as_bytes());
        hasher.update([0]);
        hasher.update(self.document_id.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.document_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub owner: String,
    pub document_id: String,
    pub pages: Vec<String>,
}

impl Document {
    pub fn new(owner: impl Into<String>, document_id: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            owner: owner.into(),
            document_id: document_id.into(),
            pages,
        }
    }

    pub fn from_text(owner: impl Into<String>, document_id: impl Into<String>, text: &str) -> Self {
        Self::new(owner, document_id, vec![text.to_string()])
    }

    pub fn key(&self) -> CollectionKey {
        CollectionKey::new(self.owner.clone(), self.document_id.clone())
    }
}

/// Half-open `[start, end)` range in a document's token stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenSpan {
    pub start: usize,
    pub end: usize,
}

impl TokenSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub chunk_index: u32,
    pub span: TokenSpan,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub size: usize,
    pub dimensions: usize,
    pub embedder_id: String,
}

/// Ranked output of a retrieval: descending score, ties by ascending chunk index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub key: CollectionKey,
    pub query: String,
    pub matches: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub key: CollectionKey,
    pub chunk_count: usize,
    pub token_count: usize,
    pub checksum: String,
    pub indexed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub answer: String,
    pub cited_chunk_ids: Vec<String>,
    pub context_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown difficulty {other:?}, expected easy, medium or hard"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub prompt: String,
    pub options: [String; 4],
    pub correct_option: String,
    pub explanation: String,
    pub concept: String,
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub quiz_id: String,
    pub owner: String,
    pub document_id: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub questions: Vec<Question>,
    pub created_at: DateTime<Utc>,
}

/// Submitted answers keyed by question id.
pub type SubmittedAnswers = BTreeMap<u32, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: u32,
    pub submitted: Option<String>,
    pub correct_option: String,
    pub correct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    pub quiz_id: String,
    pub outcomes: Vec<QuestionOutcome>,
    pub correct_count: usize,
    pub total_questions: usize,
    pub score: u32,
    pub missed_concepts: Vec<String>,
}

/// One graded quiz submission, kept for the owner's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizAttempt {
    pub quiz_id: String,
    pub owner: String,
    pub document_id: String,
    pub topic: String,
    pub difficulty: Difficulty,
    pub score: u32,
    pub correct_count: usize,
    pub total_questions: usize,
    pub completed_at: DateTime<Utc>,
}

impl QuizAttempt {
    pub fn from_grading(quiz: &Quiz, result: &GradingResult, completed_at: DateTime<Utc>) -> Self {
        Self {
            quiz_id: quiz.quiz_id.clone(),
            owner: quiz.owner.clone(),
            document_id: quiz.document_id.clone(),
            topic: quiz.topic.clone(),
            difficulty: quiz.difficulty,
            score: result.score,
            correct_count: result.correct_count,
            total_questions: result.total_questions,
            completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub owner: String,
    pub total_quizzes: usize,
    /// Mean attempt score; 0 when nothing has been graded yet.
    pub average_score: f64,
    pub weak_concept_count: usize,
    pub last_completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeaknessRecord {
    pub owner: String,
    pub concept: String,
    pub miss_count: u64,
    pub last_miss_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub chunk_window_tokens: usize,
    pub chunk_overlap_tokens: usize,
    pub embedding_batch_size: usize,
    pub answer_top_k: usize,
    pub answer_max_context_chunks: usize,
    pub answer_max_output_tokens: u32,
    pub answer_temperature: f32,
    pub quiz_top_k: usize,
    pub quiz_max_context_chunks: usize,
    pub quiz_max_questions: usize,
    pub quiz_max_output_tokens: u32,
    pub quiz_temperature: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            chunk_window_tokens: 512,
            chunk_overlap_tokens: 50,
            embedding_batch_size: 32,
            answer_top_k: 5,
            answer_max_context_chunks: 5,
            answer_max_output_tokens: 800,
            answer_temperature: 0.5,
            quiz_top_k: 10,
            quiz_max_context_chunks: 10,
            quiz_max_questions: 20,
            quiz_max_output_tokens: 2_000,
            quiz_temperature: 0.7,
        }
    }
}
