//! Multiple-choice quiz generation from retrieved document context.
//!
//! The completion service is asked for a JSON array of questions. Its output
//! is parsed into [`RawQuestion`]s and checked against the quiz shape: the
//! requested number of questions, four distinct options each, one correct
//! option drawn from those four, and no catch-all options. A malformed reply
//! earns exactly one corrective retry; a second failure is terminal.

use crate::answer::{context_window, numbered_context};
use crate::completion::{CompletionRequest, CompletionService};
use crate::models::{Difficulty, Question, Quiz, RetrievalResult};
use crate::EngineError;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

const OPTIONS_PER_QUESTION: usize = 4;

const DEGENERATE_OPTIONS: [&str; 6] = [
    "all of the above",
    "none of the above",
    "both a and b",
    "all of these",
    "none of these",
    "all the above",
];

#[derive(Debug, Clone, Copy)]
pub struct QuizConfig {
    pub max_questions: usize,
    pub max_context_chunks: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

pub struct QuizGenerator {
    completion: Arc<dyn CompletionService>,
    config: QuizConfig,
}

/// One question exactly as the model returned it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    pub concept: String,
    #[serde(default)]
    pub difficulty: Option<String>,
}

impl QuizGenerator {
    pub fn new(completion: Arc<dyn CompletionService>, config: QuizConfig) -> Self {
        Self { completion, config }
    }

    pub fn clamp_count(&self, count: usize) -> usize {
        count.clamp(1, self.config.max_questions.max(1))
    }

    pub async fn generate(
        &self,
        retrieval: &RetrievalResult,
        topic: &str,
        difficulty: Difficulty,
        count: usize,
    ) -> Result<Quiz, EngineError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(EngineError::InvalidArgument("quiz topic is empty".to_string()));
        }

        let context = context_window(retrieval, self.config.max_context_chunks);
        if context.is_empty() {
            return Err(EngineError::EmptyContext);
        }

        let count = self.clamp_count(count);
        let mut request = CompletionRequest {
            system: system_prompt(difficulty, count),
            user: user_prompt(&numbered_context(context), topic, difficulty, count),
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        let first = self.completion.complete(&request).await?;
        let questions = match parse_questions(&first, count, difficulty) {
            Ok(questions) => questions,
            Err(problem) => {
                warn!(collection = %retrieval.key, %problem, "quiz output rejected, retrying once");
                request.user = corrective_prompt(&request.user, &problem, count);
                request.temperature = (request.temperature * 0.5).min(0.3);

                let second = self.completion.complete(&request).await?;
                parse_questions(&second, count, difficulty).map_err(|problem| {
                    EngineError::QuizGeneration {
                        attempts: 2,
                        details: problem,
                    }
                })?
            }
        };

        let quiz = Quiz {
            quiz_id: Uuid::new_v4().to_string(),
            owner: retrieval.key.owner.clone(),
            document_id: retrieval.key.document_id.clone(),
            topic: topic.to_string(),
            difficulty,
            questions,
            created_at: Utc::now(),
        };

        info!(
            quiz_id = %quiz.quiz_id,
            collection = %retrieval.key,
            questions = quiz.questions.len(),
            difficulty = %difficulty,
            "quiz generated"
        );

        Ok(quiz)
    }
}

fn difficulty_guidelines(difficulty: Difficulty) -> &'static str {
    match difficulty {
        Difficulty::Easy => {
            "- Ask for facts, definitions and simple ideas stated directly in the text.\n\
             - The answer should be findable in a single passage."
        }
        Difficulty::Medium => {
            "- Ask for understanding and application, not just recall.\n\
             - Combine related ideas or require a small inference from the text."
        }
        Difficulty::Hard => {
            "- Ask conceptual and analytical questions.\n\
             - Require comparing, contrasting or applying ideas to new situations."
        }
    }
}

fn system_prompt(difficulty: Difficulty, count: usize) -> String {
    format!(
        "You write multiple-choice quizzes from a student's document.\n\
         Write exactly {count} questions at {level} difficulty.\n\n\
         Difficulty guidelines:\n{guidelines}\n\n\
         Rules:\n\
         - Base every question on facts in the provided context.\n\
         - Give exactly 4 distinct, plausible options per question.\n\
         - Exactly one option is correct; correct_answer must repeat that option's text verbatim.\n\
         - Never use \"all of the above\" or \"none of the above\" style options.\n\
         - Explain briefly why the correct answer is right.\n\
         - Tag each question with the specific concept it tests.\n\
         Return only a JSON array, with no surrounding text.",
        level = difficulty.as_str().to_uppercase(),
        guidelines = difficulty_guidelines(difficulty),
    )
}

fn user_prompt(context: &str, topic: &str, difficulty: Difficulty, count: usize) -> String {
    format!(
        "Topic: {topic}\n\n\
         Context:\n{context}\n\n\
         Write {count} {difficulty} questions in this JSON format:\n\
         [\n  {{\n    \"question\": \"Question text?\",\n    \"options\": [\"Option A\", \"Option B\", \"Option C\", \"Option D\"],\n    \"correct_answer\": \"Option A\",\n    \"explanation\": \"Why this is correct\",\n    \"concept\": \"Concept being tested\",\n    \"difficulty\": \"{difficulty}\"\n  }}\n]"
    )
}

fn corrective_prompt(original: &str, problem: &str, count: usize) -> String {
    format!(
        "{original}\n\n\
         Your previous reply was rejected: {problem}.\n\
         Reply again with ONLY a JSON array of exactly {count} objects. Each object needs the keys \
         question, options (exactly 4 distinct strings), correct_answer (identical to one option), \
         explanation, concept and difficulty. No markdown, no commentary."
    )
}

/// Body of the outermost Markdown code fence: from the line after the first
/// fence up to the last closing fence. Text without a fence comes back trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    let body_start = after_fence.find('\n').map(|index| index + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// The reply as-is when it is already a JSON array, otherwise the body of its
/// code fence. Fences inside JSON strings never trigger stripping.
fn decode_reply(raw: &str) -> Result<Vec<RawQuestion>, String> {
    let direct = serde_json::from_str(raw.trim());
    let direct_error = match direct {
        Ok(parsed) => return Ok(parsed),
        Err(error) => error,
    };

    let fenced = strip_code_fence(raw);
    if fenced == raw.trim() {
        return Err(format!("output is not a question array: {direct_error}"));
    }
    serde_json::from_str(fenced).map_err(|error| format!("output is not a question array: {error}"))
}

/// Parses and validates a completion into exactly `count` questions with ids
/// `1..=count`. Returns a description of the first shape violation found.
pub fn parse_questions(
    raw: &str,
    count: usize,
    difficulty: Difficulty,
) -> Result<Vec<Question>, String> {
    let parsed = decode_reply(raw)?;

    if parsed.len() != count {
        return Err(format!("expected {count} questions, got {}", parsed.len()));
    }

    parsed
        .into_iter()
        .enumerate()
        .map(|(position, raw)| {
            let id = position as u32 + 1;
            validate_question(raw, id, difficulty).map_err(|problem| format!("question {id}: {problem}"))
        })
        .collect()
}

fn validate_question(raw: RawQuestion, id: u32, difficulty: Difficulty) -> Result<Question, String> {
    let prompt = required(&raw.question, "question")?;
    let explanation = required(&raw.explanation, "explanation")?;
    let concept = required(&raw.concept, "concept")?;

    if raw.options.len() != OPTIONS_PER_QUESTION {
        return Err(format!(
            "expected {OPTIONS_PER_QUESTION} options, got {}",
            raw.options.len()
        ));
    }

    let options: Vec<String> = raw.options.iter().map(|option| option.trim().to_string()).collect();
    let mut seen = HashSet::new();
    for option in &options {
        if option.is_empty() {
            return Err("options must not be empty".to_string());
        }
        let folded = option.to_lowercase();
        if DEGENERATE_OPTIONS
            .iter()
            .any(|banned| folded.trim_end_matches('.') == *banned)
        {
            return Err(format!("option {option:?} is not allowed"));
        }
        if !seen.insert(folded) {
            return Err(format!("option {option:?} is repeated"));
        }
    }

    let correct_option = raw.correct_answer.trim().to_string();
    if !options.contains(&correct_option) {
        return Err(format!(
            "correct_answer {correct_option:?} is not one of the options"
        ));
    }

    if let Some(stated) = raw.difficulty.as_deref().filter(|value| !value.trim().is_empty()) {
        let stated: Difficulty = stated
            .parse()
            .map_err(|_| format!("unknown difficulty {stated:?}"))?;
        if stated != difficulty {
            return Err(format!("difficulty {stated} does not match requested {difficulty}"));
        }
    }

    let options: [String; OPTIONS_PER_QUESTION] = options
        .try_into()
        .map_err(|_| "expected 4 options".to_string())?;

    Ok(Question {
        id,
        prompt,
        options,
        correct_option,
        explanation,
        concept,
        difficulty,
    })
}

fn required(value: &str, field: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(format!("{field} is empty"))
    } else {
        Ok(trimmed.to_string())
    }
}
