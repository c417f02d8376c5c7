use crate::completion::{CompletionRequest, CompletionService};
use crate::models::{RetrievalResult, ScoredChunk, SynthesizedAnswer};
use crate::EngineError;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

const ANSWER_SYSTEM_PROMPT: &str = "You are a tutor answering questions about the student's own document.
Use only the numbered context chunks you are given.
Every claim must cite the chunk it comes from as [Chunk N]; cite several chunks as [Chunk 1, 3].
If the chunks do not contain the answer, say so plainly instead of guessing.
Explain clearly and keep the answer focused on the question.";

#[derive(Debug, Clone, Copy)]
pub struct AnswerConfig {
    pub max_context_chunks: usize,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

pub struct AnswerSynthesizer {
    completion: Arc<dyn CompletionService>,
    config: AnswerConfig,
}

impl AnswerSynthesizer {
    pub fn new(completion: Arc<dyn CompletionService>, config: AnswerConfig) -> Self {
        Self { completion, config }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        retrieval: &RetrievalResult,
    ) -> Result<SynthesizedAnswer, EngineError> {
        if question.trim().is_empty() {
            return Err(EngineError::InvalidArgument("question is empty".to_string()));
        }

        let context = context_window(retrieval, self.config.max_context_chunks);
        if context.is_empty() {
            return Err(EngineError::EmptyContext);
        }

        let request = CompletionRequest {
            system: ANSWER_SYSTEM_PROMPT.to_string(),
            user: format!(
                "Context from the document ({} chunks):\n\n{}\n\nQuestion: {}\n\nAnswer with [Chunk N] citations.",
                context.len(),
                numbered_context(context),
                question.trim()
            ),
            max_output_tokens: self.config.max_output_tokens,
            temperature: self.config.temperature,
        };

        let answer = self.completion.complete(&request).await?;
        let cited_chunk_ids = cited_numbers(&answer, context.len())
            .into_iter()
            .map(|number| context[number - 1].chunk.chunk_id.clone())
            .collect::<Vec<_>>();

        debug!(
            collection = %retrieval.key,
            context_chunks = context.len(),
            citations = cited_chunk_ids.len(),
            "synthesized answer"
        );

        Ok(SynthesizedAnswer {
            answer: answer.trim().to_string(),
            cited_chunk_ids,
            context_chunk_ids: context.iter().map(|hit| hit.chunk.chunk_id.clone()).collect(),
        })
    }
}

/// The leading `max_chunks` ranked matches; the budget is fixed, never resized.
pub fn context_window(retrieval: &RetrievalResult, max_chunks: usize) -> &[ScoredChunk] {
    let end = retrieval.matches.len().min(max_chunks);
    &retrieval.matches[..end]
}

pub fn numbered_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(position, hit)| format!("[Chunk {}]\n{}", position + 1, hit.chunk.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `[Chunk 2]`, `[Chunks 1 and 3]`, `[Chunk 1, Chunk 3]`.
const CITATION_PATTERN: &str =
    r"(?i)\[\s*chunks?\s+(\d+(?:\s*(?:,|and|&)\s*(?:chunks?\s+)?\d+)*)\s*\]";

static CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CITATION_PATTERN).expect("citation pattern compiles"));

/// 1-based chunk numbers cited in `answer`, in order of first mention.
/// Numbers outside `1..=available` are ignored.
pub fn cited_numbers(answer: &str, available: usize) -> Vec<usize> {
    let mut cited = Vec::new();
    for capture in CITATION.captures_iter(answer) {
        let Some(list) = capture.get(1) else {
            continue;
        };
        for number in list
            .as_str()
            .split(|c: char| !c.is_ascii_digit())
            .filter_map(|part| part.parse::<usize>().ok())
        {
            if (1..=available).contains(&number) && !cited.contains(&number) {
                cited.push(number);
            }
        }
    }
    cited
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, CollectionKey, TokenSpan};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedCompletion {
        reply: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl CompletionService for ScriptedCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, EngineError> {
            self.seen
                .lock()
                .map_err(|_| EngineError::CompletionService("poisoned".to_string()))?
                .push(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn retrieval(count: u32) -> RetrievalResult {
        RetrievalResult {
            key: CollectionKey::new("alice", "doc"),
            query: "q".to_string(),
            matches: (0..count)
                .map(|index| ScoredChunk {
                    chunk: Chunk {
                        chunk_id: format!("id-{index}"),
                        chunk_index: index,
                        span: TokenSpan { start: 0, end: 1 },
                        page_start: 1,
                        page_end: 1,
                        text: format!("chunk text {index}"),
                    },
                    score: 1.0 - index as f32 * 0.1,
                })
                .collect(),
        }
    }

    fn config(max_context_chunks: usize) -> AnswerConfig {
        AnswerConfig {
            max_context_chunks,
            max_output_tokens: 200,
            temperature: 0.0,
        }
    }

    #[test]
    fn citations_parse_lists_and_ignore_out_of_range() {
        let answer = "Loops repeat [Chunk 2]. Recursion [chunk 1, 3] and [Chunks 2 and 9]. [Chunk 0]";
        assert_eq!(cited_numbers(answer, 3), vec![2, 1, 3]);
        assert!(cited_numbers("no citations here", 3).is_empty());
        assert_eq!(cited_numbers("Loops [Chunk 1, Chunk 3].", 3), vec![1, 3]);
        assert_eq!(cited_numbers("See [chunk 2 and chunk 1]", 3), vec![2, 1]);
        assert_eq!(cited_numbers("[Chunk 1][Chunk 3]", 3), vec![1, 3]);
    }

    #[test]
    fn citation_pattern_compiles() {
        assert!(Regex::new(CITATION_PATTERN).is_ok());
    }

    #[tokio::test]
    async fn answer_maps_citations_to_chunk_ids() -> Result<(), EngineError> {
        let completion = Arc::new(ScriptedCompletion {
            reply: " Recursion calls itself [Chunk 2]. ".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let synthesizer = AnswerSynthesizer::new(completion.clone(), config(2));

        let answer = synthesizer.synthesize("What is recursion?", &retrieval(4)).await?;

        assert_eq!(answer.answer, "Recursion calls itself [Chunk 2].");
        assert_eq!(answer.cited_chunk_ids, vec!["id-1".to_string()]);
        assert_eq!(answer.context_chunk_ids, vec!["id-0".to_string(), "id-1".to_string()]);

        let seen = completion
            .seen
            .lock()
            .map_err(|_| EngineError::CompletionService("poisoned".to_string()))?;
        assert_eq!(seen.len(), 1);
        assert!(seen[0].user.contains("[Chunk 2]\nchunk text 1"));
        assert!(!seen[0].user.contains("chunk text 2"));
        Ok(())
    }

    #[tokio::test]
    async fn empty_retrieval_is_an_empty_context_error() {
        let synthesizer = AnswerSynthesizer::new(
            Arc::new(ScriptedCompletion {
                reply: String::new(),
                seen: Mutex::new(Vec::new()),
            }),
            config(5),
        );
        let result = synthesizer.synthesize("Anything?", &retrieval(0)).await;
        assert!(matches!(result, Err(EngineError::EmptyContext)));
    }
}
