use docquiz_core::retriever::rank_matches;
use docquiz_core::{
    grade, CharacterNgramEmbedder, Chunk, ChunkingConfig, CollectionKey, Difficulty, Embedder,
    IndexedChunk, MemoryVectorStore, Question, Quiz, Retriever, ScoredChunk, SubmittedAnswers,
    TokenSpan, VectorIndex,
};
use chrono::Utc;
use proptest::prelude::*;
use std::sync::Arc;

fn chunk(index: u32, text: &str) -> Chunk {
    Chunk {
        chunk_id: format!("chunk-{index}"),
        chunk_index: index,
        span: TokenSpan {
            start: index as usize,
            end: index as usize + 1,
        },
        page_start: 1,
        page_end: 1,
        text: text.to_string(),
    }
}

/// (total tokens, window, overlap) with overlap < window.
fn chunking_case() -> impl Strategy<Value = (usize, usize, usize)> {
    (1usize..64).prop_flat_map(|window| (1usize..600, Just(window), 0..window))
}

fn quiz_of(questions: usize) -> Quiz {
    Quiz {
        quiz_id: "quiz".to_string(),
        owner: "alice".to_string(),
        document_id: "doc".to_string(),
        topic: "loops".to_string(),
        difficulty: Difficulty::Easy,
        questions: (0..questions)
            .map(|index| Question {
                id: index as u32 + 1,
                prompt: format!("Question {index}?"),
                options: [
                    "a".to_string(),
                    "b".to_string(),
                    "c".to_string(),
                    "d".to_string(),
                ],
                correct_option: "b".to_string(),
                explanation: "b is right".to_string(),
                concept: format!("concept-{}", index % 3),
                difficulty: Difficulty::Easy,
            })
            .collect(),
        created_at: Utc::now(),
    }
}

mod prop_chunking {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn spans_cover_every_token_with_fixed_overlap((total, window, overlap) in chunking_case()) {
            let config = ChunkingConfig {
                window_tokens: window,
                overlap_tokens: overlap,
            };
            let spans: Vec<TokenSpan> = config.spans(total).expect("config is valid").collect();

            prop_assert_eq!(spans[0].start, 0);
            prop_assert_eq!(spans[spans.len() - 1].end, total);
            for span in &spans {
                prop_assert!(!span.is_empty() && span.len() <= window);
            }
            for pair in spans.windows(2) {
                prop_assert_eq!(pair[0].len(), window);
                prop_assert_eq!(pair[0].end - pair[1].start, overlap);
            }

            let step = window - overlap;
            let expected = if total <= window {
                1
            } else {
                (total - window).div_ceil(step) + 1
            };
            prop_assert_eq!(spans.len(), expected);
        }
    }
}

mod prop_ranking {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn ranking_orders_by_score_then_chunk_index(
            scores in proptest::collection::vec(0u8..4, 1..40),
            k in 1usize..50,
        ) {
            // Few distinct scores force ties; indices run backwards so the
            // input is never already in order.
            let count = scores.len();
            let matches: Vec<ScoredChunk> = scores
                .iter()
                .enumerate()
                .map(|(position, score)| ScoredChunk {
                    chunk: chunk((count - 1 - position) as u32, "text"),
                    score: f32::from(*score) / 4.0,
                })
                .collect();

            let full = rank_matches(matches.clone(), count);
            let top = rank_matches(matches, k);

            prop_assert_eq!(top.len(), k.min(count));
            prop_assert_eq!(&top[..], &full[..top.len()]);
            for pair in full.windows(2) {
                let ordered = pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score
                        && pair[0].chunk.chunk_index < pair[1].chunk.chunk_index);
                prop_assert!(
                    ordered,
                    "({}, {}) ranked before ({}, {})",
                    pair[0].score,
                    pair[0].chunk.chunk_index,
                    pair[1].score,
                    pair[1].chunk.chunk_index
                );
            }
        }

        #[test]
        fn retrieval_returns_k_clamped_to_collection_size(
            texts in proptest::collection::vec("[a-z]{3,10}( [a-z]{3,10}){0,4}", 1..8),
            k in 0usize..20,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .expect("runtime");
            let returned = runtime.block_on(async {
                let embedder = Arc::new(CharacterNgramEmbedder::default());
                let store = Arc::new(MemoryVectorStore::new());
                let key = CollectionKey::new("alice", "doc");
                let entries = texts
                    .iter()
                    .enumerate()
                    .map(|(index, text)| IndexedChunk {
                        chunk: chunk(index as u32, text),
                        vector: embedder.embed_sync(text),
                    })
                    .collect();
                store
                    .replace_collection(&key, embedder.model_id(), entries)
                    .await
                    .expect("collection is stored");

                Retriever::new(embedder, store)
                    .retrieve(&key, "query words", k)
                    .await
                    .expect("retrieval succeeds")
                    .len()
            });

            prop_assert_eq!(returned, k.clamp(1, texts.len()));
        }
    }
}

mod prop_grading {
    use super::*;

    /// None: unanswered, Some(true): correct, Some(false): wrong.
    fn answer_plan() -> impl Strategy<Value = Vec<Option<bool>>> {
        proptest::collection::vec(
            prop_oneof![Just(None), Just(Some(true)), Just(Some(false))],
            1..30,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn grading_is_pure_and_rounds_half_up(plan in answer_plan()) {
            let quiz = quiz_of(plan.len());
            let answers: SubmittedAnswers = plan
                .iter()
                .enumerate()
                .filter_map(|(index, answer)| {
                    answer.map(|correct| {
                        let option = if correct { " b " } else { "c" };
                        (index as u32 + 1, option.to_string())
                    })
                })
                .collect();

            let first = grade(&quiz, &answers);
            let second = grade(&quiz, &answers);
            prop_assert_eq!(&first, &second);

            let correct = plan.iter().filter(|answer| **answer == Some(true)).count();
            let expected = (100.0 * correct as f64 / plan.len() as f64).round() as u32;
            prop_assert_eq!(first.correct_count, correct);
            prop_assert_eq!(first.total_questions, plan.len());
            prop_assert_eq!(first.score, expected);
            prop_assert_eq!(first.missed_concepts.len(), plan.len() - correct);
        }
    }
}
