use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use docquiz_core::{
    build_chunks, CharacterNgramEmbedder, ChunkingConfig, CollectionKey, CompletionRequest,
    CompletionService, Difficulty, Document, EngineError, EngineOptions, EngineServices,
    ErrorKind, Indexer, MemoryHistoryStore, MemoryVectorStore, MemoryWeaknessStore, Retriever,
    StudyEngine, SubmittedAnswers,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

/// Answers questions with a fixed citation and quizzes with a canned set
/// built from the requested question count.
struct TutorCompletion {
    requests: Mutex<Vec<CompletionRequest>>,
}

impl TutorCompletion {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionService for TutorCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, EngineError> {
        self.requests
            .lock()
            .map_err(|_| EngineError::CompletionService("poisoned".to_string()))?
            .push(request.clone());

        if !request.system.contains("multiple-choice") {
            return Ok("Loops repeat a block of code [Chunk 1].".to_string());
        }

        let concepts = ["loops", "loops", "recursion", "closures", "ownership"];
        let questions: Vec<_> = concepts
            .iter()
            .map(|concept| {
                json!({
                    "question": format!("Which statement about {concept} is right?"),
                    "options": ["first", "second", "third", "fourth"],
                    "correct_answer": "second",
                    "explanation": "See the document.",
                    "concept": concept,
                    "difficulty": "easy"
                })
            })
            .collect();
        Ok(json!(questions).to_string())
    }
}

fn paragraph(topic: &str, words: usize) -> String {
    (0..words)
        .map(|index| format!("{topic}{index}"))
        .collect::<Vec<_>>()
        .join(" ")
}

struct Harness {
    engine: StudyEngine,
    vectors: Arc<MemoryVectorStore>,
    embedder: Arc<CharacterNgramEmbedder>,
}

fn harness() -> Harness {
    let embedder = Arc::new(CharacterNgramEmbedder::default());
    let vectors = Arc::new(MemoryVectorStore::new());
    let options = EngineOptions {
        chunk_window_tokens: 20,
        chunk_overlap_tokens: 5,
        ..EngineOptions::default()
    };
    let engine = StudyEngine::new(
        EngineServices {
            embedder: embedder.clone(),
            vectors: vectors.clone(),
            completion: Arc::new(TutorCompletion::new()),
            weaknesses: Arc::new(MemoryWeaknessStore::new()),
            history: Arc::new(MemoryHistoryStore::new()),
        },
        options,
    )
    .expect("engine options are valid");

    Harness {
        engine,
        vectors,
        embedder,
    }
}

fn study_document(owner: &str) -> Document {
    Document::new(
        owner,
        "rust-book",
        vec![
            paragraph("loop", 20),
            paragraph("recursion", 15),
            paragraph("closure", 10),
        ],
    )
}

#[tokio::test]
async fn indexed_chunk_text_retrieves_itself_first() -> Result<(), EngineError> {
    let harness = harness();
    let report = harness.engine.index_document(&study_document("alice")).await?;
    assert_eq!(report.chunk_count, 3);

    let retriever = Retriever::new(harness.embedder.clone(), harness.vectors.clone());
    let key = CollectionKey::new("alice", "rust-book");
    let all = retriever.retrieve(&key, "loop0", 100).await?;
    assert_eq!(all.len(), 3);

    for expected in &all.matches {
        let result = retriever.retrieve(&key, &expected.chunk.text, 3).await?;
        assert_eq!(result.matches[0].chunk.chunk_id, expected.chunk.chunk_id);
        assert!(result
            .matches
            .iter()
            .all(|hit| hit.score <= result.matches[0].score));
    }
    Ok(())
}

#[tokio::test]
async fn retrieval_is_deterministic() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;

    let retriever = Retriever::new(harness.embedder.clone(), harness.vectors.clone());
    let key = CollectionKey::new("alice", "rust-book");
    let first = retriever.retrieve(&key, "recursion3 closure2", 3).await?;
    let second = retriever.retrieve(&key, "recursion3 closure2", 3).await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn owners_never_see_each_others_chunks() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;
    harness
        .engine
        .index_document(&Document::from_text("bob", "rust-book", &paragraph("trait", 8)))
        .await?;

    let retriever = Retriever::new(harness.embedder.clone(), harness.vectors.clone());
    let result = retriever
        .retrieve(&CollectionKey::new("bob", "rust-book"), "loop1 loop2", 10)
        .await?;

    assert_eq!(result.len(), 1);
    assert!(result.matches[0].chunk.text.starts_with("trait0"));
    Ok(())
}

#[tokio::test]
async fn ask_returns_cited_chunk_ids() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;

    let answer = harness
        .engine
        .ask("alice", "rust-book", "How do loop3 and loop4 work?")
        .await?;
    assert_eq!(answer.cited_chunk_ids.len(), 1);
    assert_eq!(answer.cited_chunk_ids[0], answer.context_chunk_ids[0]);
    Ok(())
}

#[tokio::test]
async fn missing_index_is_reported_by_kind() {
    let harness = harness();
    let error = harness
        .engine
        .ask("alice", "never-indexed", "anything?")
        .await
        .err();
    assert_eq!(
        error.map(|error| error.kind()),
        Some(ErrorKind::CollectionNotFound)
    );
}

#[tokio::test]
async fn quiz_submission_feeds_weaknesses() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;

    let quiz = harness
        .engine
        .generate_quiz("alice", "rust-book", "loops", Difficulty::Easy, 5)
        .await?;
    assert_eq!(quiz.questions.len(), 5);
    assert_eq!(
        quiz.questions.iter().map(|q| q.id).collect::<Vec<_>>(),
        vec![1, 2, 3, 4, 5]
    );

    let answers = SubmittedAnswers::from([
        (1, "second".to_string()),
        (3, "second".to_string()),
        (5, "second".to_string()),
    ]);
    let graded = harness.engine.grade_quiz(&quiz, &answers);
    assert_eq!(graded.score, 60);
    assert_eq!(graded, harness.engine.grade_quiz(&quiz, &answers));

    let first_day = Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap();
    harness
        .engine
        .submit_quiz(&quiz, &SubmittedAnswers::new(), first_day)
        .await?;

    let records = harness.engine.list_weaknesses("alice").await?;
    let summary: Vec<(&str, u64)> = records
        .iter()
        .map(|record| (record.concept.as_str(), record.miss_count))
        .collect();
    assert_eq!(summary[0], ("loops", 2));
    assert_eq!(summary.len(), 4);

    let history = harness.engine.quiz_history("alice").await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].quiz_id, quiz.quiz_id);
    assert_eq!(history[0].completed_at, first_day);

    let progress = harness.engine.progress("alice").await?;
    assert_eq!(progress.total_quizzes, 1);
    assert_eq!(progress.average_score, 0.0);
    assert_eq!(progress.weak_concept_count, 4);
    assert_eq!(progress.last_completed_at, Some(first_day));
    Ok(())
}

#[tokio::test]
async fn grading_alone_leaves_history_untouched() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;
    let quiz = harness
        .engine
        .generate_quiz("alice", "rust-book", "loops", Difficulty::Easy, 5)
        .await?;

    harness.engine.grade_quiz(&quiz, &SubmittedAnswers::new());
    assert!(harness.engine.quiz_history("alice").await?.is_empty());
    assert_eq!(harness.engine.progress("alice").await?.total_quizzes, 0);
    Ok(())
}

#[tokio::test]
async fn deleting_a_document_removes_its_index() -> Result<(), EngineError> {
    let harness = harness();
    harness.engine.index_document(&study_document("alice")).await?;

    assert!(harness.engine.delete_document("alice", "rust-book").await?);
    assert!(!harness.engine.delete_document("alice", "rust-book").await?);

    let error = harness
        .engine
        .generate_quiz("alice", "rust-book", "loops", Difficulty::Easy, 3)
        .await
        .err();
    assert!(matches!(error, Some(EngineError::CollectionNotFound { .. })));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_a_half_replaced_collection() -> Result<(), EngineError> {
    let embedder = Arc::new(CharacterNgramEmbedder::default());
    let vectors = Arc::new(MemoryVectorStore::new());
    let chunking = ChunkingConfig {
        window_tokens: 20,
        overlap_tokens: 5,
    };
    let indexer = Arc::new(Indexer::new(
        embedder.clone(),
        vectors.clone(),
        chunking,
        2,
    )?);
    let retriever = Arc::new(Retriever::new(embedder.clone(), vectors.clone()));

    let first = study_document("alice");
    let second = Document::new("alice", "rust-book", vec![paragraph("iterator", 80)]);
    let ids_of = |document: &Document| -> Result<BTreeSet<String>, EngineError> {
        Ok(build_chunks(document, chunking)?
            .into_iter()
            .map(|chunk| chunk.chunk_id)
            .collect())
    };
    let first_ids = ids_of(&first)?;
    let second_ids = ids_of(&second)?;
    assert_eq!((first_ids.len(), second_ids.len()), (3, 5));

    indexer.index(&first).await?;

    let writer = tokio::spawn({
        let indexer = indexer.clone();
        async move {
            for round in 0..40 {
                let document = if round % 2 == 0 { &second } else { &first };
                indexer.index(document).await?;
                tokio::task::yield_now().await;
            }
            Ok::<_, EngineError>(())
        }
    });

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let retriever = retriever.clone();
            let first_ids = first_ids.clone();
            let second_ids = second_ids.clone();
            tokio::spawn(async move {
                let key = CollectionKey::new("alice", "rust-book");
                for _ in 0..50 {
                    let result = retriever.retrieve(&key, "loop3 iterator7", 100).await?;
                    let seen: BTreeSet<String> = result
                        .matches
                        .into_iter()
                        .map(|hit| hit.chunk.chunk_id)
                        .collect();
                    assert!(
                        seen == first_ids || seen == second_ids,
                        "mixed generations: {seen:?}"
                    );
                    tokio::task::yield_now().await;
                }
                Ok::<_, EngineError>(())
            })
        })
        .collect();

    writer.await.expect("writer task panicked")?;
    for reader in readers {
        reader.await.expect("reader task panicked")?;
    }
    Ok(())
}
