use crate::models::{ProgressSummary, QuizAttempt};
use crate::traits::HistoryStore;
use crate::EngineError;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::info;

pub struct ProgressTracker {
    store: Arc<dyn HistoryStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, attempt: &QuizAttempt) -> Result<(), EngineError> {
        self.store.append(attempt).await?;
        info!(
            owner = %attempt.owner,
            quiz_id = %attempt.quiz_id,
            score = attempt.score,
            "recorded quiz attempt"
        );
        Ok(())
    }

    /// Attempts of `owner`, most recently completed first.
    pub async fn history(&self, owner: &str) -> Result<Vec<QuizAttempt>, EngineError> {
        let mut attempts = self.store.list(owner).await?;
        attempts.sort_by(newest_first);
        Ok(attempts)
    }

    /// Totals over the owner's history. `weak_concept_count` comes from the
    /// weakness ledger, which this tracker does not own.
    pub async fn progress(
        &self,
        owner: &str,
        weak_concept_count: usize,
    ) -> Result<ProgressSummary, EngineError> {
        let attempts = self.history(owner).await?;
        Ok(summarize(owner, &attempts, weak_concept_count))
    }
}

fn newest_first(left: &QuizAttempt, right: &QuizAttempt) -> Ordering {
    right
        .completed_at
        .cmp(&left.completed_at)
        .then_with(|| left.quiz_id.cmp(&right.quiz_id))
}

/// `attempts` must already be newest first.
fn summarize(owner: &str, attempts: &[QuizAttempt], weak_concept_count: usize) -> ProgressSummary {
    let total_quizzes = attempts.len();
    let average_score = if total_quizzes == 0 {
        0.0
    } else {
        attempts.iter().map(|attempt| f64::from(attempt.score)).sum::<f64>() / total_quizzes as f64
    };

    ProgressSummary {
        owner: owner.to_string(),
        total_quizzes,
        average_score,
        weak_concept_count,
        last_completed_at: attempts.first().map(|attempt| attempt.completed_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Difficulty;
    use crate::stores::MemoryHistoryStore;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, day, 9, 0, 0).unwrap()
    }

    fn attempt(quiz_id: &str, score: u32, day: u32) -> QuizAttempt {
        QuizAttempt {
            quiz_id: quiz_id.to_string(),
            owner: "alice".to_string(),
            document_id: "notes".to_string(),
            topic: "recursion".to_string(),
            difficulty: Difficulty::Medium,
            score,
            correct_count: score as usize / 20,
            total_questions: 5,
            completed_at: at(day),
        }
    }

    #[tokio::test]
    async fn history_is_newest_first() -> Result<(), EngineError> {
        let tracker = ProgressTracker::new(Arc::new(MemoryHistoryStore::new()));
        tracker.record(&attempt("first", 40, 1)).await?;
        tracker.record(&attempt("third", 100, 9)).await?;
        tracker.record(&attempt("second", 60, 3)).await?;

        let order: Vec<String> = tracker
            .history("alice")
            .await?
            .into_iter()
            .map(|attempt| attempt.quiz_id)
            .collect();
        assert_eq!(order, vec!["third", "second", "first"]);
        Ok(())
    }

    #[tokio::test]
    async fn progress_averages_scores() -> Result<(), EngineError> {
        let tracker = ProgressTracker::new(Arc::new(MemoryHistoryStore::new()));
        tracker.record(&attempt("a", 40, 1)).await?;
        tracker.record(&attempt("b", 60, 2)).await?;
        tracker.record(&attempt("c", 100, 3)).await?;

        let progress = tracker.progress("alice", 4).await?;
        assert_eq!(progress.total_quizzes, 3);
        assert!((progress.average_score - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(progress.weak_concept_count, 4);
        assert_eq!(progress.last_completed_at, Some(at(3)));
        Ok(())
    }

    #[tokio::test]
    async fn empty_history_has_zero_average() -> Result<(), EngineError> {
        let tracker = ProgressTracker::new(Arc::new(MemoryHistoryStore::new()));
        let progress = tracker.progress("nobody", 0).await?;
        assert_eq!(progress.total_quizzes, 0);
        assert_eq!(progress.average_score, 0.0);
        assert_eq!(progress.last_completed_at, None);
        Ok(())
    }
}
