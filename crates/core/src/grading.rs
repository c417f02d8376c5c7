use crate::models::{GradingResult, QuestionOutcome, Quiz, SubmittedAnswers};

/// Grades `answers` against `quiz`. Unanswered questions count as incorrect
/// and stay in the denominator. Pure: equal inputs give equal results.
pub fn grade(quiz: &Quiz, answers: &SubmittedAnswers) -> GradingResult {
    let outcomes: Vec<QuestionOutcome> = quiz
        .questions
        .iter()
        .map(|question| {
            let submitted = answers.get(&question.id).map(|answer| answer.trim().to_string());
            let correct = submitted
                .as_deref()
                .is_some_and(|answer| answer == question.correct_option.trim());
            QuestionOutcome {
                question_id: question.id,
                submitted,
                correct_option: question.correct_option.clone(),
                correct,
            }
        })
        .collect();

    let missed_concepts = quiz
        .questions
        .iter()
        .zip(outcomes.iter())
        .filter(|(_, outcome)| !outcome.correct)
        .map(|(question, _)| question.concept.clone())
        .collect();

    let correct_count = outcomes.iter().filter(|outcome| outcome.correct).count();
    let total_questions = outcomes.len();

    GradingResult {
        quiz_id: quiz.quiz_id.clone(),
        outcomes,
        correct_count,
        total_questions,
        score: percentage(correct_count, total_questions),
        missed_concepts,
    }
}

/// Whole-number percentage, rounding halves up. An empty quiz scores 0.
pub fn percentage(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((correct as u64 * 200 + total as u64) / (total as u64 * 2)) as u32
}
