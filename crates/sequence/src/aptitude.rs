use std::sync::Arc;

use shared::{
    domain::{QuestionKey, QuestionType},
    progress::{TeamProgress, MAX_APTITUDE_ATTEMPTS},
    protocol::AptitudeOutcome,
};

use crate::{bank::QuestionBank, error::SequenceError, store::NewSubmission};

pub struct AptitudeEvaluator {
    bank: Arc<QuestionBank>,
}

impl AptitudeEvaluator {
    pub fn new(bank: Arc<QuestionBank>) -> Self {
        Self { bank }
    }

    /// Applies one answer to `progress` in memory. Nothing is persisted here;
    /// on error `progress` is left untouched.
    pub fn evaluate(
        &self,
        progress: &mut TeamProgress,
        index: usize,
        selection: &str,
        time_taken: i64,
    ) -> Result<(AptitudeOutcome, NewSubmission), SequenceError> {
        let key = QuestionKey::aptitude(index).ok_or_else(|| {
            SequenceError::Validation(format!("aptitude index must be 0..=2, got {index}"))
        })?;
        progress.can_answer_aptitude(key)?;
        if time_taken < 0 {
            return Err(SequenceError::Validation(
                "time_taken must not be negative".into(),
            ));
        }

        let question = self.bank.aptitude_question(key).ok_or_else(|| {
            SequenceError::Store(anyhow::anyhow!("question bank has no entry for {key}"))
        })?;

        let attempt = progress.record_attempt(key);
        let correct = question.accepts(selection);
        let attempts_left = MAX_APTITUDE_ATTEMPTS.saturating_sub(attempt);

        let (score, unlocked_challenge) = if correct {
            let score = self.bank.scoring.aptitude_points;
            (score, progress.resolve_aptitude(key, score, time_taken))
        } else if attempts_left == 0 {
            (0, progress.resolve_aptitude(key, 0, time_taken))
        } else {
            progress.add_time(key, time_taken);
            (0, None)
        };

        let submission = NewSubmission {
            team_id: progress.team_id,
            question: key,
            question_type: QuestionType::Aptitude,
            challenge_type: None,
            original_question: question.prompt.clone(),
            user_solution: selection.to_string(),
            time_taken,
            attempt_number: attempt,
            is_correct: correct,
            score,
        };

        Ok((
            AptitudeOutcome {
                correct,
                attempts_left,
                unlocked_challenge,
            },
            submission,
        ))
    }
}
