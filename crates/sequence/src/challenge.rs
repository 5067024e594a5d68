use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChallengeType, QuestionType},
    progress::TeamProgress,
    protocol::ChallengeOutcome,
};
use tracing::error;

use crate::{
    bank::{ChallengeGrader, QuestionBank},
    error::SequenceError,
    store::NewSubmission,
};

pub const DEFAULT_MAX_CODE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct ChallengeEvaluation {
    pub outcome: ChallengeOutcome,
    pub submission: NewSubmission,
    /// True only on the submission that closed the round for this team.
    pub completed_round: bool,
}

pub struct ChallengeEvaluator {
    bank: Arc<QuestionBank>,
    grader: Arc<dyn ChallengeGrader>,
    max_code_bytes: usize,
}

impl ChallengeEvaluator {
    pub fn new(bank: Arc<QuestionBank>, grader: Arc<dyn ChallengeGrader>) -> Self {
        Self {
            bank,
            grader,
            max_code_bytes: DEFAULT_MAX_CODE_BYTES,
        }
    }

    pub fn with_max_code_bytes(mut self, max_code_bytes: usize) -> Self {
        self.max_code_bytes = max_code_bytes;
        self
    }

    /// Grades a submission and applies it to `progress`. The grader runs
    /// before any mutation, so a grading failure leaves `progress` untouched.
    pub async fn evaluate(
        &self,
        progress: &mut TeamProgress,
        challenge: ChallengeType,
        code: &str,
        time_taken: i64,
        now: DateTime<Utc>,
    ) -> Result<ChallengeEvaluation, SequenceError> {
        progress.can_submit_challenge(challenge)?;
        if time_taken < 0 {
            return Err(SequenceError::Validation(
                "time_taken must not be negative".into(),
            ));
        }
        if code.len() > self.max_code_bytes {
            return Err(SequenceError::Validation(format!(
                "submission exceeds {} bytes",
                self.max_code_bytes
            )));
        }

        let grade = self.grader.grade(challenge, code).await.map_err(|err| {
            error!(
                team_id = %progress.team_id,
                %challenge,
                error = %err,
                "challenge grader failed"
            );
            SequenceError::Grader(err)
        })?;

        let unlocked_next = progress.resolve_challenge(challenge, grade.score, time_taken);
        let completed_round = progress.finish_if_complete(now);

        let submission = NewSubmission {
            team_id: progress.team_id,
            question: challenge.question_key(),
            question_type: QuestionType::from(challenge),
            challenge_type: Some(challenge),
            original_question: self.bank.challenge(challenge).snippet.clone(),
            user_solution: code.to_string(),
            time_taken,
            attempt_number: 1,
            is_correct: grade.passed,
            score: grade.score,
        };

        Ok(ChallengeEvaluation {
            outcome: ChallengeOutcome {
                is_quiz_completed: progress.is_quiz_completed,
                score: grade.score,
                unlocked_next,
            },
            submission,
            completed_round,
        })
    }
}
