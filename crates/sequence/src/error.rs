use shared::{
    domain::{QuestionKey, TeamId},
    progress::Blocked,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("progress for team {0} was modified concurrently")]
    Conflict(TeamId),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("invalid state: {0}")]
    InvalidState(Blocked),
    #[error("question {0} has no attempts left")]
    AttemptsExhausted(QuestionKey),
    #[error("team {0} not found")]
    NotFound(TeamId),
    #[error("progress for team {0} was modified concurrently")]
    StoreConflict(TeamId),
    #[error("{0}")]
    Validation(String),
    #[error("challenge grading failed: {0}")]
    Grader(anyhow::Error),
    #[error("round 2 completion was saved but the team record was not updated: {0}")]
    StatusSync(anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<Blocked> for SequenceError {
    fn from(value: Blocked) -> Self {
        match value {
            Blocked::AttemptsExhausted(key) => SequenceError::AttemptsExhausted(key),
            other => SequenceError::InvalidState(other),
        }
    }
}

impl From<StoreError> for SequenceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Conflict(team_id) => SequenceError::StoreConflict(team_id),
            StoreError::Backend(err) => SequenceError::Store(err),
        }
    }
}
