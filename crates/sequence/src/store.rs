use async_trait::async_trait;
use shared::{
    domain::{ChallengeType, QuestionKey, QuestionType, TeamId},
    progress::TeamProgress,
};

use crate::error::StoreError;

/// A submission row waiting to be appended alongside a progress save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubmission {
    pub team_id: TeamId,
    pub question: QuestionKey,
    pub question_type: QuestionType,
    pub challenge_type: Option<ChallengeType>,
    pub original_question: String,
    pub user_solution: String,
    pub time_taken: i64,
    pub attempt_number: u8,
    pub is_correct: bool,
    pub score: i64,
}

/// Durable Round 2 ledger keyed by team.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn team_is_active(&self, team_id: TeamId) -> anyhow::Result<bool>;

    async fn load_progress(&self, team_id: TeamId) -> anyhow::Result<Option<TeamProgress>>;

    /// Inserts `progress` unless a record already exists and returns whatever
    /// is stored afterwards.
    async fn create_progress(&self, progress: &TeamProgress) -> anyhow::Result<TeamProgress>;

    /// Writes `progress` and appends `submission` in one transaction, only if
    /// the stored version still equals `progress.version`. Returns the new version.
    async fn save_progress(
        &self,
        progress: &TeamProgress,
        submission: &NewSubmission,
    ) -> Result<i64, StoreError>;

    /// Records that the team record now reflects round 2 completion.
    async fn mark_status_synced(&self, team_id: TeamId) -> anyhow::Result<()>;
}

/// Receives the Round 2 completion signal for the owning team record.
///
/// The signal is redelivered until the store marks the progress as synced, so
/// a repeat call for an already promoted team must not apply it twice.
#[async_trait]
pub trait TeamStatusSink: Send + Sync {
    async fn round_two_completed(&self, team_id: TeamId, round_two_score: i64)
        -> anyhow::Result<()>;
}
