use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{
        ChallengeType, CodedRound, CompetitionStatus, QuestionKey, QuestionType, SubmissionId,
        TeamId, TeamSummary,
    },
    error::ApiError,
    progress::{PerQuestion, QuestionState, TeamProgress},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitAptitudeRequest {
    pub team_id: TeamId,
    /// Zero-based aptitude index (0 => q1).
    #[serde(alias = "question_index")]
    pub step: usize,
    pub selected: String,
    #[serde(default)]
    pub time_taken: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AptitudeOutcome {
    pub correct: bool,
    pub attempts_left: u8,
    #[serde(default)]
    pub unlocked_challenge: Option<ChallengeType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitChallengeRequest {
    pub team_id: TeamId,
    pub challenge_type: ChallengeType,
    pub code: String,
    pub time_taken: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub is_quiz_completed: bool,
    pub score: i64,
    #[serde(default)]
    pub unlocked_next: Option<QuestionKey>,
}

/// Read model for progress polling: the stored ledger plus the derived
/// per-question state so renderers never recompute the unlock rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub progress: TeamProgress,
    pub question_states: PerQuestion<QuestionState>,
}

impl From<TeamProgress> for ProgressView {
    fn from(progress: TeamProgress) -> Self {
        let question_states = PerQuestion {
            q1: progress.question_state(QuestionKey::Q1),
            q2: progress.question_state(QuestionKey::Q2),
            q3: progress.question_state(QuestionKey::Q3),
            q4: progress.question_state(QuestionKey::Q4),
            q5: progress.question_state(QuestionKey::Q5),
            q6: progress.question_state(QuestionKey::Q6),
        };
        Self {
            progress,
            question_states,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub key: QuestionKey,
    pub question_type: QuestionType,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: SubmissionId,
    pub team_id: TeamId,
    pub question_number: u8,
    pub question_type: QuestionType,
    #[serde(default)]
    pub challenge_type: Option<ChallengeType>,
    pub original_question: String,
    pub user_solution: String,
    pub time_taken: i64,
    pub attempt_number: u8,
    pub is_correct: bool,
    pub score: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRoundCodeRequest {
    pub team_id: TeamId,
    pub round: CodedRound,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRoundCodeResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRoundCodeRequest {
    pub round: CodedRound,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRoundRequest {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundCodeInfo {
    pub round: CodedRound,
    pub code: String,
    pub is_active: bool,
    pub usage_count: i64,
    pub completion_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundCodesResponse {
    pub round2: Option<RoundCodeInfo>,
    pub round3: Option<RoundCodeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetRoundCodeResponse {
    pub round: CodedRound,
    pub deactivated_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoresUpdate {
    #[serde(default)]
    pub round1: Option<i64>,
    #[serde(default)]
    pub round2: Option<i64>,
    #[serde(default)]
    pub round3: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTeamStatusRequest {
    #[serde(default)]
    pub competition_status: Option<String>,
    #[serde(default)]
    pub scores: Option<ScoresUpdate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitionStats {
    pub total_teams: i64,
    pub registered_teams: i64,
    pub round1_completed: i64,
    pub round2_completed: i64,
    pub round3_completed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveRoundCodes {
    pub round2: Option<String>,
    pub round3: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: CompetitionStats,
    pub round_codes: ActiveRoundCodes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTwoTeamRow {
    pub team_id: TeamId,
    pub team_name: String,
    pub total_score: i64,
    pub total_time_taken: i64,
    pub scores: PerQuestion<i64>,
    pub completed_count: usize,
    pub is_quiz_completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundTwoStatistics {
    pub total_participants: usize,
    pub completed_teams: usize,
    pub average_score: f64,
    pub highest_score: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundTwoOverview {
    pub teams: Vec<RoundTwoTeamRow>,
    pub statistics: RoundTwoStatistics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceResponse {
    pub round: u8,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamResponse {
    pub team: TeamSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    ProgressUpdated {
        team_id: TeamId,
        question: QuestionKey,
    },
    QuizCompleted {
        team_id: TeamId,
    },
    TeamStatusChanged {
        team_id: TeamId,
        status: CompetitionStatus,
    },
    RoundCodeChanged {
        round: CodedRound,
        active: bool,
    },
    ResultsAnnounced {
        round: u8,
    },
    Error(ApiError),
}
