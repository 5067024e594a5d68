use std::sync::Arc;

use sequence::{
    AptitudeEvaluator, ChallengeEvaluator, QuestionBank, ReferenceGrader, SequenceController,
    SequenceError,
};
use shared::{
    domain::{CodedRound, CompetitionStatus, QuestionKey, TeamId, TeamSummary},
    error::{ApiError, ErrorCode},
    protocol::{
        AnnounceResponse, AptitudeOutcome, ChallengeOutcome, ProgressView, PublicQuestion,
        ResetRoundCodeResponse, RoundCodeInfo, RoundCodesResponse, RoundTwoOverview,
        RoundTwoStatistics, RoundTwoTeamRow, ServerEvent, StatsResponse, SubmissionRecord,
        SubmitAptitudeRequest, SubmitChallengeRequest, UpdateTeamStatusRequest,
        VerifyRoundCodeRequest, VerifyRoundCodeResponse,
    },
};
use storage::Storage;
use tracing::{error, info};

pub mod auth;

pub const MAX_ROUND_CODE_CHARS: usize = 64;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub controller: Arc<SequenceController>,
    pub bank: Arc<QuestionBank>,
}

impl ApiContext {
    /// Wires the sequencing controller over `storage`, which serves as both
    /// the progress store and the team status sink.
    pub fn new(storage: Storage, bank: Arc<QuestionBank>, max_code_bytes: usize) -> Self {
        let store = Arc::new(storage.clone());
        let grader = Arc::new(ReferenceGrader::new(bank.clone()));
        let controller = SequenceController::new(
            store.clone(),
            store,
            AptitudeEvaluator::new(bank.clone()),
            ChallengeEvaluator::new(bank.clone(), grader).with_max_code_bytes(max_code_bytes),
        );
        Self {
            storage,
            controller: Arc::new(controller),
            bank,
        }
    }
}

pub async fn get_progress(ctx: &ApiContext, team_id: TeamId) -> Result<ProgressView, ApiError> {
    ctx.controller
        .get_progress(team_id)
        .await
        .map_err(sequence_error)
}

pub async fn submit_aptitude(
    ctx: &ApiContext,
    request: SubmitAptitudeRequest,
) -> Result<(AptitudeOutcome, ServerEvent), ApiError> {
    let question = QuestionKey::aptitude(request.step).ok_or_else(|| {
        ApiError::new(
            ErrorCode::Validation,
            format!("step must be 0, 1 or 2, got {}", request.step),
        )
    })?;
    if request.selected.trim().is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "selected answer is required",
        ));
    }
    let outcome = ctx
        .controller
        .submit_aptitude(
            request.team_id,
            request.step,
            &request.selected,
            request.time_taken,
        )
        .await
        .map_err(sequence_error)?;
    Ok((
        outcome,
        ServerEvent::ProgressUpdated {
            team_id: request.team_id,
            question,
        },
    ))
}

pub async fn submit_challenge(
    ctx: &ApiContext,
    request: SubmitChallengeRequest,
) -> Result<(ChallengeOutcome, Vec<ServerEvent>), ApiError> {
    let outcome = ctx
        .controller
        .submit_challenge(
            request.team_id,
            request.challenge_type,
            &request.code,
            request.time_taken,
        )
        .await
        .map_err(sequence_error)?;

    let mut events = vec![ServerEvent::ProgressUpdated {
        team_id: request.team_id,
        question: request.challenge_type.question_key(),
    }];
    if outcome.is_quiz_completed {
        events.push(ServerEvent::QuizCompleted {
            team_id: request.team_id,
        });
        if let Some(team) = ctx
            .storage
            .team_summary(request.team_id)
            .await
            .map_err(internal)?
        {
            events.push(ServerEvent::TeamStatusChanged {
                team_id: team.team_id,
                status: team.competition_status,
            });
        }
    }
    Ok((outcome, events))
}

pub fn public_questions(ctx: &ApiContext) -> Vec<PublicQuestion> {
    ctx.bank.public_questions()
}

pub async fn team_summary(ctx: &ApiContext, team_id: TeamId) -> Result<TeamSummary, ApiError> {
    ctx.storage
        .team_summary(team_id)
        .await
        .map_err(internal)?
        .filter(|team| team.is_active)
        .ok_or_else(|| team_not_found(team_id))
}

pub async fn verify_round_code(
    ctx: &ApiContext,
    request: VerifyRoundCodeRequest,
) -> Result<VerifyRoundCodeResponse, ApiError> {
    team_summary(ctx, request.team_id).await?;
    let valid = ctx
        .storage
        .verify_round_code(request.round, request.code.trim())
        .await
        .map_err(internal)?;
    info!(
        team_id = %request.team_id,
        round = request.round.number(),
        valid,
        "round code checked"
    );
    Ok(VerifyRoundCodeResponse { valid })
}

pub async fn set_round_code(
    ctx: &ApiContext,
    round: CodedRound,
    code: &str,
) -> Result<(RoundCodeInfo, ServerEvent), ApiError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "round code is required"));
    }
    if code.chars().count() > MAX_ROUND_CODE_CHARS {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("round code must be at most {MAX_ROUND_CODE_CHARS} characters"),
        ));
    }
    let info = ctx
        .storage
        .set_round_code(round, code)
        .await
        .map_err(internal)?;
    info!(round = round.number(), "round code set");
    Ok((
        info,
        ServerEvent::RoundCodeChanged {
            round,
            active: true,
        },
    ))
}

/// Admin shortcut that opens `round` (2 or 3) with a fresh code.
pub async fn start_round(
    ctx: &ApiContext,
    round: u8,
    code: &str,
) -> Result<(RoundCodeInfo, ServerEvent), ApiError> {
    set_round_code(ctx, coded_round(round)?, code).await
}

pub async fn reset_round_code(
    ctx: &ApiContext,
    round: u8,
) -> Result<(ResetRoundCodeResponse, ServerEvent), ApiError> {
    let round = coded_round(round)?;
    let deactivated_count = ctx
        .storage
        .reset_round_code(round)
        .await
        .map_err(internal)?;
    info!(round = round.number(), deactivated_count, "round code reset");
    Ok((
        ResetRoundCodeResponse {
            round,
            deactivated_count,
        },
        ServerEvent::RoundCodeChanged {
            round,
            active: false,
        },
    ))
}

pub async fn get_round_codes(ctx: &ApiContext) -> Result<RoundCodesResponse, ApiError> {
    ctx.storage.round_codes().await.map_err(internal)
}

pub async fn list_teams(ctx: &ApiContext) -> Result<Vec<TeamSummary>, ApiError> {
    ctx.storage.list_active_teams().await.map_err(internal)
}

pub async fn update_team_status(
    ctx: &ApiContext,
    team_id: TeamId,
    request: UpdateTeamStatusRequest,
) -> Result<(TeamSummary, Option<ServerEvent>), ApiError> {
    let status = request
        .competition_status
        .as_deref()
        .map(str::parse::<CompetitionStatus>)
        .transpose()
        .map_err(|err| ApiError::new(ErrorCode::Validation, err))?;
    let scores = request.scores.unwrap_or_default();
    let team = ctx
        .storage
        .update_team(team_id, status, &scores)
        .await
        .map_err(internal)?
        .ok_or_else(|| team_not_found(team_id))?;
    info!(%team_id, status = %team.competition_status, total = team.scores.total, "team updated");
    let event = status.map(|status| ServerEvent::TeamStatusChanged { team_id, status });
    Ok((team, event))
}

pub async fn competition_stats(ctx: &ApiContext) -> Result<StatsResponse, ApiError> {
    let stats = ctx.storage.competition_stats().await.map_err(internal)?;
    let round_codes = ctx.storage.active_round_codes().await.map_err(internal)?;
    Ok(StatsResponse { stats, round_codes })
}

pub async fn round_two_overview(ctx: &ApiContext) -> Result<RoundTwoOverview, ApiError> {
    let teams = ctx.storage.round_two_rows().await.map_err(internal)?;
    let statistics = round_two_statistics(&teams);
    Ok(RoundTwoOverview { teams, statistics })
}

pub async fn team_submissions(
    ctx: &ApiContext,
    team_id: TeamId,
) -> Result<Vec<SubmissionRecord>, ApiError> {
    ctx.storage
        .team_summary(team_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| team_not_found(team_id))?;
    ctx.storage
        .list_submissions(team_id)
        .await
        .map_err(internal)
}

pub fn announce_results(round: u8) -> Result<(AnnounceResponse, ServerEvent), ApiError> {
    if !(1..=3).contains(&round) {
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!("round must be 1, 2 or 3, got {round}"),
        ));
    }
    info!(round, "results announced");
    Ok((
        AnnounceResponse {
            round,
            message: format!("Round {round} results announced"),
        },
        ServerEvent::ResultsAnnounced { round },
    ))
}

/// Average is rounded to two decimals; an empty round reports zeros.
pub fn round_two_statistics(rows: &[RoundTwoTeamRow]) -> RoundTwoStatistics {
    if rows.is_empty() {
        return RoundTwoStatistics::default();
    }
    let total: i64 = rows.iter().map(|row| row.total_score).sum();
    let average = total as f64 / rows.len() as f64;
    RoundTwoStatistics {
        total_participants: rows.len(),
        completed_teams: rows.iter().filter(|row| row.is_quiz_completed).count(),
        average_score: (average * 100.0).round() / 100.0,
        highest_score: rows.iter().map(|row| row.total_score).max().unwrap_or_default(),
    }
}

pub fn sequence_error(err: SequenceError) -> ApiError {
    let code = match &err {
        SequenceError::InvalidState(_) => ErrorCode::InvalidState,
        SequenceError::AttemptsExhausted(_) => ErrorCode::AttemptsExhausted,
        SequenceError::NotFound(_) => ErrorCode::NotFound,
        SequenceError::StoreConflict(_) => ErrorCode::Conflict,
        SequenceError::Validation(_) => ErrorCode::Validation,
        SequenceError::Grader(_) | SequenceError::StatusSync(_) | SequenceError::Store(_) => {
            error!(error = %err, "sequence operation failed");
            ErrorCode::Internal
        }
    };
    ApiError::new(code, err.to_string())
}

fn coded_round(round: u8) -> Result<CodedRound, ApiError> {
    CodedRound::try_from(round).map_err(|err| ApiError::new(ErrorCode::Validation, err))
}

fn team_not_found(team_id: TeamId) -> ApiError {
    ApiError::new(ErrorCode::NotFound, format!("team {team_id} not found"))
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
