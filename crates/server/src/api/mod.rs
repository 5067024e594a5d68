use std::sync::Arc;

use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use competition_api as api;
use shared::{
    domain::{TeamId, TeamSummary},
    error::{ApiError, ErrorCode},
    protocol::{
        AnnounceResponse, AptitudeOutcome, ChallengeOutcome, ProgressView, PublicQuestion,
        ResetRoundCodeResponse, RoundCodeInfo, RoundCodesResponse, RoundTwoOverview,
        SetRoundCodeRequest, StartRoundRequest, StatsResponse, SubmissionRecord,
        SubmitAptitudeRequest, SubmitChallengeRequest, TeamResponse, UpdateTeamStatusRequest,
        VerifyRoundCodeRequest, VerifyRoundCodeResponse,
    },
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

use crate::{app_state::AppState, auth::AdminBearer};

type Rejection = (StatusCode, Json<ApiError>);
type HttpResult<T> = Result<Json<T>, Rejection>;

/// Headroom for the JSON envelope around a code submission.
const BODY_OVERHEAD_BYTES: usize = 16 * 1024;

pub(crate) fn build_router(state: Arc<AppState>, max_code_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/quiz/team/:team_id/progress", get(http_get_progress))
        .route("/quiz/apt/answer", post(http_submit_aptitude))
        .route("/quiz/code/submit", post(http_submit_challenge))
        .route("/quiz/questions", get(http_public_questions))
        .route("/competition/team/:team_id", get(http_team_summary))
        .route(
            "/competition/round-codes/verify",
            post(http_verify_round_code),
        )
        .route("/admin/teams", get(http_list_teams))
        .route("/admin/teams/:team_id/status", put(http_update_team_status))
        .route("/admin/stats", get(http_competition_stats))
        .route(
            "/admin/round-codes",
            get(http_get_round_codes).post(http_set_round_code),
        )
        .route("/admin/round-codes/:round", delete(http_reset_round_code))
        .route("/admin/start/:round", post(http_start_round))
        .route("/admin/announce/:round", post(http_announce_results))
        .route("/admin/round2/data", get(http_round_two_overview))
        .route(
            "/admin/round2/team/:team_id/submissions",
            get(http_team_submissions),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(
            max_code_bytes.saturating_add(BODY_OVERHEAD_BYTES),
        ))
        .with_state(state)
}

pub(crate) fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::InvalidState | ErrorCode::AttemptsExhausted | ErrorCode::Conflict => {
            StatusCode::CONFLICT
        }
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> Rejection {
    (status_for(err.code), Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}

async fn http_get_progress(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<i64>,
) -> HttpResult<ProgressView> {
    let view = api::get_progress(&state.api, TeamId(team_id))
        .await
        .map_err(reject)?;
    Ok(Json(view))
}

async fn http_submit_aptitude(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitAptitudeRequest>,
) -> HttpResult<AptitudeOutcome> {
    let (outcome, event) = api::submit_aptitude(&state.api, req)
        .await
        .map_err(reject)?;
    state.publish(event);
    Ok(Json(outcome))
}

async fn http_submit_challenge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitChallengeRequest>,
) -> HttpResult<ChallengeOutcome> {
    let (outcome, events) = api::submit_challenge(&state.api, req)
        .await
        .map_err(reject)?;
    for event in events {
        state.publish(event);
    }
    Ok(Json(outcome))
}

async fn http_public_questions(State(state): State<Arc<AppState>>) -> Json<Vec<PublicQuestion>> {
    Json(api::public_questions(&state.api))
}

async fn http_team_summary(
    State(state): State<Arc<AppState>>,
    Path(team_id): Path<i64>,
) -> HttpResult<TeamResponse> {
    let team = api::team_summary(&state.api, TeamId(team_id))
        .await
        .map_err(reject)?;
    Ok(Json(TeamResponse { team }))
}

async fn http_verify_round_code(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyRoundCodeRequest>,
) -> HttpResult<VerifyRoundCodeResponse> {
    let response = api::verify_round_code(&state.api, req)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_list_teams(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
) -> HttpResult<Vec<TeamSummary>> {
    let teams = api::list_teams(&state.api).await.map_err(reject)?;
    Ok(Json(teams))
}

async fn http_update_team_status(
    State(state): State<Arc<AppState>>,
    AdminBearer(admin): AdminBearer,
    Path(team_id): Path<i64>,
    Json(req): Json<UpdateTeamStatusRequest>,
) -> HttpResult<TeamResponse> {
    let (team, event) = api::update_team_status(&state.api, TeamId(team_id), req)
        .await
        .map_err(reject)?;
    info!(admin = %admin.sub, team_id, "team status updated");
    if let Some(event) = event {
        state.publish(event);
    }
    Ok(Json(TeamResponse { team }))
}

async fn http_competition_stats(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
) -> HttpResult<StatsResponse> {
    let stats = api::competition_stats(&state.api).await.map_err(reject)?;
    Ok(Json(stats))
}

async fn http_get_round_codes(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
) -> HttpResult<RoundCodesResponse> {
    let codes = api::get_round_codes(&state.api).await.map_err(reject)?;
    Ok(Json(codes))
}

async fn http_set_round_code(
    State(state): State<Arc<AppState>>,
    AdminBearer(admin): AdminBearer,
    Json(req): Json<SetRoundCodeRequest>,
) -> HttpResult<RoundCodeInfo> {
    let (info, event) = api::set_round_code(&state.api, req.round, &req.code)
        .await
        .map_err(reject)?;
    info!(admin = %admin.sub, round = info.round.number(), "round code updated");
    state.publish(event);
    Ok(Json(info))
}

async fn http_reset_round_code(
    State(state): State<Arc<AppState>>,
    AdminBearer(admin): AdminBearer,
    Path(round): Path<u8>,
) -> HttpResult<ResetRoundCodeResponse> {
    let (response, event) = api::reset_round_code(&state.api, round)
        .await
        .map_err(reject)?;
    info!(admin = %admin.sub, round, "round code reset requested");
    state.publish(event);
    Ok(Json(response))
}

async fn http_start_round(
    State(state): State<Arc<AppState>>,
    AdminBearer(admin): AdminBearer,
    Path(round): Path<u8>,
    Json(req): Json<StartRoundRequest>,
) -> HttpResult<RoundCodeInfo> {
    let (info, event) = api::start_round(&state.api, round, &req.code)
        .await
        .map_err(reject)?;
    info!(admin = %admin.sub, round, "round started");
    state.publish(event);
    Ok(Json(info))
}

async fn http_announce_results(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
    Path(round): Path<u8>,
) -> HttpResult<AnnounceResponse> {
    let (response, event) = api::announce_results(round).map_err(reject)?;
    state.publish(event);
    Ok(Json(response))
}

async fn http_round_two_overview(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
) -> HttpResult<RoundTwoOverview> {
    let overview = api::round_two_overview(&state.api).await.map_err(reject)?;
    Ok(Json(overview))
}

async fn http_team_submissions(
    State(state): State<Arc<AppState>>,
    _admin: AdminBearer,
    Path(team_id): Path<i64>,
) -> HttpResult<Vec<SubmissionRecord>> {
    let submissions = api::team_submissions(&state.api, TeamId(team_id))
        .await
        .map_err(reject)?;
    Ok(Json(submissions))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: axum::extract::ws::WebSocket) {
    use axum::extract::ws::Message;
    use futures::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let send_task = tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
