use super::*;
use axum::{
    body::{self, Body},
    http::{header, Request},
    response::Response,
};
use competition_api::auth::mint_admin_token;
use sequence::QuestionBank;
use shared::domain::{CompetitionStatus, QuestionKey};
use shared::progress::QuestionState;
use shared::protocol::ServerEvent;
use storage::Storage;
use tokio::sync::broadcast;
use tower::ServiceExt;

const SECRET: &str = "route-test-secret";

struct TestApp {
    router: Router,
    storage: Storage,
    events: broadcast::Receiver<ServerEvent>,
    team: TeamId,
}

async fn test_app() -> TestApp {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = storage.create_team("route-team").await.expect("team");
    let api = api::ApiContext::new(storage.clone(), Arc::new(QuestionBank::default()), 1024);
    let (events, rx) = broadcast::channel(32);
    let router = build_router(
        Arc::new(AppState {
            api,
            events,
            admin_jwt_secret: SECRET.into(),
        }),
        1024,
    );
    TestApp {
        router,
        storage,
        events: rx,
        team,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let token = mint_admin_token(SECRET, "ops", 300).expect("token");
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let app = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn progress_route_returns_fresh_view() {
    let app = test_app().await;
    let request = Request::get(format!("/quiz/team/{}/progress", app.team.0))
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let view: ProgressView = read_json(response).await;
    assert_eq!(view.question_states.q1, QuestionState::Unlocked);
    assert_eq!(view.question_states.q4, QuestionState::Locked);
}

#[tokio::test]
async fn unknown_team_is_404() {
    let app = test_app().await;
    let request = Request::get("/quiz/team/999/progress")
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn aptitude_answer_publishes_event() {
    let mut app = test_app().await;
    let request = json_request(
        "POST",
        "/quiz/apt/answer",
        serde_json::json!({ "team_id": app.team.0, "step": 0, "selected": "1 byte" }),
    );
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome: AptitudeOutcome = read_json(response).await;
    assert!(outcome.correct);

    let event = app.events.try_recv().expect("event");
    assert!(matches!(
        event,
        ServerEvent::ProgressUpdated {
            question: QuestionKey::Q1,
            ..
        }
    ));

    let again = json_request(
        "POST",
        "/quiz/apt/answer",
        serde_json::json!({ "team_id": app.team.0, "question_index": 0, "selected": "1 byte" }),
    );
    let response = app.router.oneshot(again).await.expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::InvalidState);
}

#[tokio::test]
async fn locked_challenge_is_conflict() {
    let app = test_app().await;
    let request = json_request(
        "POST",
        "/quiz/code/submit",
        serde_json::json!({
            "team_id": app.team.0,
            "challenge_type": "program",
            "code": "int main(void) { return 0; }",
            "time_taken": 30
        }),
    );
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn oversized_submission_is_rejected() {
    let app = test_app().await;
    let request = json_request(
        "POST",
        "/quiz/code/submit",
        serde_json::json!({
            "team_id": app.team.0,
            "challenge_type": "debug",
            "code": "x".repeat(64 * 1024),
            "time_taken": 1
        }),
    );
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn public_questions_hide_answers() {
    let app = test_app().await;
    let request = Request::get("/quiz/questions")
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let questions: Vec<PublicQuestion> = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(questions.len(), 6);
    assert!(!String::from_utf8_lossy(&bytes).contains("\"answer\""));
}

#[tokio::test]
async fn admin_routes_require_admin_token() {
    let app = test_app().await;
    let anonymous = Request::get("/admin/teams")
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(anonymous).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let forged = mint_admin_token("other-secret", "ops", 300).expect("token");
    let request = Request::get("/admin/teams")
        .header(header::AUTHORIZATION, format!("Bearer {forged}"))
        .body(Body::empty())
        .expect("request");
    let response = app.router.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(admin_request("GET", "/admin/teams", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let teams: Vec<TeamSummary> = read_json(response).await;
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].team_id, app.team);
}

#[tokio::test]
async fn bearer_scheme_is_case_insensitive() {
    let app = test_app().await;
    let token = mint_admin_token(SECRET, "ops", 300).expect("token");
    for scheme in ["bearer", "BEARER", "BeArEr"] {
        let request = Request::get("/admin/teams")
            .header(header::AUTHORIZATION, format!("{scheme} {token}"))
            .body(Body::empty())
            .expect("request");
        let response = app.router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK, "scheme {scheme}");
    }

    let request = Request::get("/admin/teams")
        .header(header::AUTHORIZATION, format!("Basic {token}"))
        .body(Body::empty())
        .expect("request");
    let response = app.router.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn round_code_flow_over_http() {
    let mut app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(admin_request(
            "POST",
            "/admin/start/2",
            Some(serde_json::json!({ "code": "OPEN-SESAME" })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(matches!(
        app.events.try_recv().expect("event"),
        ServerEvent::RoundCodeChanged { active: true, .. }
    ));

    let verify = json_request(
        "POST",
        "/competition/round-codes/verify",
        serde_json::json!({ "team_id": app.team.0, "round": 2, "code": "OPEN-SESAME" }),
    );
    let response = app.router.clone().oneshot(verify).await.expect("response");
    let verified: VerifyRoundCodeResponse = read_json(response).await;
    assert!(verified.valid);

    let response = app
        .router
        .clone()
        .oneshot(admin_request("GET", "/admin/round-codes", None))
        .await
        .expect("response");
    let codes: RoundCodesResponse = read_json(response).await;
    assert_eq!(codes.round2.expect("round 2").usage_count, 1);

    let response = app
        .router
        .clone()
        .oneshot(admin_request("DELETE", "/admin/round-codes/2", None))
        .await
        .expect("response");
    let reset: ResetRoundCodeResponse = read_json(response).await;
    assert_eq!(reset.deactivated_count, 1);

    let bad_round = app
        .router
        .oneshot(admin_request("DELETE", "/admin/round-codes/1", None))
        .await
        .expect("response");
    assert_eq!(bad_round.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_update_and_stats() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(admin_request(
            "PUT",
            &format!("/admin/teams/{}/status", app.team.0),
            Some(serde_json::json!({
                "competition_status": "round1_completed",
                "scores": { "round1": 42 }
            })),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let updated: TeamResponse = read_json(response).await;
    assert_eq!(
        updated.team.competition_status,
        CompetitionStatus::Round1Completed
    );
    assert_eq!(updated.team.scores.total, 42);

    let invalid = app
        .router
        .clone()
        .oneshot(admin_request(
            "PUT",
            &format!("/admin/teams/{}/status", app.team.0),
            Some(serde_json::json!({ "competition_status": "Eliminated" })),
        ))
        .await
        .expect("response");
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(admin_request("GET", "/admin/stats", None))
        .await
        .expect("response");
    let stats: StatsResponse = read_json(response).await;
    assert_eq!(stats.stats.total_teams, 1);
    assert_eq!(stats.stats.round1_completed, 1);
    assert_eq!(
        app.storage
            .team_summary(app.team)
            .await
            .expect("summary")
            .expect("team")
            .scores
            .round1,
        42
    );
}

#[tokio::test]
async fn round_two_admin_views() {
    let app = test_app().await;
    let answer = json_request(
        "POST",
        "/quiz/apt/answer",
        serde_json::json!({ "team_id": app.team.0, "step": 0, "selected": "nope", "time_taken": 9 }),
    );
    app.router.clone().oneshot(answer).await.expect("response");

    let response = app
        .router
        .clone()
        .oneshot(admin_request("GET", "/admin/round2/data", None))
        .await
        .expect("response");
    let overview: RoundTwoOverview = read_json(response).await;
    assert_eq!(overview.statistics.total_participants, 1);
    assert_eq!(overview.teams[0].total_score, 0);

    let response = app
        .router
        .clone()
        .oneshot(admin_request(
            "GET",
            &format!("/admin/round2/team/{}/submissions", app.team.0),
            None,
        ))
        .await
        .expect("response");
    let submissions: Vec<SubmissionRecord> = read_json(response).await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].user_solution, "nope");
    assert_eq!(submissions[0].time_taken, 9);

    let response = app
        .router
        .oneshot(admin_request("POST", "/admin/announce/2", None))
        .await
        .expect("response");
    let announced: AnnounceResponse = read_json(response).await;
    assert_eq!(announced.round, 2);
}

#[test]
fn error_codes_map_to_http_statuses() {
    assert_eq!(status_for(ErrorCode::InvalidState), StatusCode::CONFLICT);
    assert_eq!(status_for(ErrorCode::AttemptsExhausted), StatusCode::CONFLICT);
    assert_eq!(status_for(ErrorCode::Validation), StatusCode::BAD_REQUEST);
    assert_eq!(
        status_for(ErrorCode::Internal),
        StatusCode::INTERNAL_SERVER_ERROR
    );
}
