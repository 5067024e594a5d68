use std::time::Duration;

use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{ChallengeType, CodedRound, TeamId, TeamSummary},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        AptitudeOutcome, ChallengeOutcome, ProgressView, PublicQuestion, SubmitAptitudeRequest,
        SubmitChallengeRequest, TeamResponse, VerifyRoundCodeRequest, VerifyRoundCodeResponse,
    },
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

pub mod board;
pub mod cache;

pub use board::{BoardEntry, QuestionBoard};
pub use cache::{PollDecision, PollPolicy, ProgressCache, StopReason};

/// Progress reads are served from cache for this long between polls.
pub const DEFAULT_PROGRESS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http transport failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request: {0}")]
    Api(#[from] ApiException),
}

impl ClientError {
    /// The server's error code, if the server answered at all.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Api(err) => Some(err.code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Team-facing HTTP client. Admin routes are driven from `tools` instead.
pub struct CompetitionClient {
    http: Client,
    base: Url,
    cache: ProgressCache,
}

impl CompetitionClient {
    pub fn new(server_url: &str) -> Result<Self> {
        Self::with_cache_ttl(server_url, DEFAULT_PROGRESS_TTL)
    }

    pub fn with_cache_ttl(server_url: &str, ttl: Duration) -> Result<Self> {
        let mut base = Url::parse(server_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base,
            cache: ProgressCache::new(ttl),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn cache(&self) -> &ProgressCache {
        &self.cache
    }

    /// Cached progress read; hits the server only when the entry is stale.
    pub async fn progress(&self, team_id: TeamId) -> Result<ProgressView> {
        if let Some(view) = self.cache.get(team_id).await {
            debug!(%team_id, "progress served from cache");
            return Ok(view);
        }
        self.refresh_progress(team_id).await
    }

    /// Uncached progress read. The result replaces the cache entry.
    pub async fn refresh_progress(&self, team_id: TeamId) -> Result<ProgressView> {
        let url = self.endpoint(&format!("quiz/team/{}/progress", team_id.0))?;
        let view: ProgressView = decode(self.http.get(url).send().await?).await?;
        self.cache.insert(view.clone()).await;
        Ok(view)
    }

    pub async fn submit_aptitude(
        &self,
        team_id: TeamId,
        step: usize,
        selected: &str,
        time_taken: i64,
    ) -> Result<AptitudeOutcome> {
        let request = SubmitAptitudeRequest {
            team_id,
            step,
            selected: selected.to_string(),
            time_taken,
        };
        let outcome = self.post("quiz/apt/answer", &request).await;
        self.cache.invalidate(team_id).await;
        let outcome: AptitudeOutcome = outcome?;
        info!(%team_id, step, correct = outcome.correct, "aptitude answer submitted");
        Ok(outcome)
    }

    pub async fn submit_challenge(
        &self,
        team_id: TeamId,
        challenge_type: ChallengeType,
        code: &str,
        time_taken: i64,
    ) -> Result<ChallengeOutcome> {
        let request = SubmitChallengeRequest {
            team_id,
            challenge_type,
            code: code.to_string(),
            time_taken,
        };
        let outcome = self.post("quiz/code/submit", &request).await;
        self.cache.invalidate(team_id).await;
        let outcome: ChallengeOutcome = outcome?;
        info!(
            %team_id,
            challenge = %challenge_type,
            score = outcome.score,
            completed = outcome.is_quiz_completed,
            "challenge submitted"
        );
        Ok(outcome)
    }

    pub async fn questions(&self) -> Result<Vec<PublicQuestion>> {
        let url = self.endpoint("quiz/questions")?;
        decode(self.http.get(url).send().await?).await
    }

    pub async fn team(&self, team_id: TeamId) -> Result<TeamSummary> {
        let url = self.endpoint(&format!("competition/team/{}", team_id.0))?;
        let response: TeamResponse = decode(self.http.get(url).send().await?).await?;
        Ok(response.team)
    }

    pub async fn verify_round_code(
        &self,
        team_id: TeamId,
        round: CodedRound,
        code: &str,
    ) -> Result<bool> {
        let request = VerifyRoundCodeRequest {
            team_id,
            round,
            code: code.to_string(),
        };
        let response: VerifyRoundCodeResponse =
            self.post("competition/round-codes/verify", &request).await?;
        if !response.valid {
            warn!(%team_id, round = round.number(), "round code rejected");
        }
        Ok(response.valid)
    }

    /// Polls progress until `policy` says stop, calling `on_update` with every
    /// fetched view. Returns the last view seen.
    pub async fn poll_progress<F>(
        &self,
        team_id: TeamId,
        policy: &PollPolicy,
        mut on_update: F,
    ) -> Result<(ProgressView, StopReason)>
    where
        F: FnMut(&ProgressView),
    {
        loop {
            let view = self.refresh_progress(team_id).await?;
            on_update(&view);
            let status = if view.progress.is_quiz_completed {
                None
            } else {
                Some(self.team(team_id).await?.competition_status)
            };
            match policy.next(&view, status) {
                PollDecision::Continue(delay) => tokio::time::sleep(delay).await,
                PollDecision::Stop(reason) => {
                    info!(%team_id, ?reason, "progress polling stopped");
                    return Ok((view, reason));
                }
            }
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        decode(self.http.post(url).json(body).send().await?).await
    }
}

/// Successful bodies decode as `T`; failures decode the server's `ApiError`
/// envelope, falling back to the bare HTTP status.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let body = response.bytes().await?;
    let err = match serde_json::from_slice::<ApiError>(&body) {
        Ok(err) => ApiException::new(err.code, err.message),
        Err(_) => ApiException::new(
            fallback_code(status),
            format!("HTTP {status}: {}", String::from_utf8_lossy(&body).trim()),
        ),
    };
    Err(err.into())
}

fn fallback_code(status: reqwest::StatusCode) -> ErrorCode {
    match status {
        reqwest::StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        reqwest::StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        reqwest::StatusCode::NOT_FOUND => ErrorCode::NotFound,
        reqwest::StatusCode::CONFLICT => ErrorCode::Conflict,
        s if s.is_client_error() => ErrorCode::Validation,
        _ => ErrorCode::Internal,
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
