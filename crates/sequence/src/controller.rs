use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::Utc;
use shared::{
    domain::{ChallengeType, TeamId},
    progress::TeamProgress,
    protocol::{AptitudeOutcome, ChallengeOutcome, ProgressView},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    aptitude::AptitudeEvaluator,
    challenge::ChallengeEvaluator,
    error::SequenceError,
    store::{NewSubmission, ProgressStore, TeamStatusSink},
};

/// Save attempts per submission; one retry after a version conflict.
const SAVE_ATTEMPTS: usize = 2;

/// One async mutex per team. Guards are owned so they drop on every exit path.
#[derive(Default)]
pub struct TeamLocks {
    locks: Mutex<HashMap<TeamId, Arc<AsyncMutex<()>>>>,
}

impl TeamLocks {
    pub async fn acquire(&self, team_id: TeamId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.retain(|id, lock| *id == team_id || Arc::strong_count(lock) > 1);
            locks.entry(team_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Everything produced by a single submission cycle, ready to commit.
struct Applied<T> {
    outcome: T,
    submission: NewSubmission,
    completed_round: bool,
}

pub struct SequenceController {
    store: Arc<dyn ProgressStore>,
    status_sink: Arc<dyn TeamStatusSink>,
    aptitude: AptitudeEvaluator,
    challenge: ChallengeEvaluator,
    locks: TeamLocks,
}

impl SequenceController {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        status_sink: Arc<dyn TeamStatusSink>,
        aptitude: AptitudeEvaluator,
        challenge: ChallengeEvaluator,
    ) -> Self {
        Self {
            store,
            status_sink,
            aptitude,
            challenge,
            locks: TeamLocks::default(),
        }
    }

    pub async fn get_progress(&self, team_id: TeamId) -> Result<ProgressView, SequenceError> {
        let progress = self.load(team_id).await?;
        if !progress.needs_status_sync() {
            return Ok(ProgressView::from(progress));
        }
        let _guard = self.locks.acquire(team_id).await;
        let progress = self.load_synced(team_id).await?;
        Ok(ProgressView::from(progress))
    }

    pub async fn submit_aptitude(
        &self,
        team_id: TeamId,
        index: usize,
        selection: &str,
        time_taken: i64,
    ) -> Result<AptitudeOutcome, SequenceError> {
        let _guard = self.locks.acquire(team_id).await;
        for attempt in 1..=SAVE_ATTEMPTS {
            let mut progress = self.load_synced(team_id).await?;
            let (outcome, submission) = self
                .aptitude
                .evaluate(&mut progress, index, selection, time_taken)
                .inspect_err(|err| log_rejection(team_id, err))?;
            let applied = Applied {
                outcome,
                submission,
                completed_round: false,
            };
            match self.commit(&progress, applied, attempt).await? {
                Some(applied) => {
                    info!(
                        %team_id,
                        question = %applied.submission.question,
                        correct = applied.outcome.correct,
                        attempts_left = applied.outcome.attempts_left,
                        "aptitude answer recorded"
                    );
                    return Ok(applied.outcome);
                }
                None => continue,
            }
        }
        Err(SequenceError::StoreConflict(team_id))
    }

    pub async fn submit_challenge(
        &self,
        team_id: TeamId,
        challenge: ChallengeType,
        code: &str,
        time_taken: i64,
    ) -> Result<ChallengeOutcome, SequenceError> {
        let _guard = self.locks.acquire(team_id).await;
        for attempt in 1..=SAVE_ATTEMPTS {
            let mut progress = self.load_synced(team_id).await?;
            let evaluation = self
                .challenge
                .evaluate(&mut progress, challenge, code, time_taken, Utc::now())
                .await
                .inspect_err(|err| log_rejection(team_id, err))?;
            let applied = Applied {
                outcome: evaluation.outcome,
                submission: evaluation.submission,
                completed_round: evaluation.completed_round,
            };
            let Some(applied) = self.commit(&progress, applied, attempt).await? else {
                continue;
            };

            info!(
                %team_id,
                %challenge,
                score = applied.outcome.score,
                completed = applied.outcome.is_quiz_completed,
                "challenge submission recorded"
            );
            if applied.completed_round {
                self.sync_team_status(&mut progress).await?;
            }
            return Ok(applied.outcome);
        }
        Err(SequenceError::StoreConflict(team_id))
    }

    /// Existing ledger for an active team, persisting a fresh one on first access.
    async fn load(&self, team_id: TeamId) -> Result<TeamProgress, SequenceError> {
        if !self.store.team_is_active(team_id).await? {
            return Err(SequenceError::NotFound(team_id));
        }
        if let Some(progress) = self.store.load_progress(team_id).await? {
            return Ok(progress);
        }
        debug!(%team_id, "creating round 2 progress");
        let fresh = TeamProgress::fresh(team_id, Utc::now());
        Ok(self.store.create_progress(&fresh).await?)
    }

    /// `load` for callers holding the team lock. A completion whose team
    /// update failed earlier is delivered again before anything else runs.
    async fn load_synced(&self, team_id: TeamId) -> Result<TeamProgress, SequenceError> {
        let mut progress = self.load(team_id).await?;
        if progress.needs_status_sync() {
            if let Err(err) = self.sync_team_status(&mut progress).await {
                warn!(%team_id, error = %err, "round 2 completion still pending on team record");
            }
        }
        Ok(progress)
    }

    async fn sync_team_status(&self, progress: &mut TeamProgress) -> Result<(), SequenceError> {
        let team_id = progress.team_id;
        self.status_sink
            .round_two_completed(team_id, progress.total_score)
            .await
            .map_err(SequenceError::StatusSync)?;
        self.store
            .mark_status_synced(team_id)
            .await
            .map_err(SequenceError::StatusSync)?;
        progress.status_synced = true;
        info!(%team_id, total_score = progress.total_score, "round 2 completed");
        Ok(())
    }

    /// Persists one evaluated cycle. `Ok(None)` asks the caller to rerun the
    /// cycle after a version conflict, unless this was the last attempt.
    async fn commit<T>(
        &self,
        progress: &TeamProgress,
        applied: Applied<T>,
        attempt: usize,
    ) -> Result<Option<Applied<T>>, SequenceError> {
        match self.store.save_progress(progress, &applied.submission).await {
            Ok(_) => Ok(Some(applied)),
            Err(err) => match SequenceError::from(err) {
                SequenceError::StoreConflict(team_id) if attempt < SAVE_ATTEMPTS => {
                    warn!(%team_id, attempt, "progress save conflicted, retrying");
                    Ok(None)
                }
                other => Err(other),
            },
        }
    }
}

fn log_rejection(team_id: TeamId, err: &SequenceError) {
    match err {
        SequenceError::InvalidState(_)
        | SequenceError::AttemptsExhausted(_)
        | SequenceError::Validation(_) => warn!(%team_id, error = %err, "submission rejected"),
        _ => {}
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
