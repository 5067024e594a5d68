use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use shared::{
    domain::{CompetitionStatus, TeamId},
    protocol::ProgressView,
};
use tokio::sync::RwLock;

/// Default gap between progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

struct CachedProgress {
    view: ProgressView,
    fetched_at: Instant,
}

/// Per-team progress views kept for a fixed TTL. A zero TTL disables caching.
pub struct ProgressCache {
    ttl: Duration,
    entries: RwLock<HashMap<TeamId, CachedProgress>>,
}

impl ProgressCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, team_id: TeamId) -> Option<ProgressView> {
        let entries = self.entries.read().await;
        entries
            .get(&team_id)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.view.clone())
    }

    pub async fn insert(&self, view: ProgressView) {
        let team_id = view.progress.team_id;
        self.entries.write().await.insert(
            team_id,
            CachedProgress {
                view,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self, team_id: TeamId) {
        self.entries.write().await.remove(&team_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QuizCompleted,
    TerminalStatus(CompetitionStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    Continue(Duration),
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PollPolicy {
    pub fn every(interval: Duration) -> Self {
        Self { interval }
    }

    /// Polling ends once the quiz is finished or the team can no longer move.
    pub fn next(&self, view: &ProgressView, status: Option<CompetitionStatus>) -> PollDecision {
        if view.progress.is_quiz_completed {
            return PollDecision::Stop(StopReason::QuizCompleted);
        }
        match status {
            Some(status) if status.is_terminal() => {
                PollDecision::Stop(StopReason::TerminalStatus(status))
            }
            _ => PollDecision::Continue(self.interval),
        }
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
