use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use shared::{
    domain::QuestionKey,
    progress::{Blocked, QuestionState},
};

use super::*;
use crate::{
    bank::{QuestionBank, ReferenceGrader},
    error::StoreError,
};

#[derive(Default)]
struct MemoryStore {
    active: Mutex<HashSet<TeamId>>,
    progress: Mutex<HashMap<TeamId, TeamProgress>>,
    submissions: Mutex<Vec<NewSubmission>>,
    forced_conflicts: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryStore {
    fn with_team(team_id: TeamId) -> Arc<Self> {
        let store = Self::default();
        store.active.lock().expect("lock").insert(team_id);
        Arc::new(store)
    }

    fn stored(&self, team_id: TeamId) -> Option<TeamProgress> {
        self.progress.lock().expect("lock").get(&team_id).cloned()
    }

    fn submission_count(&self) -> usize {
        self.submissions.lock().expect("lock").len()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn team_is_active(&self, team_id: TeamId) -> anyhow::Result<bool> {
        Ok(self.active.lock().expect("lock").contains(&team_id))
    }

    async fn load_progress(&self, team_id: TeamId) -> anyhow::Result<Option<TeamProgress>> {
        Ok(self.stored(team_id))
    }

    async fn create_progress(&self, progress: &TeamProgress) -> anyhow::Result<TeamProgress> {
        let mut guard = self.progress.lock().expect("lock");
        let stored = guard.entry(progress.team_id).or_insert_with(|| {
            let mut created = progress.clone();
            created.version = 1;
            created
        });
        Ok(stored.clone())
    }

    async fn save_progress(
        &self,
        progress: &TeamProgress,
        submission: &NewSubmission,
    ) -> Result<i64, StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Conflict(progress.team_id));
        }
        let mut guard = self.progress.lock().expect("lock");
        let current = guard
            .get(&progress.team_id)
            .map(|stored| stored.version)
            .unwrap_or_default();
        if current != progress.version {
            return Err(StoreError::Conflict(progress.team_id));
        }
        let mut next = progress.clone();
        next.version += 1;
        let version = next.version;
        guard.insert(progress.team_id, next);
        self.submissions
            .lock()
            .expect("lock")
            .push(submission.clone());
        Ok(version)
    }

    async fn mark_status_synced(&self, team_id: TeamId) -> anyhow::Result<()> {
        if let Some(stored) = self.progress.lock().expect("lock").get_mut(&team_id) {
            stored.status_synced = true;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<(TeamId, i64)>>,
    /// Calls left to fail before the sink starts accepting.
    failures: AtomicUsize,
}

#[async_trait]
impl TeamStatusSink for RecordingSink {
    async fn round_two_completed(
        &self,
        team_id: TeamId,
        round_two_score: i64,
    ) -> anyhow::Result<()> {
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            anyhow::bail!("team table locked");
        }
        self.calls
            .lock()
            .expect("lock")
            .push((team_id, round_two_score));
        Ok(())
    }
}

const TEAM: TeamId = TeamId(42);

fn controller(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> SequenceController {
    let bank = Arc::new(QuestionBank::default());
    SequenceController::new(
        store,
        sink,
        AptitudeEvaluator::new(bank.clone()),
        ChallengeEvaluator::new(bank.clone(), Arc::new(ReferenceGrader::new(bank))),
    )
}

fn setup() -> (SequenceController, Arc<MemoryStore>, Arc<RecordingSink>) {
    let store = MemoryStore::with_team(TEAM);
    let sink = Arc::new(RecordingSink::default());
    (controller(store.clone(), sink.clone()), store, sink)
}

const CORRECT: [&str; 3] = ["1 byte", "72", "4.0"];
const SOLUTIONS: [&str; 3] = [
    "int s = 0; for (int i = 0; i < n; i++) s += a[i]; return s;",
    "120",
    "int n = strlen(s); for (int i = n - 1; i >= 0; i--) printf(\"%c\", s[i]); return 0;",
];

/// Answers everything correctly; returns the result of the final submission.
async fn play_full_round(
    controller: &SequenceController,
) -> Result<ChallengeOutcome, SequenceError> {
    for (index, challenge) in ChallengeType::ALL.into_iter().enumerate() {
        controller
            .submit_aptitude(TEAM, index, CORRECT[index], 15)
            .await
            .expect("aptitude");
        let result = controller
            .submit_challenge(TEAM, challenge, SOLUTIONS[index], 100)
            .await;
        if challenge == ChallengeType::Program {
            return result;
        }
        result.expect("challenge");
    }
    unreachable!("program is the last challenge")
}

#[tokio::test]
async fn fresh_team_sees_only_first_question_unlocked() {
    let (controller, store, _) = setup();
    let view = controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(view.question_states.q1, QuestionState::Unlocked);
    for key in &QuestionKey::ALL[1..] {
        assert_eq!(view.question_states.get(*key), QuestionState::Locked);
    }
    assert_eq!(view.progress.aptitude_attempts.q1, 0);
    assert_eq!(view.progress.aptitude_attempts.q2, 0);
    assert_eq!(view.progress.aptitude_attempts.q3, 0);
    assert_eq!(store.submission_count(), 0);
}

#[tokio::test]
async fn repeated_reads_are_identical() {
    let (controller, _, _) = setup();
    let first = controller.get_progress(TEAM).await.expect("first");
    let second = controller.get_progress(TEAM).await.expect("second");
    assert_eq!(first, second);
}

#[tokio::test]
async fn unknown_team_is_not_found() {
    let (controller, _, _) = setup();
    let err = controller
        .get_progress(TeamId(999))
        .await
        .expect_err("missing");
    assert!(matches!(err, SequenceError::NotFound(TeamId(999))));
}

#[tokio::test]
async fn correct_first_answer_unlocks_debug() {
    let (controller, store, _) = setup();
    let outcome = controller
        .submit_aptitude(TEAM, 0, CORRECT[0], 20)
        .await
        .expect("submit");
    assert!(outcome.correct);
    assert_eq!(outcome.unlocked_challenge, Some(ChallengeType::Debug));

    let view = controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(view.question_states.q1, QuestionState::Completed);
    assert_eq!(view.question_states.q4, QuestionState::Unlocked);
    assert_eq!(store.submission_count(), 1);
}

#[tokio::test]
async fn two_wrong_answers_exhaust_attempts_and_unlock_debug() {
    let (controller, store, _) = setup();
    let first = controller
        .submit_aptitude(TEAM, 0, "2 bytes", 10)
        .await
        .expect("first");
    assert!(!first.correct);
    assert_eq!(first.attempts_left, 1);
    assert_eq!(first.unlocked_challenge, None);
    let view = controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(view.question_states.q1, QuestionState::Unlocked);

    let second = controller
        .submit_aptitude(TEAM, 0, "4 bytes", 10)
        .await
        .expect("second");
    assert!(!second.correct);
    assert_eq!(second.attempts_left, 0);

    let view = controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(view.question_states.q1, QuestionState::Completed);
    assert_eq!(view.question_states.q4, QuestionState::Unlocked);
    assert_eq!(view.progress.aptitude_attempts.q1, 2);
    assert_eq!(view.progress.scores.q1, 0);
    assert_eq!(store.submission_count(), 2);

    let third = controller
        .submit_aptitude(TEAM, 0, CORRECT[0], 10)
        .await
        .expect_err("resolved");
    assert!(matches!(
        third,
        SequenceError::InvalidState(Blocked::AlreadyCompleted(QuestionKey::Q1))
    ));
    assert_eq!(store.submission_count(), 2);
}

#[tokio::test]
async fn challenge_before_unlock_is_rejected_without_mutation() {
    let (controller, store, _) = setup();
    let before = controller.get_progress(TEAM).await.expect("progress");
    let err = controller
        .submit_challenge(TEAM, ChallengeType::Debug, SOLUTIONS[0], 30)
        .await
        .expect_err("locked");
    assert!(matches!(
        err,
        SequenceError::InvalidState(Blocked::Locked(QuestionKey::Q4))
    ));
    let after = controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(before, after);
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_sequence_completes_and_signals_once() {
    let (controller, store, sink) = setup();
    for (index, challenge) in ChallengeType::ALL.into_iter().enumerate() {
        controller
            .submit_aptitude(TEAM, index, CORRECT[index], 15)
            .await
            .expect("aptitude");
        let outcome = controller
            .submit_challenge(TEAM, challenge, SOLUTIONS[index], 100)
            .await
            .expect("challenge");
        assert_eq!(outcome.unlocked_next, challenge.next_aptitude());
        assert_eq!(outcome.is_quiz_completed, challenge == ChallengeType::Program);
    }

    let view = controller.get_progress(TEAM).await.expect("progress");
    assert!(view.progress.is_quiz_completed);
    assert!(view.progress.end_time.is_some());
    assert_eq!(view.progress.total_score, 3 * 10 + 3 * 20);
    assert_eq!(view.progress.total_time_taken, 3 * 15 + 3 * 100);
    assert_eq!(store.submission_count(), 6);

    let calls = sink.calls.lock().expect("lock").clone();
    assert_eq!(calls, vec![(TEAM, 90)]);

    let err = controller
        .submit_challenge(TEAM, ChallengeType::Program, SOLUTIONS[2], 5)
        .await
        .expect_err("already done");
    assert!(matches!(
        err,
        SequenceError::InvalidState(Blocked::AlreadyCompleted(QuestionKey::Q6))
    ));
    assert_eq!(sink.calls.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn concurrent_answers_for_one_team_serialize() {
    let (controller, store, _) = setup();
    let controller = Arc::new(controller);
    let (left, right) = tokio::join!(
        {
            let controller = controller.clone();
            async move { controller.submit_aptitude(TEAM, 0, CORRECT[0], 1).await }
        },
        {
            let controller = controller.clone();
            async move { controller.submit_aptitude(TEAM, 0, CORRECT[0], 1).await }
        }
    );
    let results = [left, right];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(SequenceError::InvalidState(Blocked::AlreadyCompleted(QuestionKey::Q1)))
    )));
    assert_eq!(store.submission_count(), 1);
    assert_eq!(store.stored(TEAM).expect("stored").aptitude_attempts.q1, 1);
}

#[tokio::test]
async fn single_conflict_is_retried() {
    let (controller, store, _) = setup();
    store.forced_conflicts.store(1, Ordering::SeqCst);
    let outcome = controller
        .submit_aptitude(TEAM, 0, CORRECT[0], 1)
        .await
        .expect("retried");
    assert!(outcome.correct);
    assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    assert_eq!(store.submission_count(), 1);
}

#[tokio::test]
async fn repeated_conflicts_surface_without_writes() {
    let (controller, store, _) = setup();
    store.forced_conflicts.store(5, Ordering::SeqCst);
    let err = controller
        .submit_aptitude(TEAM, 0, CORRECT[0], 1)
        .await
        .expect_err("conflict");
    assert!(matches!(err, SequenceError::StoreConflict(TEAM)));
    assert_eq!(store.submission_count(), 0);
    let stored = store.stored(TEAM).expect("stored");
    assert_eq!(stored.aptitude_attempts.q1, 0);
}

#[tokio::test]
async fn attempts_never_exceed_budget() {
    let (controller, store, _) = setup();
    for _ in 0..4 {
        let _ = controller.submit_aptitude(TEAM, 0, "nope", 1).await;
    }
    let stored = store.stored(TEAM).expect("stored");
    assert_eq!(stored.aptitude_attempts.q1, 2);
    assert_eq!(store.submission_count(), 2);
}

#[tokio::test]
async fn failed_team_update_is_redelivered_on_next_read() {
    let (controller, store, sink) = setup();
    sink.failures.store(1, Ordering::SeqCst);

    let err = play_full_round(&controller)
        .await
        .expect_err("team update failed");
    assert!(matches!(err, SequenceError::StatusSync(_)));
    let stored = store.stored(TEAM).expect("stored");
    assert!(stored.is_quiz_completed);
    assert!(!stored.status_synced);
    assert!(sink.calls.lock().expect("lock").is_empty());

    let view = controller.get_progress(TEAM).await.expect("progress");
    assert!(view.progress.status_synced);
    assert_eq!(sink.calls.lock().expect("lock").clone(), vec![(TEAM, 90)]);

    controller.get_progress(TEAM).await.expect("progress");
    assert_eq!(sink.calls.lock().expect("lock").len(), 1);
    assert_eq!(store.submission_count(), 6);
}

#[tokio::test]
async fn resubmitting_after_failed_team_update_promotes_once() {
    let (controller, store, sink) = setup();
    sink.failures.store(2, Ordering::SeqCst);

    play_full_round(&controller)
        .await
        .expect_err("team update failed");
    // A read while the sink is still down keeps the completion pending.
    let view = controller.get_progress(TEAM).await.expect("progress");
    assert!(view.progress.is_quiz_completed);
    assert!(!view.progress.status_synced);

    let err = controller
        .submit_challenge(TEAM, ChallengeType::Program, SOLUTIONS[2], 5)
        .await
        .expect_err("already done");
    assert!(matches!(
        err,
        SequenceError::InvalidState(Blocked::AlreadyCompleted(QuestionKey::Q6))
    ));
    assert_eq!(sink.calls.lock().expect("lock").clone(), vec![(TEAM, 90)]);
    assert!(store.stored(TEAM).expect("stored").status_synced);
    assert_eq!(store.submission_count(), 6);
}
