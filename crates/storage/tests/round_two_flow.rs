use std::sync::Arc;

use sequence::{
    AptitudeEvaluator, ChallengeEvaluator, QuestionBank, ReferenceGrader, SequenceController,
    SequenceError,
};
use shared::domain::{ChallengeType, CodedRound, CompetitionStatus, RoundScores};
use storage::Storage;

fn controller(storage: &Storage) -> SequenceController {
    let bank = Arc::new(QuestionBank::default());
    let store = Arc::new(storage.clone());
    SequenceController::new(
        store.clone(),
        store,
        AptitudeEvaluator::new(bank.clone()),
        ChallengeEvaluator::new(bank.clone(), Arc::new(ReferenceGrader::new(bank))),
    )
}

#[tokio::test]
async fn round_two_completion_updates_team_record() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = storage.create_team("round-two-flow").await.expect("team");
    storage
        .set_round_code(CodedRound::Two, "FLOW")
        .await
        .expect("code");
    let controller = controller(&storage);

    let wrong = controller
        .submit_aptitude(team, 0, "2 bytes", 10)
        .await
        .expect("first guess");
    assert!(!wrong.correct);
    controller
        .submit_aptitude(team, 0, "8 bits", 10)
        .await
        .expect("second guess");
    controller
        .submit_challenge(team, ChallengeType::Debug, "int s = 0; i < n;", 60)
        .await
        .expect("partial debug");

    controller
        .submit_aptitude(team, 1, "72", 20)
        .await
        .expect("aptitude two");
    controller
        .submit_challenge(team, ChallengeType::Trace, " 120 \n", 30)
        .await
        .expect("trace");

    controller
        .submit_aptitude(team, 2, "4.0", 20)
        .await
        .expect("aptitude three");
    let last = controller
        .submit_challenge(
            team,
            ChallengeType::Program,
            "int main(){ int n = strlen(s); for(;;){} printf(\"%s\", s); return 0; }",
            120,
        )
        .await
        .expect("program");
    assert!(last.is_quiz_completed);

    let view = controller.get_progress(team).await.expect("progress");
    assert!(view.progress.status_synced);
    // q1 exhausted (0), debug 2 of 3 fragments (13), 10 + 20 + 10 + 20.
    assert_eq!(view.progress.total_score, 73);
    assert_eq!(view.progress.total_time_taken, 270);

    let summary = storage
        .team_summary(team)
        .await
        .expect("summary")
        .expect("team");
    assert_eq!(summary.competition_status, CompetitionStatus::Round2Completed);
    assert_eq!(summary.scores, RoundScores::new(0, 73, 0));

    let submissions = storage.list_submissions(team).await.expect("submissions");
    assert_eq!(submissions.len(), 7);
    assert_eq!(submissions[1].attempt_number, 2);
    assert!(!submissions[1].is_correct);

    let codes = storage.round_codes().await.expect("codes");
    assert_eq!(codes.round2.expect("round 2").completion_count, 1);

    let err = controller
        .submit_challenge(team, ChallengeType::Program, "again", 1)
        .await
        .expect_err("completed");
    assert!(matches!(err, SequenceError::InvalidState(_)));
}

#[tokio::test]
async fn deactivated_team_is_not_found() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = storage.create_team("benched").await.expect("team");
    storage.set_team_active(team, false).await.expect("deactivate");

    let err = controller(&storage)
        .get_progress(team)
        .await
        .expect_err("inactive");
    assert!(matches!(err, SequenceError::NotFound(id) if id == team));
}
