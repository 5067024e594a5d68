use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sequence::{NewSubmission, ProgressStore, StoreError, TeamStatusSink};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{
        ChallengeType, CodedRound, CompetitionStatus, QuestionType, RoundScores, SubmissionId,
        TeamId, TeamSummary,
    },
    progress::TeamProgress,
    protocol::{
        ActiveRoundCodes, CompetitionStats, RoundCodeInfo, RoundCodesResponse, RoundTwoTeamRow,
        ScoresUpdate, SubmissionRecord,
    },
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

const TEAM_COLUMNS: &str = "id, team_name, competition_status, round1_score, round2_score, round3_score, total_score, is_active, registered_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Registers a team, or reactivates an existing team with the same name.
    pub async fn create_team(&self, team_name: &str) -> Result<TeamId> {
        let rec = sqlx::query(
            "INSERT INTO teams (team_name) VALUES (?)
             ON CONFLICT(team_name) DO UPDATE SET is_active = 1
             RETURNING id",
        )
        .bind(team_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(TeamId(rec.get::<i64, _>(0)))
    }

    pub async fn set_team_active(&self, team_id: TeamId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE teams SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(team_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn team_summary(&self, team_id: TeamId) -> Result<Option<TeamSummary>> {
        let row = sqlx::query(&format!("SELECT {TEAM_COLUMNS} FROM teams WHERE id = ?"))
            .bind(team_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| team_from_row(&r)).transpose()
    }

    pub async fn list_active_teams(&self) -> Result<Vec<TeamSummary>> {
        let rows = sqlx::query(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE is_active = 1 ORDER BY registered_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(team_from_row).collect()
    }

    /// Applies an admin status/score change. Missing score fields keep their
    /// stored value and the total is always recomputed. `None` for unknown teams.
    pub async fn update_team(
        &self,
        team_id: TeamId,
        status: Option<CompetitionStatus>,
        scores: &ScoresUpdate,
    ) -> Result<Option<TeamSummary>> {
        let row = sqlx::query(
            "UPDATE teams SET
                competition_status = COALESCE(?, competition_status),
                round1_score = COALESCE(?, round1_score),
                round2_score = COALESCE(?, round2_score),
                round3_score = COALESCE(?, round3_score),
                total_score = COALESCE(?, round1_score) + COALESCE(?, round2_score) + COALESCE(?, round3_score)
             WHERE id = ?
             RETURNING id, team_name, competition_status, round1_score, round2_score, round3_score, total_score, is_active, registered_at",
        )
        .bind(status.map(CompetitionStatus::as_str))
        .bind(scores.round1)
        .bind(scores.round2)
        .bind(scores.round3)
        .bind(scores.round1)
        .bind(scores.round2)
        .bind(scores.round3)
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update team status")?;
        row.map(|r| team_from_row(&r)).transpose()
    }

    pub async fn competition_stats(&self) -> Result<CompetitionStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*),
                COALESCE(SUM(competition_status = 'registered'), 0),
                COALESCE(SUM(competition_status IN ('round1_completed', 'round2_completed', 'round3_completed')), 0),
                COALESCE(SUM(competition_status IN ('round2_completed', 'round3_completed')), 0),
                COALESCE(SUM(competition_status = 'round3_completed'), 0)
             FROM teams
             WHERE is_active = 1",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(CompetitionStats {
            total_teams: row.get::<i64, _>(0),
            registered_teams: row.get::<i64, _>(1),
            round1_completed: row.get::<i64, _>(2),
            round2_completed: row.get::<i64, _>(3),
            round3_completed: row.get::<i64, _>(4),
        })
    }

    /// Installs `code` for `round`, replacing any previous code and resetting
    /// its counters.
    pub async fn set_round_code(&self, round: CodedRound, code: &str) -> Result<RoundCodeInfo> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO round_codes (round, code, is_active, usage_count, completion_count, created_at, updated_at)
             VALUES (?, ?, 1, 0, 0, ?, ?)
             ON CONFLICT(round) DO UPDATE SET
                code = excluded.code,
                is_active = 1,
                usage_count = 0,
                completion_count = 0,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
             RETURNING round, code, is_active, usage_count, completion_count, created_at, updated_at",
        )
        .bind(round.number())
        .bind(code)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to store round {} code", round.number()))?;
        round_code_from_row(&row)
    }

    /// Deactivates the code for `round`; returns how many codes were switched off.
    pub async fn reset_round_code(&self, round: CodedRound) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE round_codes SET is_active = 0, updated_at = ? WHERE round = ? AND is_active = 1",
        )
        .bind(Utc::now())
        .bind(round.number())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn round_codes(&self) -> Result<RoundCodesResponse> {
        let rows = sqlx::query(
            "SELECT round, code, is_active, usage_count, completion_count, created_at, updated_at
             FROM round_codes",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut response = RoundCodesResponse::default();
        for row in rows {
            let info = round_code_from_row(&row)?;
            match info.round {
                CodedRound::Two => response.round2 = Some(info),
                CodedRound::Three => response.round3 = Some(info),
            }
        }
        Ok(response)
    }

    pub async fn active_round_codes(&self) -> Result<ActiveRoundCodes> {
        let codes = self.round_codes().await?;
        let active = |info: Option<RoundCodeInfo>| info.filter(|i| i.is_active).map(|i| i.code);
        Ok(ActiveRoundCodes {
            round2: active(codes.round2),
            round3: active(codes.round3),
        })
    }

    /// True when `code` matches the active code for `round`; counts the use.
    pub async fn verify_round_code(&self, round: CodedRound, code: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE round_codes SET usage_count = usage_count + 1
             WHERE round = ? AND code = ? AND is_active = 1",
        )
        .bind(round.number())
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_submissions(&self, team_id: TeamId) -> Result<Vec<SubmissionRecord>> {
        let rows = sqlx::query(
            "SELECT id, team_id, question_number, question_type, challenge_type, original_question,
                    user_solution, time_taken, attempt_number, is_correct, score, created_at
             FROM submissions
             WHERE team_id = ?
             ORDER BY id ASC",
        )
        .bind(team_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(submission_from_row).collect()
    }

    /// Round 2 rows for every active team that has started, best score first
    /// and faster teams ahead on ties.
    pub async fn round_two_rows(&self) -> Result<Vec<RoundTwoTeamRow>> {
        let rows = sqlx::query(
            "SELECT t.id, t.team_name, p.state
             FROM team_progress p
             INNER JOIN teams t ON t.id = p.team_id
             WHERE t.is_active = 1
             ORDER BY p.total_score DESC, p.total_time_taken ASC, t.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| -> Result<RoundTwoTeamRow> {
                let progress = decode_progress(&r.get::<String, _>(2))?;
                Ok(RoundTwoTeamRow {
                    team_id: TeamId(r.get::<i64, _>(0)),
                    team_name: r.get::<String, _>(1),
                    total_score: progress.total_score,
                    total_time_taken: progress.total_time_taken,
                    scores: progress.scores,
                    completed_count: progress.completed_count(),
                    is_quiz_completed: progress.is_quiz_completed,
                })
            })
            .collect()
    }
}

fn team_from_row(r: &SqliteRow) -> Result<TeamSummary> {
    let status = r
        .get::<String, _>(2)
        .parse::<CompetitionStatus>()
        .map_err(anyhow::Error::msg)?;
    Ok(TeamSummary {
        team_id: TeamId(r.get::<i64, _>(0)),
        team_name: r.get::<String, _>(1),
        competition_status: status,
        scores: RoundScores {
            round1: r.get::<i64, _>(3),
            round2: r.get::<i64, _>(4),
            round3: r.get::<i64, _>(5),
            total: r.get::<i64, _>(6),
        },
        is_active: r.get::<bool, _>(7),
        registered_at: r.get::<DateTime<Utc>, _>(8),
    })
}

fn round_code_from_row(r: &SqliteRow) -> Result<RoundCodeInfo> {
    Ok(RoundCodeInfo {
        round: CodedRound::try_from(r.get::<u8, _>(0)).map_err(anyhow::Error::msg)?,
        code: r.get::<String, _>(1),
        is_active: r.get::<bool, _>(2),
        usage_count: r.get::<i64, _>(3),
        completion_count: r.get::<i64, _>(4),
        created_at: r.get::<DateTime<Utc>, _>(5),
        updated_at: r.get::<DateTime<Utc>, _>(6),
    })
}

fn submission_from_row(r: &SqliteRow) -> Result<SubmissionRecord> {
    let question_type = r
        .get::<String, _>(3)
        .parse::<QuestionType>()
        .map_err(anyhow::Error::msg)?;
    let challenge_type = r
        .get::<Option<String>, _>(4)
        .map(|raw| raw.parse::<ChallengeType>().map_err(anyhow::Error::msg))
        .transpose()?;
    Ok(SubmissionRecord {
        id: SubmissionId(r.get::<i64, _>(0)),
        team_id: TeamId(r.get::<i64, _>(1)),
        question_number: r.get::<u8, _>(2),
        question_type,
        challenge_type,
        original_question: r.get::<String, _>(5),
        user_solution: r.get::<String, _>(6),
        time_taken: r.get::<i64, _>(7),
        attempt_number: r.get::<u8, _>(8),
        is_correct: r.get::<bool, _>(9),
        score: r.get::<i64, _>(10),
        created_at: r.get::<DateTime<Utc>, _>(11),
    })
}

fn decode_progress(state: &str) -> Result<TeamProgress> {
    serde_json::from_str(state).context("stored team progress is not valid json")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[async_trait]
impl ProgressStore for Storage {
    async fn team_is_active(&self, team_id: TeamId) -> Result<bool> {
        let row = sqlx::query("SELECT is_active FROM teams WHERE id = ?")
            .bind(team_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some_and(|r| r.get::<bool, _>(0)))
    }

    async fn load_progress(&self, team_id: TeamId) -> Result<Option<TeamProgress>> {
        let row = sqlx::query(
            "SELECT state, version, status_synced FROM team_progress WHERE team_id = ?",
        )
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| -> Result<TeamProgress> {
            let mut progress = decode_progress(&r.get::<String, _>(0))?;
            progress.version = r.get::<i64, _>(1);
            progress.status_synced = r.get::<bool, _>(2);
            Ok(progress)
        })
        .transpose()
    }

    async fn create_progress(&self, progress: &TeamProgress) -> Result<TeamProgress> {
        let state = serde_json::to_string(progress).context("failed to encode team progress")?;
        sqlx::query(
            "INSERT INTO team_progress (team_id, state, total_score, total_time_taken, completed_count, is_quiz_completed, version)
             VALUES (?, ?, ?, ?, ?, ?, 1)
             ON CONFLICT(team_id) DO NOTHING",
        )
        .bind(progress.team_id.0)
        .bind(state)
        .bind(progress.total_score)
        .bind(progress.total_time_taken)
        .bind(progress.completed_count() as i64)
        .bind(progress.is_quiz_completed)
        .execute(&self.pool)
        .await
        .context("failed to create team progress")?;

        self.load_progress(progress.team_id)
            .await?
            .with_context(|| format!("team progress {} vanished after insert", progress.team_id))
    }

    async fn save_progress(
        &self,
        progress: &TeamProgress,
        submission: &NewSubmission,
    ) -> std::result::Result<i64, StoreError> {
        let next_version = progress.version + 1;
        let mut stored = progress.clone();
        stored.version = next_version;
        let state = serde_json::to_string(&stored).context("failed to encode team progress")?;

        let mut tx = self.pool.begin().await.context("failed to open transaction")?;
        let updated = sqlx::query(
            "UPDATE team_progress SET
                state = ?,
                total_score = ?,
                total_time_taken = ?,
                completed_count = ?,
                is_quiz_completed = ?,
                version = ?,
                updated_at = CURRENT_TIMESTAMP
             WHERE team_id = ? AND version = ?",
        )
        .bind(state)
        .bind(progress.total_score)
        .bind(progress.total_time_taken)
        .bind(progress.completed_count() as i64)
        .bind(progress.is_quiz_completed)
        .bind(next_version)
        .bind(progress.team_id.0)
        .bind(progress.version)
        .execute(&mut *tx)
        .await
        .context("failed to update team progress")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.context("failed to roll back")?;
            return Err(StoreError::Conflict(progress.team_id));
        }

        sqlx::query(
            "INSERT INTO submissions (team_id, question_number, question_type, challenge_type, original_question, user_solution, time_taken, attempt_number, is_correct, score)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(submission.team_id.0)
        .bind(submission.question.number())
        .bind(submission.question_type.as_str())
        .bind(submission.challenge_type.map(ChallengeType::as_str))
        .bind(&submission.original_question)
        .bind(&submission.user_solution)
        .bind(submission.time_taken)
        .bind(submission.attempt_number)
        .bind(submission.is_correct)
        .bind(submission.score)
        .execute(&mut *tx)
        .await
        .context("failed to record submission")?;

        tx.commit().await.context("failed to commit progress")?;
        Ok(next_version)
    }

    async fn mark_status_synced(&self, team_id: TeamId) -> Result<()> {
        sqlx::query("UPDATE team_progress SET status_synced = 1 WHERE team_id = ?")
            .bind(team_id.0)
            .execute(&self.pool)
            .await
            .context("failed to mark team status synced")?;
        Ok(())
    }
}

#[async_trait]
impl TeamStatusSink for Storage {
    /// Records the Round 2 score and promotes the team, never demoting a team
    /// that is already further along or disqualified. Marks the progress as
    /// synced in the same transaction, so a redelivered signal is a no-op.
    async fn round_two_completed(&self, team_id: TeamId, round_two_score: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let synced = sqlx::query("SELECT status_synced FROM team_progress WHERE team_id = ?")
            .bind(team_id.0)
            .fetch_optional(&mut *tx)
            .await?
            .is_some_and(|r| r.get::<bool, _>(0));
        if synced {
            tx.rollback().await?;
            return Ok(());
        }

        let updated = sqlx::query(
            "UPDATE teams SET
                round2_score = ?,
                total_score = round1_score + ? + round3_score,
                competition_status = CASE
                    WHEN competition_status IN ('registered', 'round1_completed') THEN 'round2_completed'
                    ELSE competition_status
                END
             WHERE id = ?",
        )
        .bind(round_two_score)
        .bind(round_two_score)
        .bind(team_id.0)
        .execute(&mut *tx)
        .await
        .context("failed to record round 2 completion")?;
        if updated.rows_affected() == 0 {
            anyhow::bail!("team {team_id} not found");
        }

        sqlx::query(
            "UPDATE round_codes SET completion_count = completion_count + 1 WHERE round = 2",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE team_progress SET status_synced = 1 WHERE team_id = ?")
            .bind(team_id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
