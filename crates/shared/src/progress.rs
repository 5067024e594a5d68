//! Round 2 progress ledger and the unlock predicate shared by the server
//! evaluators and client renderers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChallengeType, QuestionKey, TeamId};

pub const MAX_APTITUDE_ATTEMPTS: u8 = 2;

/// One value per Round 2 question, serialized as `{"q1": .., .., "q6": ..}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PerQuestion<T> {
    pub q1: T,
    pub q2: T,
    pub q3: T,
    pub q4: T,
    pub q5: T,
    pub q6: T,
}

impl<T: Copy> PerQuestion<T> {
    pub fn get(&self, key: QuestionKey) -> T {
        match key {
            QuestionKey::Q1 => self.q1,
            QuestionKey::Q2 => self.q2,
            QuestionKey::Q3 => self.q3,
            QuestionKey::Q4 => self.q4,
            QuestionKey::Q5 => self.q5,
            QuestionKey::Q6 => self.q6,
        }
    }

    pub fn set(&mut self, key: QuestionKey, value: T) {
        let slot = match key {
            QuestionKey::Q1 => &mut self.q1,
            QuestionKey::Q2 => &mut self.q2,
            QuestionKey::Q3 => &mut self.q3,
            QuestionKey::Q4 => &mut self.q4,
            QuestionKey::Q5 => &mut self.q5,
            QuestionKey::Q6 => &mut self.q6,
        };
        *slot = value;
    }

    pub fn values(&self) -> [T; 6] {
        [self.q1, self.q2, self.q3, self.q4, self.q5, self.q6]
    }
}

/// Attempt counters for the three aptitude questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AptitudeAttempts {
    pub q1: u8,
    pub q2: u8,
    pub q3: u8,
}

impl AptitudeAttempts {
    /// Counter for an aptitude key; challenge keys always read 0.
    pub fn get(&self, key: QuestionKey) -> u8 {
        match key {
            QuestionKey::Q1 => self.q1,
            QuestionKey::Q2 => self.q2,
            QuestionKey::Q3 => self.q3,
            _ => 0,
        }
    }

    fn slot(&mut self, key: QuestionKey) -> Option<&mut u8> {
        match key {
            QuestionKey::Q1 => Some(&mut self.q1),
            QuestionKey::Q2 => Some(&mut self.q2),
            QuestionKey::Q3 => Some(&mut self.q3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionState {
    Locked,
    Unlocked,
    Completed,
}

/// Why a question cannot be acted on right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocked {
    Locked(QuestionKey),
    AlreadyCompleted(QuestionKey),
    AttemptsExhausted(QuestionKey),
}

impl std::fmt::Display for Blocked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Blocked::Locked(key) => write!(f, "question {key} is locked"),
            Blocked::AlreadyCompleted(key) => write!(f, "question {key} is already completed"),
            Blocked::AttemptsExhausted(key) => {
                write!(f, "question {key} has no attempts left")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamProgress {
    pub team_id: TeamId,
    pub completed_questions: PerQuestion<bool>,
    pub unlocked_questions: PerQuestion<bool>,
    pub aptitude_attempts: AptitudeAttempts,
    pub scores: PerQuestion<i64>,
    pub time_taken: PerQuestion<i64>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub total_time_taken: i64,
    pub total_score: i64,
    pub is_quiz_completed: bool,
    /// Bumped by the store on every successful save; 0 means never persisted.
    #[serde(default)]
    pub version: i64,
    /// Set once the team record reflects round 2 completion.
    #[serde(default)]
    pub status_synced: bool,
}

impl TeamProgress {
    pub fn fresh(team_id: TeamId, now: DateTime<Utc>) -> Self {
        let mut unlocked_questions = PerQuestion::default();
        unlocked_questions.set(QuestionKey::Q1, true);
        Self {
            team_id,
            completed_questions: PerQuestion::default(),
            unlocked_questions,
            aptitude_attempts: AptitudeAttempts::default(),
            scores: PerQuestion::default(),
            time_taken: PerQuestion::default(),
            start_time: now,
            end_time: None,
            total_time_taken: 0,
            total_score: 0,
            is_quiz_completed: false,
            version: 0,
            status_synced: false,
        }
    }

    /// Completed but the team record has not been promoted yet.
    pub fn needs_status_sync(&self) -> bool {
        self.is_quiz_completed && !self.status_synced
    }

    pub fn question_state(&self, key: QuestionKey) -> QuestionState {
        if self.completed_questions.get(key) {
            QuestionState::Completed
        } else if self.unlocked_questions.get(key) {
            QuestionState::Unlocked
        } else {
            QuestionState::Locked
        }
    }

    pub fn attempts_left(&self, key: QuestionKey) -> u8 {
        MAX_APTITUDE_ATTEMPTS.saturating_sub(self.aptitude_attempts.get(key))
    }

    pub fn completed_count(&self) -> usize {
        self.completed_questions
            .values()
            .into_iter()
            .filter(|done| *done)
            .count()
    }

    pub fn all_completed(&self) -> bool {
        self.completed_count() == QuestionKey::ALL.len()
    }

    /// Gate for answering an aptitude question.
    pub fn can_answer_aptitude(&self, key: QuestionKey) -> Result<(), Blocked> {
        match self.question_state(key) {
            QuestionState::Locked => Err(Blocked::Locked(key)),
            QuestionState::Completed => Err(Blocked::AlreadyCompleted(key)),
            QuestionState::Unlocked if self.attempts_left(key) == 0 => {
                Err(Blocked::AttemptsExhausted(key))
            }
            QuestionState::Unlocked => Ok(()),
        }
    }

    /// Gate for submitting a challenge. A challenge is only ever unlocked by
    /// resolving its paired aptitude question.
    pub fn can_submit_challenge(&self, challenge: ChallengeType) -> Result<(), Blocked> {
        let key = challenge.question_key();
        match self.question_state(key) {
            QuestionState::Locked => Err(Blocked::Locked(key)),
            QuestionState::Completed => Err(Blocked::AlreadyCompleted(key)),
            QuestionState::Unlocked => Ok(()),
        }
    }

    /// Counts one attempt against an aptitude key and returns the new total.
    pub fn record_attempt(&mut self, key: QuestionKey) -> u8 {
        match self.aptitude_attempts.slot(key) {
            Some(slot) => {
                *slot = (*slot + 1).min(MAX_APTITUDE_ATTEMPTS);
                *slot
            }
            None => 0,
        }
    }

    /// Marks an aptitude question resolved and unlocks its challenge.
    pub fn resolve_aptitude(
        &mut self,
        key: QuestionKey,
        score: i64,
        time_taken: i64,
    ) -> Option<ChallengeType> {
        self.complete(key, score, time_taken);
        let challenge = key.paired_challenge()?;
        self.unlocked_questions.set(challenge.question_key(), true);
        Some(challenge)
    }

    /// Marks a challenge completed and unlocks the next aptitude question.
    pub fn resolve_challenge(
        &mut self,
        challenge: ChallengeType,
        score: i64,
        time_taken: i64,
    ) -> Option<QuestionKey> {
        self.complete(challenge.question_key(), score, time_taken);
        let next = challenge.next_aptitude()?;
        self.unlocked_questions.set(next, true);
        Some(next)
    }

    /// Accumulates time for a failed aptitude attempt that keeps the question open.
    pub fn add_time(&mut self, key: QuestionKey, time_taken: i64) {
        self.time_taken
            .set(key, self.time_taken.get(key) + time_taken.max(0));
    }

    /// Closes the round once all six positions are done. Returns true only on
    /// the transition into the completed state.
    pub fn finish_if_complete(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_quiz_completed || !self.all_completed() {
            return false;
        }
        self.is_quiz_completed = true;
        self.end_time = Some(now);
        self.total_time_taken = self.time_taken.values().iter().sum();
        self.total_score = self.scores.values().iter().sum();
        true
    }

    fn complete(&mut self, key: QuestionKey, score: i64, time_taken: i64) {
        self.completed_questions.set(key, true);
        self.scores.set(key, score);
        self.add_time(key, time_taken);
        self.total_score = self.scores.values().iter().sum();
        self.total_time_taken = self.time_taken.values().iter().sum();
    }
}

#[cfg(test)]
#[path = "tests/progress_tests.rs"]
mod tests;
