use shared::{
    domain::{ChallengeType, QuestionKey, QuestionType},
    progress::{QuestionState, TeamProgress},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardEntry {
    pub key: QuestionKey,
    pub question_type: QuestionType,
    pub state: QuestionState,
    pub score: i64,
    /// Only meaningful for aptitude questions; `None` for challenges.
    pub attempts_left: Option<u8>,
}

impl BoardEntry {
    pub fn is_actionable(&self) -> bool {
        self.state == QuestionState::Unlocked && self.attempts_left != Some(0)
    }
}

/// Sidebar view of the six questions, derived from the same predicate the
/// server uses to gate submissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionBoard {
    pub entries: Vec<BoardEntry>,
    pub total_score: i64,
    pub is_quiz_completed: bool,
}

impl QuestionBoard {
    pub fn from_progress(progress: &TeamProgress) -> Self {
        let entries = QuestionKey::ALL
            .iter()
            .map(|&key| {
                let question_type = if key.is_aptitude() {
                    QuestionType::Aptitude
                } else {
                    QuestionType::from(ChallengeType::ALL[key.pair_index()])
                };
                BoardEntry {
                    key,
                    question_type,
                    state: progress.question_state(key),
                    score: progress.scores.get(key),
                    attempts_left: key.is_aptitude().then(|| progress.attempts_left(key)),
                }
            })
            .collect();
        Self {
            entries,
            total_score: progress.total_score,
            is_quiz_completed: progress.is_quiz_completed,
        }
    }

    pub fn entry(&self, key: QuestionKey) -> Option<&BoardEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    /// The question the team should work on next, if any.
    pub fn current(&self) -> Option<&BoardEntry> {
        self.entries.iter().find(|entry| entry.is_actionable())
    }
}

#[cfg(test)]
#[path = "tests/board_tests.rs"]
mod tests;
