use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(TeamId);
id_newtype!(SubmissionId);

/// The six Round 2 positions. `Q1..Q3` are aptitude questions, `Q4..Q6`
/// the coding challenges paired with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKey {
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
    Q6,
}

impl QuestionKey {
    pub const ALL: [QuestionKey; 6] = [
        QuestionKey::Q1,
        QuestionKey::Q2,
        QuestionKey::Q3,
        QuestionKey::Q4,
        QuestionKey::Q5,
        QuestionKey::Q6,
    ];

    pub const APTITUDE: [QuestionKey; 3] = [QuestionKey::Q1, QuestionKey::Q2, QuestionKey::Q3];

    /// Aptitude key for a zero-based step index.
    pub fn aptitude(index: usize) -> Option<Self> {
        Self::APTITUDE.get(index).copied()
    }

    pub fn number(self) -> u8 {
        match self {
            QuestionKey::Q1 => 1,
            QuestionKey::Q2 => 2,
            QuestionKey::Q3 => 3,
            QuestionKey::Q4 => 4,
            QuestionKey::Q5 => 5,
            QuestionKey::Q6 => 6,
        }
    }

    pub fn is_aptitude(self) -> bool {
        self.number() <= 3
    }

    /// Zero-based index within its half of the sequence.
    pub fn pair_index(self) -> usize {
        usize::from((self.number() - 1) % 3)
    }

    /// The challenge an aptitude key unlocks, or `None` for challenge keys.
    pub fn paired_challenge(self) -> Option<ChallengeType> {
        if self.is_aptitude() {
            Some(ChallengeType::ALL[self.pair_index()])
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionKey::Q1 => "q1",
            QuestionKey::Q2 => "q2",
            QuestionKey::Q3 => "q3",
            QuestionKey::Q4 => "q4",
            QuestionKey::Q5 => "q5",
            QuestionKey::Q6 => "q6",
        }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    Debug,
    Trace,
    Program,
}

impl ChallengeType {
    pub const ALL: [ChallengeType; 3] = [
        ChallengeType::Debug,
        ChallengeType::Trace,
        ChallengeType::Program,
    ];

    pub fn question_key(self) -> QuestionKey {
        match self {
            ChallengeType::Debug => QuestionKey::Q4,
            ChallengeType::Trace => QuestionKey::Q5,
            ChallengeType::Program => QuestionKey::Q6,
        }
    }

    pub fn aptitude_key(self) -> QuestionKey {
        match self {
            ChallengeType::Debug => QuestionKey::Q1,
            ChallengeType::Trace => QuestionKey::Q2,
            ChallengeType::Program => QuestionKey::Q3,
        }
    }

    /// Aptitude question unlocked once this challenge is completed.
    pub fn next_aptitude(self) -> Option<QuestionKey> {
        match self {
            ChallengeType::Debug => Some(QuestionKey::Q2),
            ChallengeType::Trace => Some(QuestionKey::Q3),
            ChallengeType::Program => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeType::Debug => "debug",
            ChallengeType::Trace => "trace",
            ChallengeType::Program => "program",
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(ChallengeType::Debug),
            "trace" => Ok(ChallengeType::Trace),
            "program" => Ok(ChallengeType::Program),
            other => Err(format!("unknown challenge type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Aptitude,
    Debug,
    Trace,
    Program,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::Aptitude => "aptitude",
            QuestionType::Debug => "debug",
            QuestionType::Trace => "trace",
            QuestionType::Program => "program",
        }
    }
}

impl From<ChallengeType> for QuestionType {
    fn from(value: ChallengeType) -> Self {
        match value {
            ChallengeType::Debug => QuestionType::Debug,
            ChallengeType::Trace => QuestionType::Trace,
            ChallengeType::Program => QuestionType::Program,
        }
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aptitude" => Ok(QuestionType::Aptitude),
            other => other.parse::<ChallengeType>().map(QuestionType::from),
        }
    }
}

/// Overall competition standing of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionStatus {
    Registered,
    Round1Completed,
    Round2Completed,
    Round3Completed,
    Disqualified,
}

impl CompetitionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CompetitionStatus::Round3Completed | CompetitionStatus::Disqualified
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionStatus::Registered => "registered",
            CompetitionStatus::Round1Completed => "round1_completed",
            CompetitionStatus::Round2Completed => "round2_completed",
            CompetitionStatus::Round3Completed => "round3_completed",
            CompetitionStatus::Disqualified => "disqualified",
        }
    }
}

impl fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompetitionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(CompetitionStatus::Registered),
            "round1_completed" => Ok(CompetitionStatus::Round1Completed),
            "round2_completed" => Ok(CompetitionStatus::Round2Completed),
            "round3_completed" => Ok(CompetitionStatus::Round3Completed),
            "disqualified" => Ok(CompetitionStatus::Disqualified),
            other => Err(format!("invalid competition status '{other}'")),
        }
    }
}

/// Rounds gated by an access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum CodedRound {
    Two,
    Three,
}

impl CodedRound {
    pub fn number(self) -> u8 {
        match self {
            CodedRound::Two => 2,
            CodedRound::Three => 3,
        }
    }
}

impl TryFrom<u8> for CodedRound {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(CodedRound::Two),
            3 => Ok(CodedRound::Three),
            other => Err(format!("round must be 2 or 3, got {other}")),
        }
    }
}

impl From<CodedRound> for u8 {
    fn from(value: CodedRound) -> Self {
        value.number()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoundScores {
    pub round1: i64,
    pub round2: i64,
    pub round3: i64,
    pub total: i64,
}

impl RoundScores {
    pub fn new(round1: i64, round2: i64, round3: i64) -> Self {
        Self {
            round1,
            round2,
            round3,
            total: round1 + round2 + round3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_id: TeamId,
    pub team_name: String,
    pub competition_status: CompetitionStatus,
    pub scores: RoundScores,
    pub is_active: bool,
    pub registered_at: chrono::DateTime<chrono::Utc>,
}
