//! Question bank, scoring table and the reference challenge grader.

use std::{fs, path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{ChallengeType, QuestionKey, QuestionType},
    protocol::PublicQuestion,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AptitudeQuestion {
    pub prompt: String,
    pub options: Vec<String>,
    pub answer: String,
}

impl AptitudeQuestion {
    pub fn accepts(&self, selection: &str) -> bool {
        self.answer.trim().eq_ignore_ascii_case(selection.trim())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum GradingRule {
    /// Whole submission must match after whitespace normalization.
    ExpectedOutput { output: String },
    /// Partial credit per fragment present, whitespace-insensitive.
    RequiredFragments { fragments: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeSpec {
    pub prompt: String,
    pub snippet: String,
    pub rule: GradingRule,
    pub max_score: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoringTable {
    pub aptitude_points: i64,
}

impl Default for ScoringTable {
    fn default() -> Self {
        Self {
            aptitude_points: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionBank {
    pub aptitude: Vec<AptitudeQuestion>,
    pub debug: ChallengeSpec,
    pub trace: ChallengeSpec,
    pub program: ChallengeSpec,
    #[serde(default)]
    pub scoring: ScoringTable,
}

impl QuestionBank {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read question bank '{}'", path.display()))?;
        let bank: QuestionBank = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse question bank '{}'", path.display()))?;
        bank.validate()?;
        Ok(bank)
    }

    pub fn validate(&self) -> Result<()> {
        if self.aptitude.len() != QuestionKey::APTITUDE.len() {
            bail!(
                "question bank needs exactly {} aptitude questions, found {}",
                QuestionKey::APTITUDE.len(),
                self.aptitude.len()
            );
        }
        for (index, question) in self.aptitude.iter().enumerate() {
            if question.answer.trim().is_empty() {
                bail!("aptitude question {} has an empty answer", index + 1);
            }
        }
        for challenge in ChallengeType::ALL {
            let spec = self.challenge(challenge);
            if spec.max_score < 0 {
                bail!("{challenge} challenge has a negative max score");
            }
            if let GradingRule::RequiredFragments { fragments } = &spec.rule {
                if fragments.is_empty() {
                    bail!("{challenge} challenge lists no required fragments");
                }
            }
        }
        Ok(())
    }

    pub fn aptitude_question(&self, key: QuestionKey) -> Option<&AptitudeQuestion> {
        if !key.is_aptitude() {
            return None;
        }
        self.aptitude.get(key.pair_index())
    }

    pub fn challenge(&self, challenge: ChallengeType) -> &ChallengeSpec {
        match challenge {
            ChallengeType::Debug => &self.debug,
            ChallengeType::Trace => &self.trace,
            ChallengeType::Program => &self.program,
        }
    }

    /// Prompts safe to hand to teams; answers and grading rules stay server-side.
    pub fn public_questions(&self) -> Vec<PublicQuestion> {
        let aptitude = QuestionKey::APTITUDE
            .iter()
            .zip(&self.aptitude)
            .map(|(key, question)| PublicQuestion {
                key: *key,
                question_type: QuestionType::Aptitude,
                prompt: question.prompt.clone(),
                options: question.options.clone(),
            });
        let challenges = ChallengeType::ALL.iter().map(|challenge| {
            let spec = self.challenge(*challenge);
            PublicQuestion {
                key: challenge.question_key(),
                question_type: QuestionType::from(*challenge),
                prompt: format!("{}\n\n{}", spec.prompt, spec.snippet),
                options: Vec::new(),
            }
        });
        aptitude.chain(challenges).collect()
    }
}

impl Default for QuestionBank {
    fn default() -> Self {
        Self {
            aptitude: vec![
                AptitudeQuestion {
                    prompt: "What is the size of `char` in C on every conforming implementation?"
                        .into(),
                    options: vec![
                        "1 byte".into(),
                        "2 bytes".into(),
                        "4 bytes".into(),
                        "Implementation defined".into(),
                    ],
                    answer: "1 byte".into(),
                },
                AptitudeQuestion {
                    prompt: "A train 120 m long passes a pole in 6 seconds. What is its speed in km/h?"
                        .into(),
                    options: vec!["60".into(), "72".into(), "80".into(), "90".into()],
                    answer: "72".into(),
                },
                AptitudeQuestion {
                    prompt: "Which value does `5 / 2 * 2.0` evaluate to in C?".into(),
                    options: vec!["4.0".into(), "5.0".into(), "4".into(), "5".into()],
                    answer: "4.0".into(),
                },
            ],
            debug: ChallengeSpec {
                prompt: "Fix the function so it returns the sum of the first n array elements."
                    .into(),
                snippet: "int sum(int *a, int n) {\n    int s;\n    for (int i = 0; i <= n; i++)\n        s += a[i];\n    return s;\n}"
                    .into(),
                rule: GradingRule::RequiredFragments {
                    fragments: vec![
                        "int s = 0;".into(),
                        "i < n;".into(),
                        "return s;".into(),
                    ],
                },
                max_score: 20,
            },
            trace: ChallengeSpec {
                prompt: "What does this program print?".into(),
                snippet: "int f(int n) { return n <= 1 ? 1 : n * f(n - 1); }\nint main(void) { printf(\"%d\", f(5)); }"
                    .into(),
                rule: GradingRule::ExpectedOutput {
                    output: "120".into(),
                },
                max_score: 20,
            },
            program: ChallengeSpec {
                prompt: "Write a program that reads a string and prints it reversed.".into(),
                snippet: "#include <stdio.h>\n#include <string.h>\n\nint main(void) {\n    /* your code */\n}"
                    .into(),
                rule: GradingRule::RequiredFragments {
                    fragments: vec![
                        "strlen(".into(),
                        "for(".into(),
                        "printf(".into(),
                        "return 0;".into(),
                    ],
                },
                max_score: 20,
            },
            scoring: ScoringTable::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grade {
    pub passed: bool,
    pub score: i64,
}

/// Pass/fail plus partial credit for a challenge submission.
#[async_trait]
pub trait ChallengeGrader: Send + Sync {
    async fn grade(&self, challenge: ChallengeType, code: &str) -> Result<Grade>;
}

pub struct ReferenceGrader {
    bank: Arc<QuestionBank>,
}

impl ReferenceGrader {
    pub fn new(bank: Arc<QuestionBank>) -> Self {
        Self { bank }
    }
}

#[async_trait]
impl ChallengeGrader for ReferenceGrader {
    async fn grade(&self, challenge: ChallengeType, code: &str) -> Result<Grade> {
        let spec = self.bank.challenge(challenge);
        let submitted = squash_whitespace(code);
        if submitted.is_empty() {
            return Ok(Grade {
                passed: false,
                score: 0,
            });
        }

        let grade = match &spec.rule {
            GradingRule::ExpectedOutput { output } => {
                let passed = submitted == squash_whitespace(output);
                Grade {
                    passed,
                    score: if passed { spec.max_score } else { 0 },
                }
            }
            GradingRule::RequiredFragments { fragments } => {
                let total = fragments.len() as i64;
                let hits = fragments
                    .iter()
                    .filter(|fragment| submitted.contains(&squash_whitespace(fragment)))
                    .count() as i64;
                Grade {
                    passed: hits == total,
                    score: spec.max_score * hits / total.max(1),
                }
            }
        };
        Ok(grade)
    }
}

fn squash_whitespace(input: &str) -> String {
    input.chars().filter(|c| !c.is_whitespace()).collect()
}
