//! Round 2 sequencing: aptitude questions gate coding challenges, and the
//! controller serializes every load, evaluate and save cycle per team.

pub mod aptitude;
pub mod bank;
pub mod challenge;
pub mod controller;
pub mod error;
pub mod store;

pub use aptitude::AptitudeEvaluator;
pub use bank::{ChallengeGrader, Grade, QuestionBank, ReferenceGrader, ScoringTable};
pub use challenge::{ChallengeEvaluation, ChallengeEvaluator};
pub use controller::{SequenceController, TeamLocks};
pub use error::{SequenceError, StoreError};
pub use store::{NewSubmission, ProgressStore, TeamStatusSink};
