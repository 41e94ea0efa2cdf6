//! Position-balanced duel scoring.
//!
//! A duel evaluates two candidate renders of the same prompt twice: call A
//! shows (model 1, model 2), call B shows (model 2, model 1). Each call
//! reports a 0-10 penalty per position. Averaging each model's penalty over
//! both positions cancels the judge's position bias.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::CoreError;

/// Largest penalty a judge may assign.
pub const MAX_PENALTY: u8 = 10;

/// Averaged penalty differences up to this value are a draw.
pub const DRAW_BAND: f64 = 1.0;

/// Separator used when both calls report different issues.
const ISSUE_SEPARATOR: &str = " | ";

/// One judge call's verdict, in presentation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Penalty for the first image shown (0 = perfect match).
    #[serde(deserialize_with = "whole_penalty")]
    pub penalty_1: u8,
    /// Penalty for the second image shown.
    #[serde(deserialize_with = "whole_penalty")]
    pub penalty_2: u8,
    /// Short human-readable summary of the problems found.
    pub issues: String,
}

impl JudgeVerdict {
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, value) in [("penalty_1", self.penalty_1), ("penalty_2", self.penalty_2)] {
            if value > MAX_PENALTY {
                return Err(CoreError::Validation(format!(
                    "{name} must be within 0..={MAX_PENALTY}, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Judges sometimes answer `3.0` for `3`. Whole floats are accepted;
/// fractional or negative values are not.
fn whole_penalty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || !(0.0..=f64::from(u8::MAX)).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "penalty must be a whole number, got {value}"
        )));
    }
    Ok(value as u8)
}

/// Final duel outcome: `-1` model 1 wins, `0` draw, `1` model 2 wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Outcome {
    FirstWins,
    Draw,
    SecondWins,
}

impl Outcome {
    pub fn as_i8(self) -> i8 {
        match self {
            Self::FirstWins => -1,
            Self::Draw => 0,
            Self::SecondWins => 1,
        }
    }

    /// The outcome with the two models' roles exchanged.
    pub fn flipped(self) -> Self {
        match self {
            Self::FirstWins => Self::SecondWins,
            Self::Draw => Self::Draw,
            Self::SecondWins => Self::FirstWins,
        }
    }
}

impl From<Outcome> for i8 {
    fn from(value: Outcome) -> Self {
        value.as_i8()
    }
}

impl TryFrom<i8> for Outcome {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::FirstWins),
            0 => Ok(Self::Draw),
            1 => Ok(Self::SecondWins),
            other => Err(format!("duel outcome must be -1, 0 or 1, got {other}")),
        }
    }
}

/// Result of one duel, as persisted in the duel results file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelResult {
    pub outcome: Outcome,
    pub issues: String,
}

/// Combine the verdicts of the straight call (`a`: model 1 first) and the
/// swapped call (`b`: model 2 first) into one duel result.
pub fn combine(a: &JudgeVerdict, b: &JudgeVerdict) -> DuelResult {
    let first = (f64::from(a.penalty_1) + f64::from(b.penalty_2)) / 2.0;
    let second = (f64::from(a.penalty_2) + f64::from(b.penalty_1)) / 2.0;

    let outcome = if (first - second).abs() <= DRAW_BAND {
        Outcome::Draw
    } else if first < second {
        Outcome::FirstWins
    } else {
        Outcome::SecondWins
    };

    DuelResult {
        outcome,
        issues: merge_issues(&a.issues, &b.issues),
    }
}

fn merge_issues(a: &str, b: &str) -> String {
    let (a, b) = (a.trim(), b.trim());
    if b.is_empty() || a == b {
        a.to_string()
    } else if a.is_empty() {
        b.to_string()
    } else {
        format!("{a}{ISSUE_SEPARATOR}{b}")
    }
}
