//! Post-condition types for pipeline execution
//!
//! This module defines which outcome handlers apply to a sealed run.

#![allow(clippy::must_use_candidate)]

use super::types::RunOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conditions under which an outcome handler runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostCondition {
    /// Only when the run completed
    Success,
    /// When the run failed or was cancelled
    Failure,
    /// Regardless of the outcome
    Always,
}

impl PostCondition {
    /// Dispatch order: the outcome-specific handler first, then `always`
    pub const ORDER: [Self; 3] = [Self::Success, Self::Failure, Self::Always];

    /// Returns true if this condition applies to the outcome
    pub fn should_execute(&self, outcome: RunOutcome) -> bool {
        match self {
            Self::Always => true,
            Self::Success => outcome.is_success(),
            Self::Failure => !outcome.is_success(),
        }
    }
}

impl fmt::Display for PostCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Always => write!(f, "always"),
        }
    }
}
