//! Error taxonomy shared by every stage of a collection cycle.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A malformed probe list or tunable. Fatal: raised before anything is measured.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("probe name must not be empty")]
    EmptyName,

    #[error("probe {name}: target must be a non-empty host name or IP literal, got {target:?}")]
    InvalidTarget { name: String, target: String },

    #[error("duplicate probe name: {0}")]
    DuplicateProbe(String),

    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),

    #[error("label {0:?} is reserved")]
    ReservedLabel(String),

    #[error("duplicate label {0:?}")]
    DuplicateLabel(String),

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// A failure scoped to a single probe. Captured into that probe's result and
/// never allowed to abort the cycle.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    #[error("measurement could not run: {0}")]
    Execution(String),

    #[error("malformed measurement output: {0}")]
    Parse(String),

    #[error("measurement timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },

    #[error("no hop responded")]
    NoResponse,
}

impl ProbeError {
    /// Stable short identifier, used as a label value.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Execution(_) => "execution",
            Self::Parse(_) => "parse",
            Self::TimedOut { .. } => "timed_out",
            Self::NoResponse => "no_response",
        }
    }

    /// Only execution failures are worth another attempt; a timeout already
    /// spent the budget and a parse error would repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }
}
