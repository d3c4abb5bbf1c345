//! Error types
//!
//! Each boundary gets its own enum. Only [`ExtractionError`] is ever returned
//! from a finished run; the others are folded into soft misses or surface
//! while loading configuration.

use thiserror::Error;

use crate::engine::StrategyOutcome;

/// Signals raised by a [`DocumentAccessor`](crate::accessor::DocumentAccessor)
/// while answering a single lookup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AccessError {
    /// The pattern could not be evaluated against the document.
    #[error("selector `{pattern}` is malformed: {reason}")]
    Malformed { pattern: String, reason: String },

    /// The document went away mid-run (closed page, crashed renderer).
    #[error("document unavailable: {0}")]
    Unavailable(String),
}

/// Failures while obtaining a document for a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    Status { status: u16, url: String },
}

/// Failures of the LLM-assisted guesser.
#[derive(Debug, Error)]
pub enum GuessError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("model reply was not a product object: {0}")]
    Malformed(String),
}

/// Failures while loading or validating strategy definitions.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("strategy definitions are not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot read strategy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("strategy \"{strategy}\" is invalid: {reason}")]
    Invalid { strategy: String, reason: String },
}

/// Bad value in the process environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value \"{value}\": {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// The two failures a caller of the engine can observe.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Every step of the chain ran and no field was populated.
    #[error("no product data found for {url} (tried: {})", tried_names(.outcomes))]
    TotalMiss {
        url: String,
        timed_out: bool,
        outcomes: Vec<StrategyOutcome>,
    },

    /// No document could be produced, so no strategy ran.
    #[error("document for {url} is unavailable: {source}")]
    AccessorUnavailable {
        url: String,
        #[source]
        source: FetchError,
    },
}

impl ExtractionError {
    /// Names of the steps that were attempted before the failure.
    pub fn strategies_tried(&self) -> Vec<String> {
        match self {
            Self::TotalMiss { outcomes, .. } => {
                outcomes.iter().map(|o| o.strategy.clone()).collect()
            }
            Self::AccessorUnavailable { .. } => Vec::new(),
        }
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, Self::TotalMiss { timed_out: true, .. })
    }
}

fn tried_names(outcomes: &[StrategyOutcome]) -> String {
    if outcomes.is_empty() {
        return "nothing".to_string();
    }
    outcomes
        .iter()
        .map(|o| o.strategy.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
