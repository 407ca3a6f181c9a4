//! Error taxonomy for the timeline pipeline.
//!
//! Only [`TimelineError::DateFormat`] is fatal for a run. The other
//! variants are raised inside a single query unit and are absorbed by the
//! retry loop in [`crate::fetch`].

use thiserror::Error;

/// Failures produced by planning, parsing, and fetching.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// A range bound could not be parsed as a `YYYY-MM` value.
    #[error("invalid date '{input}', expected YYYY-MM: {reason}")]
    DateFormat { input: String, reason: String },

    /// The reply text held no parseable array of event objects.
    #[error("failed to parse reply: {0}")]
    Parse(String),

    /// The reference list was absent, or an entry had a missing,
    /// out-of-range, or duplicate id.
    #[error("invalid reference id: {0}")]
    ReferenceId(String),

    /// The answer service call itself failed.
    #[error("answer service transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for TimelineError {
    fn from(err: reqwest::Error) -> Self {
        TimelineError::Transport(err.to_string())
    }
}
