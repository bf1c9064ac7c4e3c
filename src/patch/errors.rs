//! Patch engine error types.

use thiserror::Error;

use super::strategies::MatchStrategy;

/// Errors returned when a search text cannot be located unambiguously.
///
/// Both variants are recoverable: tools surface the message to the model so
/// it can retry with a more precise search text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// No strategy in the chain located the search text.
    #[error("search text not found in content; {hint}")]
    NotFound { hint: String },

    /// The search text occurs more than once and `replace_all` was not set.
    #[error(
        "search text matches {count} locations ({strategy} match); include more surrounding \
         lines to make it unique, or set replace_all"
    )]
    AmbiguousMatch {
        count: usize,
        strategy: MatchStrategy,
    },
}

impl PatchError {
    /// Whether this error reports multiple candidate locations.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, PatchError::AmbiguousMatch { .. })
    }
}
