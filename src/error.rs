//! Error types for the ballot pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between casting a vote and reading the result.
#[derive(Error, Debug)]
pub enum Error {
    /// The candidate choice is outside `1..=num_candidates`.
    #[error("invalid vote {choice}: please enter a number between 1 and {num_candidates}")]
    InvalidChoice { choice: usize, num_candidates: usize },

    /// The ballot store (or another pipeline file) could not be opened.
    #[error("failed to open {path}: {source}")]
    StorageOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record in the ballot store is truncated or corrupt.
    #[error("failed to load encrypted ballot #{index}: {reason}")]
    Deserialization { index: usize, reason: String },

    /// The store holds no ballots; there is nothing to decode.
    #[error("no votes have been cast")]
    EmptyStore,

    /// The tally's noise budget is gone; decrypted values would be garbage.
    #[error("noise budget exhausted after {ballots} ballots, the tally cannot be trusted")]
    NoiseBudgetExhausted { ballots: usize },

    /// The decrypted tally does not add up to the number of ballots summed.
    #[error("decrypted tally is inconsistent: {0}")]
    InconsistentTally(String),

    /// The pipeline was asked to move backwards or skip a phase.
    #[error("cannot {action} while the election is {phase}")]
    Phase { action: &'static str, phase: String },

    /// A tally or key file exists but does not hold what it should.
    #[error("corrupt {what} {path}: {reason}")]
    CorruptFile {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The scheme parameters are unusable.
    #[error("invalid scheme parameters: {0}")]
    Parameters(String),

    /// Error reported by the homomorphic engine.
    #[error("homomorphic engine error: {0}")]
    Engine(#[from] fhe::Error),

    /// Framing a ballot or tally for disk failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller should simply ask the voter again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidChoice { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_choice_is_recoverable() {
        let err = Error::InvalidChoice {
            choice: 11,
            num_candidates: 10,
        };
        assert!(err.is_recoverable());
        assert_eq!(
            err.to_string(),
            "invalid vote 11: please enter a number between 1 and 10"
        );
    }

    #[test]
    fn storage_errors_are_not_recoverable() {
        assert!(!Error::EmptyStore.is_recoverable());
        assert!(!Error::Deserialization {
            index: 2,
            reason: "unexpected end of file".into()
        }
        .is_recoverable());
    }
}
