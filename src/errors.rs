//! Error types for the settlement gateway
//!
//! Every failure the engine or an adapter can produce is a value of
//! `EngineError`; nothing is thrown across the webhook boundary. The
//! webhook codecs translate these kinds into each aggregator's own wire
//! vocabulary.

use thiserror::Error;

/// Domain error taxonomy. All variants are recoverable by the caller.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient balance for player {player_id}")]
    InsufficientBalance { player_id: String },

    #[error("Bet limit exceeded for player {player_id}: requested {requested}, remaining {remaining}")]
    BetLimitExceeded {
        player_id: String,
        requested: i64,
        remaining: i64,
    },

    #[error("Session token not recognized")]
    SessionInvalid,

    #[error("Game unavailable: {0}")]
    GameUnavailable(String),

    #[error("Round {external_round_id} already finished")]
    RoundFinished { external_round_id: String },

    #[error("Round or referenced bet not found: {0}")]
    RoundNotFound(String),

    #[error("Invalid freespin preset: field '{field}': {reason}")]
    InvalidPreset { field: String, reason: String },

    /// Upstream call failed or timed out. Carries which call and which
    /// reference id so the caller can decide whether a retry is safe.
    #[error("External service failure in {call} (reference {reference}): {message}")]
    ExternalService {
        call: String,
        reference: String,
        message: String,
    },

    #[error("No adapter registered for aggregator kind '{0}'")]
    AggregatorNotSupported(String),

    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl EngineError {
    /// Shorthand for upstream failures.
    pub fn external(call: impl Into<String>, reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            call: call.into(),
            reference: reference.into(),
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = EngineError::BetLimitExceeded {
            player_id: "p1".to_string(),
            requested: 500,
            remaining: 100,
        };
        assert!(err.to_string().contains("p1"));
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_external_shorthand() {
        let err = EngineError::external("wallet.withdraw", "tx-9", "timeout");
        match err {
            EngineError::ExternalService { call, reference, .. } => {
                assert_eq!(call, "wallet.withdraw");
                assert_eq!(reference, "tx-9");
            }
            _ => panic!("expected external service error"),
        }
    }
}
