//! Error types for the altitude round engine.
//!
//! Admission errors (`WindowClosed`, `InvalidStake`, `InsufficientFunds`) are
//! returned synchronously to the caller and never retried engine-side.
//! Settlement-path credit failures are retried by the credit worker until
//! they succeed or are escalated; they never surface here.

use uuid::Uuid;

/// Root error type for all engine operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("betting window is closed for the current round")]
    WindowClosed,

    #[error("invalid stake: {0}")]
    InvalidStake(String),

    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("bet already settled")]
    AlreadySettled,

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("bet not found: {0}")]
    BetNotFound(Uuid),

    #[error("round not found: {0}")]
    RoundNotFound(u64),

    #[error("crash point derivation failed: {0}")]
    FairnessDerivationFailed(String),

    #[error("collaborator call timed out after {0}ms")]
    CollaboratorTimeout(u64),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

/// Convenience type alias for engine results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::CollaboratorTimeout(2000);
        assert!(err.to_string().contains("2000ms"));

        let err = EngineError::InvalidStake("stake must be positive".to_string());
        assert!(err.to_string().contains("stake must be positive"));
    }

    #[test]
    fn test_errors_are_comparable() {
        // Callers match on benign race outcomes, so equality must hold.
        assert_eq!(EngineError::AlreadySettled, EngineError::AlreadySettled);
        assert_ne!(EngineError::AlreadySettled, EngineError::WindowClosed);
    }
}
