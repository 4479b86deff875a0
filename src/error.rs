//! Error taxonomy for the IAM core.
//!
//! A single `thiserror`-derived enum carries every distinguished error kind
//! exposed across the Store Adapter, Identity Cache, Mutation Orchestrator
//! and Authorization Evaluator. Callers match on variants, not on strings.

use thiserror::Error;

/// Errors produced by any IAM core component.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IamError {
    #[error("IAM subsystem is not initialized")]
    ServerNotInitialized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no such user: {0}")]
    NoSuchUser(String),

    #[error("no such group: {0}")]
    NoSuchGroup(String),

    #[error("no such policy: {0}")]
    NoSuchPolicy(String),

    #[error("no such service account: {0}")]
    NoSuchServiceAccount(String),

    #[error("no such temp/STS user: {0}")]
    NoSuchTempUser(String),

    #[error("group is not empty: {0}")]
    GroupNotEmpty(String),

    #[error("action not allowed")]
    IamActionNotAllowed,

    #[error("underlying container is missing: {0}")]
    ContainerMissing(String),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("store operation timed out")]
    Timeout,

    #[error("malicious data detected during migration: {0}")]
    MaliciousData(String),

    #[error("claim error: {0}")]
    ClaimError(String),

    #[error("session policy too large: {0} bytes (max 16384)")]
    SessionPolicyTooLarge(usize),

    #[error("policy evaluation error: {0}")]
    EvaluationError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IamError {
    /// Transient failures that justify the bounded random backoff used
    /// during bootstrap (§4.5, §7).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IamError::StoreError(_) | IamError::Timeout | IamError::ContainerMissing(_)
        )
    }

    /// True for every `NoSuch*` kind, which delete paths suppress for
    /// idempotency (§4.1, §7).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IamError::NoSuchUser(_)
                | IamError::NoSuchGroup(_)
                | IamError::NoSuchPolicy(_)
                | IamError::NoSuchServiceAccount(_)
                | IamError::NoSuchTempUser(_)
                | IamError::ContainerMissing(_)
        )
    }
}

impl From<serde_json::Error> for IamError {
    fn from(e: serde_json::Error) -> Self {
        IamError::SerializationError(e.to_string())
    }
}

pub type IamResult<T> = Result<T, IamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_kinds_are_classified() {
        assert!(IamError::NoSuchUser("alice".into()).is_not_found());
        assert!(IamError::NoSuchPolicy("readonly".into()).is_not_found());
        assert!(!IamError::ServerNotInitialized.is_not_found());
    }

    #[test]
    fn retryable_kinds_are_classified() {
        assert!(IamError::StoreError("connection reset".into()).is_retryable());
        assert!(IamError::Timeout.is_retryable());
        assert!(!IamError::InvalidArgument("empty name".into()).is_retryable());
    }
}
