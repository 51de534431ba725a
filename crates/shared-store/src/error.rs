//! Store error types.

use shared_types::CoreError;
use thiserror::Error;

/// Errors surfaced by store transactions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint was violated. `constraint` names the index,
    /// `key` the offending value.
    #[error("duplicate key on {constraint}: {key}")]
    DuplicateKey { constraint: &'static str, key: String },

    /// A referenced row does not exist (foreign-key violation).
    #[error("missing row in {table}: {key}")]
    ForeignKey { table: &'static str, key: String },

    /// Row lookup failed.
    #[error("not found in {table}: {key}")]
    NotFound { table: &'static str, key: String },

    /// An illegal state transition was attempted.
    #[error("invalid transition on {table} {key}: {detail}")]
    InvalidTransition {
        table: &'static str,
        key: String,
        detail: String,
    },

    /// Application-level abort carrying a classified core error. The
    /// transaction is rolled back and the inner error propagated.
    #[error("aborted: {0}")]
    Aborted(CoreError),
}

impl StoreError {
    /// Classify for the consumer runtime: constraint and reference failures
    /// are permanent, everything else passes through its own class.
    #[must_use]
    pub fn to_core(&self) -> CoreError {
        match self {
            Self::DuplicateKey { constraint, key } => {
                CoreError::Conflict(format!("{constraint}: {key}"))
            }
            Self::ForeignKey { table, key } => {
                CoreError::Permanent(format!("foreign key into {table}: {key}"))
            }
            Self::NotFound { table, key } => CoreError::NotFound(format!("{table}: {key}")),
            Self::InvalidTransition { table, key, detail } => {
                CoreError::Permanent(format!("{table} {key}: {detail}"))
            }
            Self::Aborted(inner) => inner.clone(),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        Self::Aborted(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::ErrorKind;

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err = StoreError::DuplicateKey {
            constraint: "inbox_pkey",
            key: "portfolio/abc".into(),
        };
        assert_eq!(err.to_core().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_foreign_key_is_permanent() {
        let err = StoreError::ForeignKey {
            table: "miners",
            key: "S1/M9".into(),
        };
        assert_eq!(err.to_core().kind(), ErrorKind::Permanent);
    }

    #[test]
    fn test_abort_passes_through() {
        let err = StoreError::Aborted(CoreError::Transient("db blip".into()));
        assert_eq!(err.to_core().kind(), ErrorKind::Transient);
    }
}
