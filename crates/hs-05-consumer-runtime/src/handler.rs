//! The handler contract and error classification.

use shared_store::{StoreError, Txn};
use shared_types::{CoreError, ErrorKind, EventEnvelope};
use thiserror::Error;

/// Classified handler failure. Handlers never raise arbitrary errors; they
/// pick the class, and the class picks the recovery.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    /// Payload failed the handler's schema. Dead-lettered, never retried.
    #[error("validation: {0}")]
    Validation(String),

    /// Recoverable failure (timeout, connection). Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Unrecoverable failure (schema drift, missing referent). Straight to
    /// the DLQ.
    #[error("permanent: {0}")]
    Permanent(String),

    /// Repeated unexplained failure; parked for an operator.
    #[error("poison: {0}")]
    Poison(String),
}

impl HandlerError {
    /// The DLQ `error_kind` this class maps to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Permanent(_) => ErrorKind::Permanent,
            Self::Poison(_) => ErrorKind::Poison,
        }
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            // A store-level conflict inside a handler is not a duplicate
            // delivery (the inbox catches those); it is a data bug.
            StoreError::DuplicateKey { .. } => Self::Permanent(err.to_string()),
            StoreError::ForeignKey { .. } | StoreError::InvalidTransition { .. } => {
                Self::Permanent(err.to_string())
            }
            StoreError::NotFound { .. } => Self::Permanent(err.to_string()),
            StoreError::Aborted(core) => core.into(),
        }
    }
}

impl From<HandlerError> for CoreError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::Validation(detail) => CoreError::Validation {
                field: "payload".into(),
                detail,
            },
            HandlerError::Transient(msg) => CoreError::Transient(msg),
            HandlerError::Permanent(msg) => CoreError::Permanent(msg),
            HandlerError::Poison(msg) => CoreError::Poison(msg),
        }
    }
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        match err.kind() {
            ErrorKind::Validation => Self::Validation(err.to_string()),
            ErrorKind::Transient | ErrorKind::RateLimited | ErrorKind::CircuitOpen => {
                Self::Transient(err.to_string())
            }
            ErrorKind::Poison => Self::Poison(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

/// A consumer group's event handler.
///
/// `handle` runs inside the handler transaction: every row it touches
/// commits or rolls back together with the inbox marker. It must not block;
/// network work belongs outside the consumer (or in a follow-up event).
pub trait EventHandler: Send + Sync {
    /// Process one event against the transactional store handle.
    fn handle(&self, envelope: &EventEnvelope, txn: &mut Txn<'_>) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventEnvelope, &mut Txn<'_>) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &EventEnvelope, txn: &mut Txn<'_>) -> Result<(), HandlerError> {
        self(envelope, txn)
    }
}
