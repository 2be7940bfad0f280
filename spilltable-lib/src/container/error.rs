use crate::data::CellTypeId;
use core::error::Error;
use ohno::AppError;

/// Failure conditions raised by the storage engine.
///
/// These travel inside an [`AppError`]; use [`error_kind`] to classify an error returned by any
/// engine operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    /// The caller handed in a row or schema that does not fit.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The operation is not legal in the container's current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The bytes of a container file are not what the format requires.
    #[error("corrupt container: {0}")]
    FormatCorruption(String),

    /// More distinct value types were written than the tag range can address.
    #[error("too many different value types in one container (limit is {limit})")]
    TagBudgetExhausted { limit: usize },

    /// A value has neither a compact nor a fallback codec.
    #[error("value type '{0}' has no registered serializer")]
    Unserializable(CellTypeId),

    /// A progress collaborator asked for the operation to stop.
    #[error("operation canceled")]
    Canceled,
}

/// Coarse classification of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    SchemaViolation,
    IllegalState,
    Io,
    FormatCorruption,
    TagBudgetExhausted,
    Unserializable,
    Canceled,
    Other,
}

/// Classifies an error by walking its source chain.
#[must_use]
pub fn error_kind(err: &AppError) -> ErrorKind {
    let mut current: Option<&(dyn Error + 'static)> = err.source();
    while let Some(e) = current {
        if let Some(ce) = e.downcast_ref::<ContainerError>() {
            return match ce {
                ContainerError::SchemaViolation(_) => ErrorKind::SchemaViolation,
                ContainerError::IllegalState(_) => ErrorKind::IllegalState,
                ContainerError::FormatCorruption(_) => ErrorKind::FormatCorruption,
                ContainerError::TagBudgetExhausted { .. } => ErrorKind::TagBudgetExhausted,
                ContainerError::Unserializable(_) => ErrorKind::Unserializable,
                ContainerError::Canceled => ErrorKind::Canceled,
            };
        }

        if e.is::<std::io::Error>() {
            return ErrorKind::Io;
        }

        current = e.source();
    }

    ErrorKind::Other
}

pub(crate) fn schema_violation(msg: impl Into<String>) -> AppError {
    AppError::new(ContainerError::SchemaViolation(msg.into()))
}

pub(crate) fn illegal_state(msg: impl Into<String>) -> AppError {
    AppError::new(ContainerError::IllegalState(msg.into()))
}

pub(crate) fn corruption(msg: impl Into<String>) -> AppError {
    AppError::new(ContainerError::FormatCorruption(msg.into()))
}
