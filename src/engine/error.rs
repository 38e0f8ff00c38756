use crate::error::{StorageError, ValidationError};

#[derive(Debug)]
pub enum GuardError {
    Validation(ValidationError),
    Storage(StorageError),
    UnknownHotel(String),
    Cancelled,
    DeadlineExceeded,
    Internal(String),
}

impl GuardError {
    /// Short machine-readable kind, used in replies.
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "validation",
            GuardError::Storage(_) => "storage",
            GuardError::UnknownHotel(_) => "unknown_hotel",
            GuardError::Cancelled => "cancelled",
            GuardError::DeadlineExceeded => "deadline_exceeded",
            GuardError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for GuardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardError::Validation(e) => write!(f, "invalid request: {e}"),
            GuardError::Storage(e) => write!(f, "{e}"),
            GuardError::UnknownHotel(id) => write!(f, "unknown hotel: {id}"),
            GuardError::Cancelled => write!(f, "request cancelled"),
            GuardError::DeadlineExceeded => write!(f, "request deadline exceeded"),
            GuardError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GuardError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardError::Validation(e) => Some(e),
            GuardError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for GuardError {
    fn from(e: StorageError) -> Self {
        GuardError::Storage(e)
    }
}

impl From<ValidationError> for GuardError {
    fn from(e: ValidationError) -> Self {
        GuardError::Validation(e)
    }
}
