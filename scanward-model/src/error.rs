use std::fmt::{self, Display};

/// Errors produced by model parsing and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownStatus(String),
    UnknownSeverity(String),
    InvalidCheckType(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownStatus(raw) => {
                write!(f, "unknown status: {raw}")
            }
            ModelError::UnknownSeverity(raw) => {
                write!(f, "unknown severity: {raw}")
            }
            ModelError::InvalidCheckType(raw) => {
                write!(f, "invalid check type: {raw:?}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
