use thiserror::Error;

pub type Result<T> = std::result::Result<T, VigilError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VigilError {
    #[error("value is not observable: {shape}")]
    NotObservable { shape: String },

    #[error("operation requires the root wrapper of its observer, got wrapper at {path}")]
    NotRootObservable { path: String },

    #[error("stale wrapper reference at {path}")]
    StaleReference { path: String },

    #[error("invalid state transition: {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: &'static str,
    },

    #[error("{operation} is not supported by {shape} wrappers")]
    UnsupportedOperation {
        shape: String,
        operation: &'static str,
    },

    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl VigilError {
    #[must_use]
    pub fn not_observable(shape: impl Into<String>) -> Self {
        Self::NotObservable {
            shape: shape.into(),
        }
    }

    #[must_use]
    pub fn unsupported(shape: impl Into<String>, operation: &'static str) -> Self {
        Self::UnsupportedOperation {
            shape: shape.into(),
            operation,
        }
    }
}
