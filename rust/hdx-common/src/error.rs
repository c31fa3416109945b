use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

/// Cloneable error source.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn invalid_size(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidSize {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn invalid_state(operation: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidState {
                operation: operation.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn unsupported_backend(backend: impl Into<String>) -> Error {
        Error(
            ErrorKind::UnsupportedBackend {
                backend: backend.into(),
            }
            .into(),
        )
    }

    pub fn allocation_failure(size: usize, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::AllocationFailure {
                size,
                message: message.into(),
                source: None,
            }
            .into(),
        )
    }

    pub fn allocation_io(size: usize, source: std::io::Error) -> Error {
        Error(
            ErrorKind::AllocationFailure {
                size,
                message: source.to_string(),
                source: Some(Arc::new(source)),
            }
            .into(),
        )
    }

    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::BackendError {
                backend: backend.into(),
                message: message.into(),
                source: None,
            }
            .into(),
        )
    }

    pub fn backend_with_source<E>(
        backend: impl Into<String>,
        message: impl Into<String>,
        source: E,
    ) -> Error
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error(
            ErrorKind::BackendError {
                backend: backend.into(),
                message: message.into(),
                source: Some(Arc::new(source)),
            }
            .into(),
        )
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        Error(
            ErrorKind::InvalidArgument {
                name: name.into(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub fn is_invalid_size(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidSize { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidState { .. })
    }

    pub fn is_unsupported_backend(&self) -> bool {
        matches!(self.kind(), ErrorKind::UnsupportedBackend { .. })
    }

    pub fn is_allocation_failure(&self) -> bool {
        matches!(self.kind(), ErrorKind::AllocationFailure { .. })
    }

    pub fn is_backend_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::BackendError { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum ErrorKind {
    #[error("invalid size for {name}: {message}")]
    InvalidSize { name: String, message: String },

    #[error("invalid state for {operation}: {message}")]
    InvalidState { operation: String, message: String },

    #[error("backend '{backend}' is not registered")]
    UnsupportedBackend { backend: String },

    #[error("failed to allocate {size} bytes: {message}")]
    AllocationFailure {
        size: usize,
        message: String,
        #[source]
        source: Option<SharedError>,
    },

    #[error("[{backend}] transfer failed: {message}")]
    BackendError {
        backend: String,
        message: String,
        #[source]
        source: Option<SharedError>,
    },

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
