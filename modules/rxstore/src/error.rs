//! Typed errors for store sessions and configuration.

use std::any::Any;

use thiserror::Error;

/// Boxed source error carried by [`StoreError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal failure of a store session.
///
/// Every variant is fatal: it is delivered once as the last item of the
/// session stream and the session is torn down.
#[derive(Debug, Error)]
pub enum StoreError<S, A> {
    /// The reducer failed on this exact state and action.
    #[error("reducer failed, state = '{state:?}', action = '{action:?}'")]
    Reducer {
        state: S,
        action: A,
        #[source]
        source: BoxError,
    },

    /// A side effect's output stream yielded an error or panicked.
    #[error("side effect '{name}' failed")]
    SideEffect {
        name: String,
        #[source]
        source: BoxError,
    },

    /// The upstream action source failed.
    #[error("upstream action source failed")]
    Upstream {
        #[source]
        source: BoxError,
    },

    /// A session task died outside user code.
    #[error("session task failed unexpectedly")]
    Internal {
        #[source]
        source: BoxError,
    },
}

/// Which producer caused a [`StoreError`]. `Internal` means the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Reducer,
    SideEffect,
    Upstream,
    Internal,
}

impl<S, A> StoreError<S, A> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Reducer { .. } => ErrorKind::Reducer,
            StoreError::SideEffect { .. } => ErrorKind::SideEffect,
            StoreError::Upstream { .. } => ErrorKind::Upstream,
            StoreError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// The underlying error, usually raised by user code.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            StoreError::Reducer { source, .. }
            | StoreError::SideEffect { source, .. }
            | StoreError::Upstream { source }
            | StoreError::Internal { source } => source.as_ref(),
        }
    }
}

/// Errors from loading a [`StoreConfig`](crate::StoreConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} (expected {expected})")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// A panic raised by user code, surfaced as an ordinary error.
#[derive(Debug, Error)]
#[error("panicked: {message}")]
pub(crate) struct Panicked {
    message: String,
}

impl Panicked {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }
}
