use std::error::Error as StdError;

/// Common error type for `pagesync_core`.
///
/// Request-layer failures (`Transport`, `Http`, `HttpStatus`) are the only
/// kinds the Graph client retries. Everything else fails the current branch
/// on first occurrence.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("graph api returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("backend error: {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync + 'static>,
    },

    #[error("backend error: {0}")]
    BackendMessage(String),
}

impl Error {
    #[tracing::instrument(level = "debug", name = "pagesync.error.backend", skip(source))]
    pub fn backend(
        context: impl Into<String> + std::fmt::Debug,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Convenience: a missing or mistyped field in an upstream payload.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::UnexpectedPayload(message.into())
    }

    /// Whether the request layer should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Http(_) | Self::HttpStatus { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
