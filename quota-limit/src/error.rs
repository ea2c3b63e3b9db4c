use std::time::Duration;

/// Type-erased error raised by a store backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while building a limiter or reaching a decision.
#[derive(Debug, thiserror::Error)]
pub enum LimitError {
    /// The state store could not be reached or refused the operation.
    ///
    /// The backend error is kept verbatim as the source.
    #[error("state store unavailable: {0}")]
    Unavailable(#[source] BoxError),

    /// A record could not be converted to or from its stored form.
    #[error("stored state for {key:?} is corrupt")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The limiter configuration was rejected at construction time.
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(String),

    /// A store round trip did not finish within its deadline.
    #[error("state store did not answer within {0:?}")]
    Timeout(Duration),
}

impl LimitError {
    pub(crate) fn unavailable<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Unavailable(Box::new(err))
    }
}
