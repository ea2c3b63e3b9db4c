/// Errors produced by the Tower Quota middleware.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuotaError {
    /// No identity could be extracted from the request.
    ///
    /// When the `axum` feature is enabled, this converts to `400 Bad Request`.
    #[error("Missing identity key")]
    MissingKey,

    /// The identity has exhausted its quota.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: std::time::Duration,
    },

    /// The limiter could not reach a decision, e.g. its store is down.
    ///
    /// The string contains the `Display` representation of the limiter error.
    /// When the `axum` feature is enabled, this converts to
    /// `500 Internal Server Error`, so clients can tell an outage from an
    /// exhausted quota.
    #[error("Internal rate limiter error: {0}")]
    Unavailable(String),

    /// The decision and the inner service together exceeded the configured
    /// deadline.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out")]
    Timeout,
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for QuotaError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let body = axum::Json(std::collections::HashMap::from([("error", self.to_string())]));
        let (status, headers) = match self {
            Self::MissingKey => (StatusCode::BAD_REQUEST, None),
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, None),
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                let val = axum::http::HeaderValue::from(secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    Some((axum::http::header::RETRY_AFTER, val)),
                )
            }
            Self::Unavailable(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        let mut response = (status, body).into_response();
        if let Some((name, value)) = headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

