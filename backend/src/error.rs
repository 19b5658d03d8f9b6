//! Service error taxonomy, independent of transport.
//!
//! Every error carries a stable machine code and a human-readable reason.
//! The axum mapping renders `{"code", "reason"}` JSON; internal causes are
//! logged but never leaked to clients.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    /// Reserved for gateway-level policy; the core itself never forbids.
    #[allow(dead_code)]
    #[error("{0}")]
    Forbidden(String),

    #[allow(dead_code)]
    #[error("{0}")]
    RateLimit(String),

    #[allow(dead_code)]
    #[error("{0}")]
    Unavailable(String),

    /// Upstream broker/database failure surfaced to the caller.
    #[allow(dead_code)]
    #[error("upstream failure: {0}")]
    External(#[source] anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }

    /// Stable machine code, safe to match on across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::Unauthorized(_) => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::RateLimit(_) => "rate_limit",
            Error::Unavailable(_) => "unavailable",
            Error::External(_) => "external",
            Error::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::External(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = match &self {
            // Never leak internals; the cause is in the logs.
            Error::Internal(e) => {
                bosun_common::response::print_error(anyhow::anyhow!("{:?}", e));
                "internal error".to_string()
            }
            Error::External(e) => {
                bosun_common::response::print_error(anyhow::anyhow!("{:?}", e));
                "upstream failure".to_string()
            }
            other => format!("{}", other),
        };
        (
            status,
            Json(serde_json::json!({ "code": self.code(), "reason": reason })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::validation("x").code(), "validation");
        assert_eq!(Error::not_found("x").code(), "not_found");
        assert_eq!(Error::conflict("x").code(), "conflict");
        assert_eq!(Error::Internal(anyhow::anyhow!("x")).code(), "internal");
    }

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(Error::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(Error::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::RateLimit("x".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::External(anyhow::anyhow!("x")).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
