//! Caller identity extraction.
//!
//! The upstream gateway authenticates the user and injects an `X-User-Email`
//! header; this service only reads it back. Controllers and other internal
//! callers never reach the authenticated surface.

use axum::{
    Extension, RequestPartsExt,
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use owo_colors::OwoColorize;
use reqwest::StatusCode;

pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// Identity used when auth is disabled for local development.
pub const DEV_IDENTITY: &str = "dev@localhost";

#[derive(Clone, Copy, Debug)]
pub struct AuthSettings {
    pub enabled: bool,
}

/// The authenticated owner email, as injected by the gateway.
pub struct UserEmail(pub String);

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty() && !domain.is_empty() && !domain.contains('@')
}

impl<S> FromRequestParts<S> for UserEmail
where
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let settings = parts
            .extract::<Extension<AuthSettings>>()
            .await
            .map(|Extension(s)| s)
            .unwrap_or(AuthSettings { enabled: true });

        let header = parts
            .headers
            .get(USER_EMAIL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        match header {
            Some(email) if looks_like_email(&email) => Ok(UserEmail(email)),
            Some(bad) => {
                eprintln!(
                    "{}",
                    format!("❌ Malformed {} header: {:?}", USER_EMAIL_HEADER, bad).red()
                );
                Err(Unauthorized)
            }
            None if !settings.enabled => Ok(UserEmail(DEV_IDENTITY.to_string())),
            None => Err(Unauthorized),
        }
    }
}

pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        StatusCode::UNAUTHORIZED.into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_addresses() {
        assert!(looks_like_email("u@x.dev"));
        assert!(looks_like_email("first.last@example.com"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(!looks_like_email(""));
        assert!(!looks_like_email("no-at-sign"));
        assert!(!looks_like_email("@domain"));
        assert!(!looks_like_email("local@"));
        assert!(!looks_like_email("a@b@c"));
    }
}
