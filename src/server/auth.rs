use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

use super::ApiError;

/// Shared-secret check for the cron trigger.
///
/// With no secret configured every request is let through, matching a
/// deployment where the scheduler endpoint is only reachable internally.
#[derive(Clone, Default)]
pub struct CronAuth {
    secret: Option<Arc<SecretString>>,
}

impl CronAuth {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self {
            secret: secret.map(Arc::new),
        }
    }

    pub fn enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Compares in constant time so response timing leaks nothing about the secret.
    fn allows(&self, token: Option<&str>) -> bool {
        match (&self.secret, token) {
            (None, _) => true,
            (Some(secret), Some(token)) => {
                bool::from(secret.expose_secret().as_bytes().ct_eq(token.as_bytes()))
            }
            (Some(_), None) => false,
        }
    }
}

impl std::fmt::Debug for CronAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CronAuth")
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Rejects the request with `401` unless it carries the configured bearer secret.
pub async fn require_cron_secret(
    State(auth): State<CronAuth>,
    req: Request,
    next: Next,
) -> Response {
    let token = extract_bearer_token(req.headers().get(AUTHORIZATION));
    if auth.allows(token) {
        return next.run(req).await;
    }

    tracing::warn!(
        path = %req.uri().path(),
        has_token = token.is_some(),
        "Rejected cron trigger without a valid secret"
    );
    ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response()
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
