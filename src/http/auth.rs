//! Shared-secret authentication

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::error::ScrapeError;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Clone, Default)]
pub struct AuthState {
    secret: Option<Arc<str>>,
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthState")
            .field("auth_required", &self.auth_required())
            .finish()
    }
}

impl AuthState {
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }

    #[must_use]
    pub fn auth_required(&self) -> bool {
        self.secret.is_some()
    }

    #[must_use]
    pub fn validate_key(&self, key: &str) -> bool {
        match &self.secret {
            None => true,
            Some(secret) => constant_time_eq(secret.as_bytes(), key.as_bytes()),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn auth_middleware(
    State(auth): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !auth.auth_required() {
        return next.run(request).await;
    }

    let key = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim);

    match key {
        Some(key) if auth.validate_key(key) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with missing or wrong API key");
            ScrapeError::Unauthorized.into_response()
        }
    }
}
