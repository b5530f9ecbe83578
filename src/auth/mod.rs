use axum::{
    extract::Request,
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;

/// Static bearer-token guard for admin routes.
pub struct AuthService {
    tokens: Arc<Vec<String>>,
}

impl AuthService {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            tokens: Arc::new(config.admin_tokens.clone()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn validate_token(&self, token: &str) -> bool {
        // No tokens configured means the guard is off
        if !self.is_enabled() {
            return true;
        }

        self.tokens
            .iter()
            .any(|t| bool::from(t.as_bytes().ct_eq(token.as_bytes())))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

pub async fn auth_middleware(
    auth_service: Arc<AuthService>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(&headers).unwrap_or("");

    if auth_service.validate_token(token) {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Invalid or missing bearer token" })),
        )
            .into_response()
    }
}
