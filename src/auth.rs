//! Admin token check for destructive endpoints.

use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::app::AppError;

/// Require `Authorization: Bearer <expected>` when an admin token is configured.
pub fn authorize_admin(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let provided = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(AppError::Unauthorized)?;

    if validate_token(provided, expected) {
        Ok(())
    } else {
        log::warn!("rejected admin request with a wrong token");
        Err(AppError::Unauthorized)
    }
}

/// Constant-time comparison. Empty tokens never match.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let diff = provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));

    provided.len() == expected.len() && diff == 0
}

/// Token from a `Bearer <token>` header value (scheme is case-insensitive).
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
