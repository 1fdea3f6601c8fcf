//! API Middleware
//!
//! Bearer authentication, the admin capability check and request logging.

use std::net::IpAddr;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{extract_bearer_token, TokenError};
use crate::domain::{Caller, OperationContext};
use crate::error::AppError;

use super::AppState;

// =========================================================================
// Bearer Authentication Middleware
// =========================================================================

/// Resolve the bearer token to a [`Caller`] and attach an [`OperationContext`]
///
/// The role comes from the stored account, never from the token.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer_token)
        .ok_or(AppError::Unauthorized)?;

    let claims = state.tokens.verify(token).map_err(|e| {
        match e {
            TokenError::Expired => tracing::debug!("Rejected expired bearer token"),
            _ => tracing::warn!("Rejected invalid bearer token"),
        }
        AppError::Unauthorized
    })?;

    let correlation_id = headers
        .get("X-Correlation-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok());

    let account = state
        .store
        .account(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let caller = Caller::new(account.id, account.role);
    let mut context = OperationContext::new().with_caller(caller);
    if let Some(id) = correlation_id {
        context = context.with_correlation_id(id);
    }
    // Generate one when the client sent none
    context.ensure_correlation_id();
    if let Some(ip) = forwarded_client_ip(request.headers()) {
        context = context.with_client_ip(ip);
    }

    request.extensions_mut().insert(caller);
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

/// First hop of `X-Forwarded-For`, as set by the fronting proxy
fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse().ok())
}

// =========================================================================
// Admin Capability Middleware
// =========================================================================

/// Turn an admin [`Caller`] into a [`crate::domain::Privileged`] extension.
/// Must run after [`auth_middleware`].
pub async fn require_privileged(mut request: Request<Body>, next: Next) -> Result<Response, AppError> {
    let caller = request
        .extensions()
        .get::<Caller>()
        .copied()
        .ok_or(AppError::Unauthorized)?;

    let privileged = caller.privileged().ok_or_else(|| {
        tracing::warn!(account_id = %caller.account_id, "Admin route refused");
        AppError::Forbidden("Admin access required".to_string())
    })?;

    request.extensions_mut().insert(privileged);
    Ok(next.run(request).await)
}

// =========================================================================
// mask_headers_for_logging
// =========================================================================

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-authorization-grant",
];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = mask_headers_for_logging(request.headers());

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("authorization", "Bearer abc.def.ghi".parse().unwrap());
        headers.insert("x-authorization-grant", Uuid::nil().to_string().parse().unwrap());
        headers.insert("x-correlation-id", "corr-1".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);
        let value = |key: &str| masked.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        assert_eq!(value("authorization").unwrap(), "[REDACTED]");
        assert_eq!(value("x-authorization-grant").unwrap(), "[REDACTED]");
        assert_eq!(value("content-type").unwrap(), "application/json");
        assert_eq!(value("x-correlation-id").unwrap(), "corr-1");
    }

    #[test]
    fn test_forwarded_client_ip_takes_first_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_client_ip(&headers), None);

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(forwarded_client_ip(&headers), Some("203.0.113.7".parse().unwrap()));

        headers.insert("x-forwarded-for", "unknown".parse().unwrap());
        assert_eq!(forwarded_client_ip(&headers), None);
    }

    #[test]
    fn test_sensitive_headers_list() {
        assert!(SENSITIVE_HEADERS.contains(&"authorization"));
        assert!(SENSITIVE_HEADERS.contains(&"x-authorization-grant"));
        assert!(!SENSITIVE_HEADERS.contains(&"content-type"));
    }
}
