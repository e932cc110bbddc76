//! services/bot/src/bot/middleware.rs
//!
//! Guards the webhook route so only the messaging provider can push updates.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::bot::webhook::WebhookState;

/// Header in which Telegram echoes the secret registered with `setWebhook`.
pub const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Middleware that rejects deliveries whose secret token does not match the
/// configured one. Without a configured secret every delivery is let through.
pub async fn require_webhook_secret(
    State(state): State<Arc<WebhookState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = state.secret.as_deref() {
        if !secret_matches(req.headers(), expected) {
            warn!("Rejected a webhook delivery with a missing or wrong secret token.");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(next.run(req).await)
}

pub fn secret_matches(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|given| given == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn secret_must_match_exactly() {
        let mut headers = HeaderMap::new();
        assert!(!secret_matches(&headers, "s3cret"));

        headers.insert(SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(!secret_matches(&headers, "s3cret"));

        headers.insert(SECRET_HEADER, HeaderValue::from_static("s3cret"));
        assert!(secret_matches(&headers, "s3cret"));
    }
}
