//! services/bot/src/bot/webhook.rs
//!
//! The HTTP surface of the bot: the update webhook and a liveness probe.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::bot::dispatcher::Dispatcher;
use crate::bot::middleware::require_webhook_secret;
use crate::bot::protocol::{InboundEvent, Update};

/// State shared by the HTTP handlers.
pub struct WebhookState {
    pub dispatcher: Dispatcher,
    pub secret: Option<String>,
}

pub fn create_router(state: Arc<WebhookState>) -> Router {
    let webhook = Router::new()
        .route("/telegram/webhook", post(telegram_webhook))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_webhook_secret,
        ));

    Router::new()
        .merge(webhook)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Accepts one update and hands it to the dispatcher.
///
/// Always answers 200 once the secret check passed; unreadable updates are dropped.
pub async fn telegram_webhook(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> StatusCode {
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Discarding an unreadable update: {}", e);
            return StatusCode::OK;
        }
    };

    let update_id = update.update_id;
    match InboundEvent::from_update(update) {
        Some(event) => {
            if !state.dispatcher.submit(event) {
                error!("Dispatcher is stopped; dropped update {}.", update_id);
            }
        }
        None => debug!("Update {} carries nothing the bot handles.", update_id),
    }
    StatusCode::OK
}

pub async fn health() -> &'static str {
    "ok"
}
