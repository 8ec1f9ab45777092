/// HTTP Server Module
///
/// Receives Telegram webhook deliveries for both bots and exposes a health
/// check.

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::BotKind;
use crate::dedup::UpdateCache;
use crate::handlers::{respond, screen_update, secret_matches, BotContext, Screening, WebhookUpdate};

/// Largest webhook body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub panelist: Arc<BotContext>,
    pub prefect: Arc<BotContext>,
    pub update_cache: Arc<dyn UpdateCache>,
}

impl AppState {
    pub fn bot(&self, kind: BotKind) -> &Arc<BotContext> {
        match kind {
            BotKind::Panelist => &self.panelist,
            BotKind::Prefect => &self.prefect,
        }
    }
}

/// Create and configure the HTTP server router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhook/panelist", post(panelist_webhook))
        .route("/webhook/prefect", post(prefect_webhook))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "ite_rag_bots",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn panelist_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    handle_webhook(&state, BotKind::Panelist, &headers, &body).await
}

async fn prefect_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    handle_webhook(&state, BotKind::Prefect, &headers, &body).await
}

/// Screen the update and, when accepted, answer it before replying 200
async fn handle_webhook(state: &AppState, kind: BotKind, headers: &HeaderMap, body: &[u8]) -> StatusCode {
    let bot = state.bot(kind);
    if !secret_matches(bot.webhook_secret.as_deref(), headers) {
        log::warn!("[{}] Secret does not match.", kind);
        return StatusCode::UNAUTHORIZED;
    }

    let update: WebhookUpdate = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(e) => {
            log::warn!("[{}] Rejected malformed update: {}", kind, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let screening = match screen_update(bot, state.update_cache.as_ref(), headers, update).await {
        Ok(screening) => screening,
        Err(e) => {
            log::error!("[{}] Failed to screen update: {:#}", kind, e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match screening {
        Screening::BadSecret => StatusCode::UNAUTHORIZED,
        Screening::Accepted { telegram_id, text } => {
            respond(bot, telegram_id, &text).await;
            StatusCode::OK
        }
        Screening::Duplicate | Screening::NoMessage | Screening::NotPrivate | Screening::NoText => {
            StatusCode::OK
        }
    }
}

/// Start the HTTP server
pub async fn start_server(state: AppState, port: u16) -> Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .context("Failed to bind HTTP server")?;

    log::info!("HTTP server listening on port {}", port);

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
