/// Telegram bot bootstrap
///
/// This module wires everything together: one teloxide `Bot` and one RAG
/// system per bot kind, the shared update cache, and the webhook server.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::{prelude::*, types::AllowedUpdate, types::Me};
use tokio::time::sleep;

use crate::config::{BotConfig, BotKind, Config};
use crate::dedup::build_update_cache;
use crate::handlers::BotContext;
use crate::http_server::{start_server, AppState};
use crate::rag::RAGSystem;

/// HTTP client for the Bot API with extended timeouts for slow networks
fn build_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .context("Failed to create HTTP client")
}

/// Retry getting bot info with exponential backoff
async fn retry_get_me(bot: &Bot, kind: BotKind) -> Result<Me> {
    let max_retries = 5;
    let mut delay = Duration::from_secs(2);

    for attempt in 1..=max_retries {
        match bot.get_me().await {
            Ok(me) => {
                log::info!("[{}] Connected to Telegram API on attempt {}", kind, attempt);
                return Ok(me);
            }
            Err(e) if attempt < max_retries => {
                log::warn!(
                    "[{}] Failed to connect to Telegram API (attempt {}/{}): {}. Retrying in {:?}...",
                    kind,
                    attempt,
                    max_retries,
                    e,
                    delay
                );
                sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                anyhow::bail!(
                    "[{}] Failed to connect to Telegram API after {} attempts: {}",
                    kind,
                    max_retries,
                    e
                );
            }
        }
    }

    unreachable!()
}

/// Public URL Telegram should deliver this bot's updates to
pub fn webhook_endpoint(base_url: &str, kind: BotKind) -> String {
    format!("{}/webhook/{}", base_url.trim_end_matches('/'), kind)
}

/// Point Telegram at our webhook route, with the secret token if configured
async fn register_webhook(bot: &Bot, bot_config: &BotConfig, base_url: &str) -> Result<()> {
    let endpoint = webhook_endpoint(base_url, bot_config.kind);
    let url = reqwest::Url::parse(&endpoint)
        .with_context(|| format!("Invalid webhook URL: {}", endpoint))?;

    let mut request = bot
        .set_webhook(url)
        .allowed_updates(vec![AllowedUpdate::Message]);
    if let Some(secret) = &bot_config.webhook_secret {
        request = request.secret_token(secret.clone());
    }
    request.await.context("setWebhook failed")?;

    log::info!("[{}] Webhook registered at {}", bot_config.kind, endpoint);
    Ok(())
}

/// Verify the token and, when a public URL is known, register the webhook
pub async fn connect_bot(bot_config: &BotConfig, webhook_url: Option<&str>) -> Result<Bot> {
    let bot = Bot::with_client(&bot_config.telegram_token, build_client()?);

    let me = retry_get_me(&bot, bot_config.kind).await?;
    log::info!("[{}] Bot started: @{}", bot_config.kind, me.username());

    match webhook_url {
        Some(base_url) => register_webhook(&bot, bot_config, base_url).await?,
        None => log::warn!(
            "[{}] No public URL configured - set the webhook to /webhook/{} manually",
            bot_config.kind,
            bot_config.kind
        ),
    }

    if bot_config.webhook_secret.is_none() {
        log::warn!("[{}] No webhook secret configured - requests are not authenticated", bot_config.kind);
    }

    Ok(bot)
}

async fn build_bot_context(config: &Config, kind: BotKind) -> Result<BotContext> {
    let bot_config = config.bot(kind);

    let rag_system = RAGSystem::new(config, bot_config)
        .await
        .with_context(|| format!("Failed to initialize the {} RAG system", kind))?;
    rag_system.initialize_collection().await?;

    let bot = connect_bot(bot_config, config.webhook_url.as_deref()).await?;

    Ok(BotContext {
        kind,
        webhook_secret: bot_config.webhook_secret.clone(),
        sender: Arc::new(bot),
        qa: Arc::new(rag_system),
    })
}

/// Build the shared server state for both bots
pub async fn build_state(config: &Config) -> Result<AppState> {
    let update_cache = build_update_cache(
        config.redis_url.as_deref(),
        Duration::from_secs(config.update_id_cache_duration_secs),
    )
    .await?;

    Ok(AppState {
        panelist: Arc::new(build_bot_context(config, BotKind::Panelist).await?),
        prefect: Arc::new(build_bot_context(config, BotKind::Prefect).await?),
        update_cache,
    })
}

/// Initialize both bots and serve their webhooks
pub async fn run(config: Config) -> Result<()> {
    log::info!("Initializing bots...");

    let state = build_state(&config).await?;
    start_server(state, config.webhook_port).await
}
