/// Configuration module for managing environment variables and API keys
///
/// This module loads and validates all required configuration values from
/// environment variables (typically from a .env file). Both bots share the
/// OpenAI and cache settings; each bot has its own Telegram token, webhook
/// secret and vector database.

use anyhow::{Context, Result};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// The two bots served by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BotKind {
    /// Startup pitch evaluation by three AI panelists
    Panelist,
    /// Student handbook questions
    Prefect,
}

impl BotKind {
    pub const ALL: [BotKind; 2] = [BotKind::Panelist, BotKind::Prefect];

    pub fn as_str(&self) -> &'static str {
        match self {
            BotKind::Panelist => "panelist",
            BotKind::Prefect => "prefect",
        }
    }

    /// Prefix used for environment variables, e.g. `PANELIST_`
    fn env_prefix(&self) -> &'static str {
        match self {
            BotKind::Panelist => "PANELIST",
            BotKind::Prefect => "PREFECT",
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "panelist" => Ok(BotKind::Panelist),
            "prefect" => Ok(BotKind::Prefect),
            other => anyhow::bail!("Unknown bot '{}' (expected 'panelist' or 'prefect')", other),
        }
    }
}

/// Settings specific to one bot
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub kind: BotKind,

    /// Telegram bot token from BotFather
    pub telegram_token: String,

    /// Value Telegram echoes in the X-Telegram-Bot-Api-Secret-Token header.
    /// When unset the header is not checked.
    pub webhook_secret: Option<String>,

    /// PostgreSQL database URL holding this bot's embeddings
    pub database_url: String,

    /// Table name for this bot's document embeddings
    pub collection: String,

    /// Directory with the plain-text documents indexed for this bot
    pub contexts_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// OpenAI API key used for both embeddings and chat completions
    pub openai_api_key: String,

    /// Base URL of the OpenAI-compatible API
    pub openai_api_base: String,

    /// Chat model to use (e.g., "gpt-3.5-turbo")
    pub gpt_model: String,

    /// Sampling temperature for chat completions
    pub gpt_temperature: f32,

    /// Embedding model to use (e.g., "text-embedding-ada-002")
    pub embedding_model: String,

    /// Number of document chunks to retrieve for context
    pub top_k_chunks: usize,

    /// Token budget for the retrieved context stuffed into the prompt
    pub max_context_tokens: usize,

    /// Redis URL for the update ID cache. In-process cache when unset.
    pub redis_url: Option<String>,

    /// How long a seen update ID is remembered
    pub update_id_cache_duration_secs: u64,

    /// Public base URL; webhooks are registered at `<url>/webhook/<bot>`
    pub webhook_url: Option<String>,

    /// Port for webhook HTTP server
    pub webhook_port: u16,

    pub panelist: BotConfig,
    pub prefect: BotConfig,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if any required environment variable is missing
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        Ok(Config {
            openai_api_key: env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set")?,

            openai_api_base: env::var("OPENAI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),

            gpt_model: env::var("GPT_MODEL")
                .unwrap_or_else(|_| "gpt-3.5-turbo".to_string()),

            gpt_temperature: parse_env("GPT_TEMPERATURE").unwrap_or(0.1),

            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-ada-002".to_string()),

            top_k_chunks: parse_env("TOP_K_CHUNKS").unwrap_or(4),

            max_context_tokens: parse_env("MAX_CONTEXT_TOKENS").unwrap_or(3000),

            redis_url: non_empty_env("REDIS_URL"),

            update_id_cache_duration_secs: parse_env("UPDATE_ID_CACHE_DURATION_SECONDS")
                .unwrap_or(15 * 60),

            webhook_url: Self::detect_webhook_url(),
            webhook_port: parse_env("WEBHOOK_PORT")
                .or_else(|| parse_env("PORT"))
                .unwrap_or(8080),

            panelist: Self::bot_from_env(BotKind::Panelist)?,
            prefect: Self::bot_from_env(BotKind::Prefect)?,
        })
    }

    fn bot_from_env(kind: BotKind) -> Result<BotConfig> {
        let prefix = kind.env_prefix();
        let var = |name: &str| format!("{}_{}", prefix, name);

        Ok(BotConfig {
            kind,
            telegram_token: env::var(var("TELEGRAM_BOT_TOKEN"))
                .with_context(|| format!("{} must be set", var("TELEGRAM_BOT_TOKEN")))?,
            webhook_secret: non_empty_env(&var("WEBHOOK_SECRET")),
            database_url: env::var(var("DATABASE_URL"))
                .with_context(|| format!("{} must be set", var("DATABASE_URL")))?,
            collection: env::var(var("COLLECTION"))
                .unwrap_or_else(|_| format!("{}_langchain_store", kind.as_str())),
            contexts_dir: env::var(var("CONTEXTS_DIR"))
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("var").join("contexts").join(kind.as_str())),
        })
    }

    /// Settings for one bot
    pub fn bot(&self, kind: BotKind) -> &BotConfig {
        match kind {
            BotKind::Panelist => &self.panelist,
            BotKind::Prefect => &self.prefect,
        }
    }

    /// Auto-detect webhook URL from cloud platform environment variables
    fn detect_webhook_url() -> Option<String> {
        // Check if explicitly set (highest priority)
        if let Some(url) = non_empty_env("WEBHOOK_URL") {
            return Some(normalize_base_url(&url));
        }

        // Railway provides RAILWAY_PUBLIC_DOMAIN
        if let Some(domain) = non_empty_env("RAILWAY_PUBLIC_DOMAIN") {
            return Some(normalize_base_url(&domain));
        }

        // Fly.io provides FLY_APP_NAME
        if let Some(app_name) = non_empty_env("FLY_APP_NAME") {
            return Some(format!("https://{}.fly.dev", app_name));
        }

        // Webhooks are then registered by hand with setWebhook
        None
    }

    /// Validate that both vector databases are reachable
    pub async fn validate(&self) -> Result<()> {
        log::info!("Validating configuration...");

        for kind in BotKind::ALL {
            let bot = self.bot(kind);
            let pool = crate::rag::connect_pool(&bot.database_url, 2)
                .await
                .with_context(|| format!("Failed to connect to the {} database", kind))?;

            sqlx::query("SELECT 1")
                .fetch_one(&pool)
                .await
                .with_context(|| format!("{} database connection test query failed", kind))?;

            pool.close().await;
        }

        log::info!("Configuration validated successfully");
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Ensure the URL has a scheme and no trailing slash
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}
