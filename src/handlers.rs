/// Webhook update handlers
///
/// This module handles:
/// - Screening incoming updates (secret token, redeliveries, chat type)
/// - The panelist conversation: three reviews of a pitch
/// - The prefect conversation: one handbook answer
///
/// Only the fields these flows read are modelled; the rest of the Telegram
/// update is ignored.

use anyhow::Result;
use axum::http::HeaderMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::config::BotKind;
use crate::dedup::{update_key, UpdateCache};
use crate::prompts::{
    panelist_feedback, panelist_prompt, welcome_message, Personality, ERROR_APOLOGY,
    PANELIST_CLOSING, PANELIST_INTRO,
};
use crate::rag::QaChain;
use crate::telegram::{send_chunked, MessageSender};

/// Header Telegram uses to echo the webhook's secret token
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: IncomingChat,
    #[serde(default)]
    pub from: Option<IncomingUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingUser {
    pub id: i64,
}

/// Everything one bot needs to answer its users
pub struct BotContext {
    pub kind: BotKind,
    pub webhook_secret: Option<String>,
    pub sender: Arc<dyn MessageSender>,
    pub qa: Arc<dyn QaChain>,
}

/// Outcome of running the guards on an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screening {
    BadSecret,
    Duplicate,
    NoMessage,
    NotPrivate,
    NoText,
    Accepted { telegram_id: i64, text: String },
}

/// Whether the request carries the bot's secret token, when one is configured
pub fn secret_matches(expected: Option<&str>, headers: &HeaderMap) -> bool {
    match expected {
        None => true,
        Some(expected) => headers
            .get(SECRET_TOKEN_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(|given| given == expected)
            .unwrap_or(false),
    }
}

/// Run the guards in order and decide whether to answer the update
///
/// The secret is checked before the update ID is recorded, so a forged
/// request cannot suppress a genuine update.
pub async fn screen_update(
    bot: &BotContext,
    cache: &dyn UpdateCache,
    headers: &HeaderMap,
    update: WebhookUpdate,
) -> Result<Screening> {
    if !secret_matches(bot.webhook_secret.as_deref(), headers) {
        log::warn!("[{}] Secret does not match.", bot.kind);
        return Ok(Screening::BadSecret);
    }

    if cache.mark_seen(&update_key(bot.kind, update.update_id)).await? {
        log::warn!("[{}] Update ID {} already exists.", bot.kind, update.update_id);
        return Ok(Screening::Duplicate);
    }

    let message = match update.message {
        Some(message) => message,
        None => {
            log::warn!("[{}] Update {} has no message.", bot.kind, update.update_id);
            return Ok(Screening::NoMessage);
        }
    };

    if message.chat.kind != "private" {
        log::warn!("[{}] Not a private message (chat {}).", bot.kind, message.chat.id);
        return Ok(Screening::NotPrivate);
    }

    match (message.from, message.text) {
        (Some(from), Some(text)) => Ok(Screening::Accepted {
            telegram_id: from.id,
            text,
        }),
        _ => {
            log::warn!("[{}] Message in chat {} has no text.", bot.kind, message.chat.id);
            Ok(Screening::NoText)
        }
    }
}

fn is_start_command(text: &str) -> bool {
    text.trim() == "/start"
}

/// Answer an accepted message with the bot's conversation
pub async fn respond(bot: &BotContext, telegram_id: i64, text: &str) {
    if is_start_command(text) {
        send_chunked(bot.sender.as_ref(), telegram_id, welcome_message(bot.kind)).await;
        return;
    }

    log::info!("[{}] Received message from {}", bot.kind, telegram_id);

    let outcome = match bot.kind {
        BotKind::Panelist => run_panel(bot, telegram_id, text).await,
        BotKind::Prefect => answer_question(bot, telegram_id, text).await,
    };

    if let Err(e) = outcome {
        log::error!("[{}] Error answering {}: {:#}", bot.kind, telegram_id, e);
        send_chunked(bot.sender.as_ref(), telegram_id, ERROR_APOLOGY).await;
    }
}

/// Have each panelist review the pitch in turn
async fn run_panel(bot: &BotContext, telegram_id: i64, pitch: &str) -> Result<()> {
    let sender = bot.sender.as_ref();
    send_chunked(sender, telegram_id, PANELIST_INTRO).await;

    for (idx, personality) in Personality::PANEL.iter().enumerate() {
        let prompt = panelist_prompt(*personality, pitch)?;
        let answer = bot.qa.run(&prompt).await?;
        send_chunked(sender, telegram_id, &panelist_feedback(idx + 1, &answer)).await;
    }

    send_chunked(sender, telegram_id, PANELIST_CLOSING).await;
    Ok(())
}

async fn answer_question(bot: &BotContext, telegram_id: i64, question: &str) -> Result<()> {
    let answer = bot.qa.run(question).await?;
    send_chunked(bot.sender.as_ref(), telegram_id, &answer).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_deserializes_with_extra_fields() {
        let update: WebhookUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 3,
                "date": 1700000000,
                "chat": { "id": 55, "type": "private", "first_name": "Ana" },
                "from": { "id": 55, "is_bot": false, "first_name": "Ana" },
                "text": "/start"
            }
        }))
        .unwrap();

        let message = update.message.unwrap();
        assert_eq!(message.chat.kind, "private");
        assert_eq!(message.from.unwrap().id, 55);
        assert_eq!(message.text.as_deref(), Some("/start"));
    }

    #[test]
    fn test_update_without_message() {
        let update: WebhookUpdate =
            serde_json::from_value(serde_json::json!({ "update_id": 11, "edited_message": {} })).unwrap();
        assert!(update.message.is_none());
    }

    #[test]
    fn test_secret_matches() {
        let mut headers = HeaderMap::new();
        assert!(secret_matches(None, &headers));
        assert!(!secret_matches(Some("s3cret"), &headers));

        headers.insert(SECRET_TOKEN_HEADER, "s3cret".parse().unwrap());
        assert!(secret_matches(Some("s3cret"), &headers));
        assert!(!secret_matches(Some("other"), &headers));
    }

    #[test]
    fn test_start_command_ignores_surrounding_whitespace() {
        assert!(is_start_command("  /start \n"));
        assert!(!is_start_command("/start my pitch"));
    }
}
