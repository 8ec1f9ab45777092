/// Outbound Telegram messages
///
/// Telegram rejects messages longer than 4096 characters, and model answers
/// (three panelist reviews especially) regularly exceed that.

use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;

/// Maximum length of one Telegram text message
pub const MAX_MESSAGE_LENGTH: usize = 4096;

#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}

#[async_trait]
impl MessageSender for Bot {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(ChatId(chat_id), text.to_string()).await?;
        Ok(())
    }
}

/// Cut `text` into consecutive pieces of at most `limit` characters
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() || limit == 0 {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|piece| piece.iter().collect())
        .collect()
}

/// Send `text` as one or more messages, in order
///
/// A failed piece is logged and the remaining pieces are still sent.
/// Returns the number of pieces delivered.
pub async fn send_chunked(sender: &dyn MessageSender, chat_id: i64, text: &str) -> usize {
    let parts = split_message(text, MAX_MESSAGE_LENGTH);
    let total = parts.len();
    let mut delivered = 0;

    for (idx, part) in parts.iter().enumerate() {
        match sender.send_text(chat_id, part).await {
            Ok(()) => delivered += 1,
            Err(e) => log::error!(
                "Failed to send part {}/{} to chat {}: {:#}",
                idx + 1,
                total,
                chat_id,
                e
            ),
        }
    }

    delivered
}
