//! Telegram notification channel for relaybot.
//!
//! Task owners are Telegram chat ids; every lifecycle notification goes
//! out through the Bot API's `sendMessage`. No inbound traffic is
//! handled here, so there is no polling loop to run.

pub mod api;
pub mod types;

use anyhow::Context;
use tracing::{debug, warn};

use relaybot_engine::notify::Notifier;

use api::TelegramApi;
use types::SendMessageParams;

/// `Notifier` backed by a Telegram bot.
pub struct TelegramNotifier {
    api: TelegramApi,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str) -> Self {
        Self {
            api: TelegramApi::new(bot_token),
        }
    }

    /// Verify the bot token and return the bot's username. Called once
    /// at startup so a bad token fails loudly instead of during the
    /// first terminal notification.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let bot = self.api.get_me().await?;
        Ok(bot.username.unwrap_or(bot.first_name))
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, owner: &str, message: &str) -> anyhow::Result<()> {
        let chat_id = owner
            .parse::<i64>()
            .with_context(|| format!("owner {owner:?} is not a Telegram chat id"))?;

        // Try Markdown first, fall back to plain text: result summaries
        // contain user-supplied notes that can break Markdown parsing.
        let result = self
            .api
            .send_message(&SendMessageParams {
                chat_id,
                text: message.to_string(),
                parse_mode: Some("Markdown".into()),
            })
            .await;

        if let Err(e) = result {
            warn!(chat_id, "Markdown send failed, retrying as plain text: {e}");
            self.api
                .send_message(&SendMessageParams {
                    chat_id,
                    text: message.to_string(),
                    parse_mode: None,
                })
                .await?;
        }

        debug!(chat_id, "Telegram notification delivered");
        Ok(())
    }
}
