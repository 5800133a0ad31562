//! Telegram delivery and the `/holders` command.

use super::{Channel, Notification};
use crate::holders::ReportRequest;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode, Recipient};
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Count current token holders")]
    Holders,
    #[command(description = "Show help")]
    Help,
}

/// `-100123` style ids become numeric chats, anything else a channel username.
pub fn parse_recipient(chat_id: &str) -> Recipient {
    match chat_id.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat_id.to_string()),
    }
}

pub struct TelegramChannel {
    bot: Bot,
    chat_id: String,
    recipient: Recipient,
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat_id: &str) -> Self {
        Self {
            bot,
            chat_id: chat_id.to_string(),
            recipient: parse_recipient(chat_id),
        }
    }

    fn keyboard(notification: &Notification) -> Option<InlineKeyboardMarkup> {
        let row: Vec<InlineKeyboardButton> = notification
            .buttons
            .iter()
            .filter_map(|button| match url::Url::parse(&button.url) {
                Ok(url) => Some(InlineKeyboardButton::url(button.label.clone(), url)),
                Err(e) => {
                    warn!("Skipping button {} with invalid url: {}", button.label, e);
                    None
                }
            })
            .collect();

        if row.is_empty() {
            None
        } else {
            Some(InlineKeyboardMarkup::new(vec![row]))
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> String {
        format!("telegram:{}", self.chat_id)
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let keyboard = Self::keyboard(notification);

        match &notification.image {
            Some(path) if path.exists() => {
                let mut request = self
                    .bot
                    .send_photo(self.recipient.clone(), InputFile::file(path.clone()))
                    .caption(notification.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(keyboard) = keyboard {
                    request = request.reply_markup(keyboard);
                }
                request.await?;
            }
            image => {
                if let Some(path) = image {
                    warn!("Image {} not found, sending text only", path.display());
                }
                let mut request = self
                    .bot
                    .send_message(self.recipient.clone(), notification.text.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(keyboard) = keyboard {
                    request = request.reply_markup(keyboard);
                }
                request.await?;
            }
        }
        Ok(())
    }
}

/// Answers `/holders` by queueing a report for the holder task, which replies
/// to the requesting chat once the count is done.
pub async fn run_commands(bot: Bot, reports: mpsc::Sender<ReportRequest>) {
    let handler = Update::filter_message().filter_command::<Command>().endpoint(
        move |bot: Bot, msg: Message, cmd: Command| {
            let reports = reports.clone();
            async move {
                match cmd {
                    Command::Holders => {
                        info!("[HolderBot] Report requested from chat {}", msg.chat.id);
                        let reply: Arc<dyn Channel> =
                            Arc::new(TelegramChannel::new(bot.clone(), &msg.chat.id.to_string()));
                        if reports
                            .try_send(ReportRequest {
                                reply_to: Some(reply),
                            })
                            .is_err()
                        {
                            bot.send_message(
                                msg.chat.id,
                                "A holder report is already queued, please wait.",
                            )
                            .await?;
                        }
                    }
                    Command::Help => {
                        bot.send_message(msg.chat.id, Command::descriptions().to_string())
                            .await?;
                    }
                }
                Ok::<(), teloxide::RequestError>(())
            }
        },
    );

    Dispatcher::builder(bot, handler)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}
