//! Telegram delivery of dialogue replies using teloxide.

use teloxide::prelude::*;
use teloxide::types::{InputFile, KeyboardButton, KeyboardMarkup, KeyboardRemove, ParseMode, ReplyMarkup};
use tracing::{debug, warn};

use crate::dialogue::{Keyboard, Reply};

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

fn reply_markup(keyboard: Keyboard) -> ReplyMarkup {
    match keyboard {
        Keyboard::Buttons(rows) => {
            let rows = rows
                .into_iter()
                .map(|row| row.into_iter().map(KeyboardButton::new).collect::<Vec<_>>());
            ReplyMarkup::Keyboard(KeyboardMarkup::new(rows).one_time_keyboard().resize_keyboard())
        }
        Keyboard::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
    }
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Deliver one reply to `chat_id`.
    pub async fn send(&self, chat_id: ChatId, reply: Reply) -> Result<(), String> {
        match reply {
            Reply::Text { text, keyboard, html } => self.send_text(chat_id, text, keyboard, html).await,
            Reply::Document {
                file_name,
                bytes,
                caption,
            } => self.send_document(chat_id, file_name, bytes, caption).await,
        }
    }

    async fn send_text(&self, chat_id: ChatId, text: String, keyboard: Option<Keyboard>, html: bool) -> Result<(), String> {
        let mut request = self.bot.send_message(chat_id, text);
        if html {
            request = request.parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(reply_markup(keyboard));
        }

        request.await.map(|msg| debug!("Sent message {} to {}", msg.id.0, chat_id.0)).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    async fn send_document(&self, chat_id: ChatId, file_name: String, bytes: Vec<u8>, caption: String) -> Result<(), String> {
        let size = bytes.len();
        let file = InputFile::memory(bytes).file_name(file_name.clone());
        let mut request = self.bot.send_document(chat_id, file);
        if !caption.is_empty() {
            request = request.caption(caption);
        }

        request
            .await
            .map(|_| debug!("Sent {} ({} bytes) to {}", file_name, size, chat_id.0))
            .map_err(|e| {
                let msg = format!("Failed to send document {file_name}: {e}");
                warn!("{}", msg);
                msg
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buttons_become_one_time_keyboard() {
        let markup = reply_markup(Keyboard::Buttons(vec![
            vec!["YES".to_string(), "NO".to_string()],
            vec!["CANCEL".to_string()],
        ]));
        let ReplyMarkup::Keyboard(keyboard) = markup else {
            panic!("expected a reply keyboard");
        };
        assert!(keyboard.one_time_keyboard);
        assert_eq!(keyboard.keyboard.len(), 2);
        assert_eq!(keyboard.keyboard[0][1].text, "NO");
    }

    #[test]
    fn test_remove_keyboard() {
        assert!(matches!(reply_markup(Keyboard::Remove), ReplyMarkup::KeyboardRemove(_)));
    }
}
