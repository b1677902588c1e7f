//! Forwards WARN and ERROR events to an admin Telegram chat.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Telegram rejects longer messages.
const MAX_MESSAGE_CHARS: usize = 4000;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_BUFFERED: usize = 20;

pub struct AlertLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl AlertLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    alert = rx.recv() => {
                        match alert {
                            Some(text) => {
                                buffer.push(text);
                                if buffer.len() >= MAX_BUFFERED {
                                    flush(&bot, chat_id, &mut buffer).await;
                                }
                            }
                            None => {
                                flush(&bot, chat_id, &mut buffer).await;
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        flush(&bot, chat_id, &mut buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

/// Join buffered alerts into as few messages as fit, truncating any single
/// alert that is too long on its own.
fn batch(alerts: &[String]) -> Vec<String> {
    let mut messages = Vec::new();
    let mut current = String::new();
    for alert in alerts {
        let alert = truncate(alert);
        if !current.is_empty() && current.chars().count() + 1 + alert.chars().count() > MAX_MESSAGE_CHARS {
            messages.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&alert);
    }
    if !current.is_empty() {
        messages.push(current);
    }
    messages
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS - 3).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

async fn flush(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let messages = batch(buffer);
    buffer.clear();
    for text in messages {
        // Logging here would feed the layer itself.
        if let Err(e) = bot.send_message(chat_id, text).await {
            eprintln!("Failed to send alert to Telegram: {e}");
        }
    }
}

struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn format_alert(level: Level, target: &str, message: &str) -> String {
    let icon = if level == Level::ERROR { "❌" } else { "⚠️" };
    format!("{icon} {target}: {message}")
}

impl<S: Subscriber> Layer<S> for AlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut visitor = MessageVisitor {
            message: String::new(),
        };
        event.record(&mut visitor);

        let alert = format_alert(level, event.metadata().target(), &visitor.message);
        if self.tx.send(alert).is_err() {
            eprintln!("Alert channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_alert() {
        assert_eq!(
            format_alert(Level::WARN, "household_expenses::sheets", "rate limited"),
            "⚠️ household_expenses::sheets: rate limited"
        );
        assert!(format_alert(Level::ERROR, "x", "boom").starts_with("❌"));
    }

    #[test]
    fn test_batch_joins_short_alerts() {
        let alerts = vec!["one".to_string(), "two".to_string()];
        assert_eq!(batch(&alerts), vec!["one\ntwo".to_string()]);
        assert!(batch(&[]).is_empty());
    }

    #[test]
    fn test_batch_splits_and_truncates() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 500);
        let medium = "y".repeat(3000);
        let messages = batch(&[medium.clone(), long, medium]);

        assert_eq!(messages.len(), 3);
        for message in &messages {
            assert!(message.chars().count() <= MAX_MESSAGE_CHARS);
        }
        assert!(messages[1].ends_with("..."));
    }
}
