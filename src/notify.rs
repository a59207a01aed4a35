use std::future::Future;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::TELEGRAM_API_BASE;
use crate::config::TelegramConfig;

/// Telegram rejects messages longer than 4096 characters; stay under it.
pub const MAX_MESSAGE_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParseMode {
    Markdown,
    #[serde(rename = "HTML")]
    Html,
}

/// One outbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub disable_preview: bool,
}

impl Message {
    /// Plain text with link preview enabled.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            disable_preview: false,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            parse_mode: Some(ParseMode::Markdown),
            ..Self::plain(text)
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            ..Self::plain(text)
        }
    }

    pub fn without_preview(mut self) -> Self {
        self.disable_preview = true;
        self
    }
}

/// Outbound notification sink.
pub trait Notifier {
    /// Deliver `message`. An `Err` means it was not accepted.
    fn send(&self, message: &Message) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<ParseMode>,
    disable_web_page_preview: bool,
}

/// Telegram Bot API `sendMessage` client. Sends to every configured chat.
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(client: reqwest::Client, config: &TelegramConfig) -> Self {
        Self {
            client,
            api_url: format!("{TELEGRAM_API_BASE}/bot{}/sendMessage", config.bot_token),
            chat_ids: config.chat_ids(),
        }
    }

    async fn send_to(&self, chat_id: &str, message: &Message) -> Result<()> {
        let text = truncate_chars(&message.text, MAX_MESSAGE_CHARS);
        let body = SendMessageBody {
            chat_id,
            text: &text,
            parse_mode: message.parse_mode,
            disable_web_page_preview: message.disable_preview,
        };
        let res = self
            .client
            .post(&self.api_url)
            .json(&body)
            .send()
            .await
            .context("telegram request failed")?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {body}");
        }
        debug!("Telegram → {chat_id}: {}", preview(&text));
        Ok(())
    }
}

impl Notifier for TelegramNotifier {
    /// Succeeds if at least one chat accepted the message.
    async fn send(&self, message: &Message) -> Result<()> {
        let mut last_err = None;
        let mut delivered = 0usize;
        for chat_id in &self.chat_ids {
            match self.send_to(chat_id, message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Telegram send to {chat_id} failed: {e}");
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

/// Escape characters that legacy Telegram Markdown treats as markup.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escape `&`, `<`, `>` and `"` for HTML parse mode, attribute values included.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// First `max` characters of `text` (char boundary safe).
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn preview(text: &str) -> String {
    truncate_chars(&text.replace('\n', " "), 50)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_escaping() {
        assert_eq!(escape_markdown("a_b *c* [d]"), "a\\_b \\*c\\* \\[d]");
    }

    #[test]
    fn html_escaping() {
        assert_eq!(escape_html("<b>Tom & Jerry</b>"), "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;");
        assert_eq!(escape_html(r#"x" onclick="y"#), "x&quot; onclick=&quot;y");
    }

    #[test]
    fn truncation_respects_chars() {
        assert_eq!(truncate_chars("🔥🔥🔥", 2), "🔥🔥");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn body_serialization() {
        let body = SendMessageBody {
            chat_id: "42",
            text: "hi",
            parse_mode: Some(ParseMode::Html),
            disable_web_page_preview: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["disable_web_page_preview"], true);

        let plain = SendMessageBody {
            parse_mode: None,
            ..body
        };
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("parse_mode").is_none());
    }

    #[test]
    fn notifier_api_url_and_chats() {
        let config = TelegramConfig {
            bot_token: "123:abc".to_string(),
            chat_id: "1".to_string(),
            extra_chat_ids: vec!["2".to_string()],
        };
        let n = TelegramNotifier::new(reqwest::Client::new(), &config);
        assert_eq!(n.api_url, "https://api.telegram.org/bot123:abc/sendMessage");
        assert_eq!(n.chat_ids, vec!["1", "2"]);
    }

    #[test]
    fn message_builders() {
        let m = Message::markdown("*x*").without_preview();
        assert_eq!(m.parse_mode, Some(ParseMode::Markdown));
        assert!(m.disable_preview);
        assert!(!Message::plain("x").disable_preview);
    }
}
