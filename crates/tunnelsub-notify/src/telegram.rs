//! Telegram bot notification

use serde::Serialize;
use tracing::info;

use crate::{post_json, NotifyError};

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Characters MarkdownV2 treats as markup
const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
}

/// Sends the subscription to a chat through the bot API
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(
        client: reqwest::Client,
        bot_token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Point the notifier at another bot API server
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Message body: a bold title line followed by the document
    pub fn message_text(name: &str, document: &str) -> String {
        format!(
            "*{} Update Notification*\n{}",
            escape_markdown_v2(name),
            escape_markdown_v2(document)
        )
    }

    pub async fn notify(&self, name: &str, document: &str) -> Result<(), NotifyError> {
        let endpoint = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: Self::message_text(name, document),
            parse_mode: "MarkdownV2",
        };

        post_json(&self.client, &endpoint, &body)
            .await
            .map_err(|e| redact(e, &self.bot_token))?;
        info!("Subscription sent to Telegram chat {}", self.chat_id);
        Ok(())
    }
}

/// Keep the bot token out of error messages
fn redact(error: NotifyError, token: &str) -> NotifyError {
    match error {
        NotifyError::Request { endpoint, source } => NotifyError::Request {
            endpoint: endpoint.replace(token, "<token>"),
            source: source.without_url(),
        },
        NotifyError::Rejected { endpoint, status } => NotifyError::Rejected {
            endpoint: endpoint.replace(token, "<token>"),
            status,
        },
        other => other,
    }
}

/// Escape every MarkdownV2 reserved character with a backslash
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if RESERVED.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
