//! Telegram Bot API adapter: long-polled updates in, text and documents out.

use crate::channels::traits::{
    ChannelAdapter, ChannelInboundMessage, ChannelOutboundMessage, OutboundBody,
};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Text forwarded when the bot joins a group, so the group sees the help.
const JOINED_GROUP_TEXT: &str = "/start";
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    new_chat_members: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

/// Telegram Bot API adapter using long polling.
pub struct TelegramAdapter {
    bot_token: String,
    api_base: String,
    allowed_chat_ids: Vec<String>,
    poll_timeout_secs: u64,
    client: reqwest::Client,
}

impl TelegramAdapter {
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        // The client timeout has to outlast a full long poll.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .user_agent(concat!("epibot/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            bot_token: config.bot_token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            allowed_chat_ids: config.allowed_chat_ids.clone(),
            poll_timeout_secs: config.poll_timeout_secs,
            client,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    fn is_chat_allowed(&self, chat_id: &str) -> bool {
        if self.allowed_chat_ids.is_empty() {
            return true;
        }
        self.allowed_chat_ids
            .iter()
            .any(|c| c == "*" || c.as_str() == chat_id)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        method: &str,
    ) -> anyhow::Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) => anyhow::bail!("telegram {method} failed ({status}): {body}"),
        };
        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => anyhow::bail!(
                "telegram {method} failed ({status}): {}",
                description.unwrap_or(body)
            ),
        }
    }

    async fn get_me(&self) -> anyhow::Result<User> {
        self.call(self.client.get(self.method_url("getMe")), "getMe")
            .await
    }

    async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        let request = self.client.get(self.method_url("getUpdates")).query(&[
            ("offset", offset.to_string()),
            ("timeout", self.poll_timeout_secs.to_string()),
            ("allowed_updates", r#"["message"]"#.to_owned()),
        ]);
        self.call(request, "getUpdates").await
    }

    /// Turn an update into an inbound message, if it is meant for the bot.
    fn inbound_from(&self, update: Update, me: &User) -> Option<ChannelInboundMessage> {
        let message = update.message?;
        let chat_id = message.chat.id.to_string();
        if !self.is_chat_allowed(&chat_id) {
            debug!("ignoring message from chat {chat_id} outside the allow-list");
            return None;
        }
        let sender = message
            .from
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_default();

        let text = if message.new_chat_members.iter().any(|m| m.id == me.id) {
            info!("added to chat {chat_id}");
            JOINED_GROUP_TEXT.to_owned()
        } else {
            if message.from.as_ref().is_some_and(|u| u.is_bot) {
                return None;
            }
            let text = message.text?;
            let username = me.username.as_deref().unwrap_or_default();
            addressed_text(&text, &message.chat.kind, username)?
        };

        Some(ChannelInboundMessage {
            channel: self.id().to_owned(),
            sender,
            reply_target: chat_id,
            text,
        })
    }
}

/// The text to act on, or `None` when a group message is not addressed to
/// the bot. Private chats always address the bot. In groups the bot must be
/// mentioned or addressed as `/command@username`; a bare mention is removed.
fn addressed_text(text: &str, chat_kind: &str, username: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if chat_kind == "private" {
        return Some(text.to_owned());
    }
    if username.is_empty() {
        return None;
    }

    let mention = format!("@{}", username.to_lowercase());
    let mut addressed = false;
    let mut kept = Vec::new();
    for (i, word) in text.split_whitespace().enumerate() {
        let lower = word.to_lowercase();
        if lower == mention {
            addressed = true;
            continue;
        }
        if i == 0 && lower.starts_with('/') && lower.ends_with(&mention) {
            addressed = true;
        }
        kept.push(word);
    }
    addressed.then(|| kept.join(" ")).filter(|t| !t.is_empty())
}

#[async_trait]
impl ChannelAdapter for TelegramAdapter {
    fn id(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, message: ChannelOutboundMessage) -> anyhow::Result<()> {
        let chat_id = message.reply_target;
        let request = match message.body {
            OutboundBody::Text(text) => self
                .client
                .post(self.method_url("sendMessage"))
                .json(&json!({ "chat_id": chat_id, "text": text })),
            OutboundBody::Markdown(text) => {
                self.client
                    .post(self.method_url("sendMessage"))
                    .json(&json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }))
            }
            OutboundBody::Image {
                file_name,
                bytes,
                caption,
            } => {
                let part = reqwest::multipart::Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str("image/png")?;
                let mut form = reqwest::multipart::Form::new()
                    .text("chat_id", chat_id)
                    .part("document", part);
                if let Some(caption) = caption {
                    form = form.text("caption", caption);
                }
                self.client
                    .post(self.method_url("sendDocument"))
                    .multipart(form)
            }
        };
        let _: serde_json::Value = self.call(request, "send").await?;
        Ok(())
    }

    async fn run(&self, inbound_tx: mpsc::Sender<ChannelInboundMessage>) -> anyhow::Result<()> {
        if self.bot_token.trim().is_empty() {
            anyhow::bail!("telegram bot token is empty");
        }

        let me = self.get_me().await?;
        info!(
            "telegram bot @{} listening",
            me.username.as_deref().unwrap_or("?")
        );

        let mut offset = 0i64;
        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!("telegram poll failed: {e}");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(inbound) = self.inbound_from(update, &me) else {
                    continue;
                };
                if inbound_tx.send(inbound).await.is_err() {
                    anyhow::bail!("telegram inbound channel closed");
                }
            }
        }
    }

    async fn health_check(&self) -> anyhow::Result<bool> {
        if self.bot_token.trim().is_empty() {
            return Ok(false);
        }
        Ok(self.get_me().await.is_ok())
    }
}
