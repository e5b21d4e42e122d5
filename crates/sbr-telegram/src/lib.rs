//! Telegram adapter (teloxide).
//!
//! Implements the `sbr-core` StoryPublisher over the Telegram Bot API: stories
//! are posted as photos or videos to one configured chat or channel.

use std::{path::Path, time::Duration};

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, Recipient},
    ApiError, RequestError,
};

use tokio::time::sleep;

use sbr_core::{
    domain::{MediaKind, PublishReceipt},
    errors::Error,
    ports::StoryPublisher,
    Result,
};

#[derive(Clone)]
pub struct TelegramPublisher {
    bot: Bot,
    chat: Recipient,
}

impl TelegramPublisher {
    pub fn new(bot: Bot, chat: Recipient) -> Self {
        Self { bot, chat }
    }

    /// Build from a bot token and a chat (numeric id or `@channel`).
    /// Every Bot API request, uploads included, is bounded by `timeout`.
    pub fn from_token(token: &str, chat: &str, timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("failed to build telegram client: {e}")))?;
        Ok(Self::new(Bot::with_client(token, client), parse_recipient(chat)))
    }

    fn map_err(e: RequestError) -> Error {
        match e {
            RequestError::Api(
                api @ (ApiError::NotFound | ApiError::BotKicked | ApiError::BotBlocked),
            ) => Error::Auth(format!("telegram rejected the bot: {api}")),
            other => Error::External(format!("telegram error: {other}")),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::warn!(retry_after = ?d, "telegram rate limited, retrying");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl StoryPublisher for TelegramPublisher {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn can_send(&self) -> Result<bool> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        let chat = self.with_retry(|| self.bot.get_chat(self.chat.clone())).await?;
        let member = self
            .with_retry(|| self.bot.get_chat_member(self.chat.clone(), me.user.id))
            .await?;

        let allowed = if chat.is_channel() {
            member.kind.can_post_messages()
        } else {
            member.kind.can_send_messages()
        };
        if !allowed {
            tracing::warn!(chat = ?self.chat, "the bot is not allowed to post in the target chat right now");
        }
        Ok(allowed)
    }

    async fn send_media(&self, path: &Path, kind: MediaKind) -> Result<PublishReceipt> {
        let file = InputFile::file(path.to_path_buf());
        let msg = match kind {
            MediaKind::Photo => {
                self.with_retry(|| self.bot.send_photo(self.chat.clone(), file.clone()))
                    .await
            }
            MediaKind::Video => {
                self.with_retry(|| self.bot.send_video(self.chat.clone(), file.clone()))
                    .await
            }
        }
        .map_err(|e| match e {
            Error::Auth(_) => e,
            other => Error::Upload(other.to_string()),
        })?;

        Ok(PublishReceipt {
            message_id: msg.id.0.to_string(),
        })
    }
}

/// `-100123` → chat id, anything else → channel username (with `@`).
pub fn parse_recipient(chat: &str) -> Recipient {
    let chat = chat.trim();
    match chat.parse::<i64>() {
        Ok(id) => Recipient::Id(teloxide::types::ChatId(id)),
        Err(_) if chat.starts_with('@') => Recipient::ChannelUsername(chat.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{chat}")),
    }
}
