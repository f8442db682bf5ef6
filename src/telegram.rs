//! Telegram Bot integration
//!
//! Long-polling dispatcher that feeds text, photo and image-document messages
//! into the [`Relay`] and sends its replies back. Bot commands are skipped.
//!
//! Uses explicit Dispatcher pattern for reliable message polling.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{ChatAction, MessageId, ReplyParameters, Update},
};

use crate::channels::{
    Attachment, BotIdentity, Channel, ChannelError, ChannelResponse, ConversationKind,
    InboundMessage, Sender,
};
use crate::config::Config;
use crate::conversation::ConversationId;
use crate::generation::CommandGenerator;
use crate::persistence::HistoryFile;
use crate::relay::{Outcome, Relay};

/// Telegram rejects messages above 4096 UTF-16 code units
const MAX_MESSAGE_UNITS: usize = 4000;

/// Run Telegram bot with explicit Dispatcher for reliable polling
pub async fn run_telegram_bot(config: Config) -> Result<()> {
    let bot = Bot::new(config.bot_token.clone());

    // Verify bot token by calling getMe
    tracing::info!("Verifying bot token...");
    let me = match bot.get_me().await {
        Ok(me) => me,
        Err(e) => {
            tracing::error!("Failed to authenticate bot: {}", e);
            anyhow::bail!("Bot authentication failed: {}", e);
        }
    };
    let identity = BotIdentity {
        id: me.user.id.0 as i64,
        username: me.user.username.clone(),
    };
    tracing::info!(
        "Bot authenticated: @{} (ID: {})",
        identity.username.as_deref().unwrap_or("unknown"),
        identity.id
    );

    let generator = Arc::new(CommandGenerator::new(config.generator.clone()));
    let relay = Relay::open(
        HistoryFile::new(&config.history_path),
        config.history_window,
        generator,
        identity,
        config.system_prompt.clone(),
    )
    .await?;
    let relay = Arc::new(relay);

    tracing::info!("===========================================");
    tracing::info!("  Chat relay - Starting...");
    tracing::info!("===========================================");
    tracing::info!("History file: {:?}", config.history_path);
    tracing::info!(
        "Generator: {} {} {}",
        config.generator.program,
        config.generator.args.join(" "),
        config.generator.model
    );
    tracing::info!("Working window: {} turns", config.history_window);

    // Delete any existing webhook to ensure polling works
    if let Err(e) = bot.delete_webhook().await {
        tracing::warn!("Failed to delete webhook: {} (continuing anyway)", e);
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(message_handler));

    tracing::info!("Starting dispatcher with long polling (ctrl+C to stop)...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![Arc::clone(&relay)])
        .default_handler(|upd| async move {
            tracing::debug!("Unhandled update: {:?}", upd);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "Error in message handler",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::warn!("Dispatcher stopped");
    relay.flush().await?;
    Ok(())
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, relay: Arc<Relay>) -> ResponseResult<()> {
    if !is_relayable(&msg) {
        tracing::debug!("Skipping unsupported message in chat {}", msg.chat.id.0);
        return Ok(());
    }

    let inbound = to_inbound(&msg);
    let channel = TelegramChannel::new(bot);

    match relay.handle(&inbound, &channel).await {
        Ok(Outcome::Replied {
            persist_error: Some(e),
            ..
        }) => {
            tracing::error!("Reply sent to chat {} but history not saved: {}", msg.chat.id.0, e);
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Error handling message: {}", e),
    }

    Ok(())
}

/// Text (not a command), photo, or image document
fn is_relayable(msg: &Message) -> bool {
    if let Some(text) = msg.text() {
        return !text.starts_with('/');
    }
    if msg.photo().is_some() {
        return true;
    }
    msg.document()
        .and_then(|d| d.mime_type.as_ref())
        .is_some_and(|m| m.to_string().starts_with("image/"))
}

/// Convert a teloxide message into the platform-neutral form
fn to_inbound(msg: &Message) -> InboundMessage {
    let attachment = if msg.photo().is_some() {
        Some(Attachment::Photo)
    } else {
        msg.document().map(|d| Attachment::Document {
            media_type: d.mime_type.as_ref().map(|m| m.to_string()),
        })
    };

    let kind = if msg.chat.is_private() {
        ConversationKind::Direct
    } else {
        ConversationKind::Group
    };

    InboundMessage {
        message_id: Some(msg.id.0),
        conversation_id: ConversationId(msg.chat.id.0),
        kind,
        chat_title: msg.chat.title().map(str::to_string),
        sender: msg.from.as_ref().map(|u| Sender {
            id: u.id.0 as i64,
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            username: u.username.clone(),
        }),
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        attachment,
        reply_to_sender: msg
            .reply_to_message()
            .and_then(|r| r.from.as_ref())
            .map(|u| u.id.0 as i64),
    }
}

/// Split text into chunks of at most `max` UTF-16 code units, on char boundaries.
///
/// Telegram measures message length in UTF-16, so astral characters
/// (emoji) count twice.
pub(crate) fn chunk_message(text: &str, max: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut units = 0;
    for (i, c) in text.char_indices() {
        let width = c.len_utf16();
        if units + width > max && i > start {
            chunks.push(&text[start..i]);
            start = i;
            units = 0;
        }
        units += width;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Telegram side of the [`Channel`] seam
pub struct TelegramChannel {
    bot: Bot,
}

impl TelegramChannel {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, response: ChannelResponse) -> Result<(), ChannelError> {
        let chat_id = ChatId(response.conversation_id.0);

        for (i, chunk) in chunk_message(&response.content, MAX_MESSAGE_UNITS)
            .into_iter()
            .enumerate()
        {
            let mut request = self.bot.send_message(chat_id, chunk);
            // Thread only the first chunk onto the user's message
            if let (0, Some(id)) = (i, response.reply_to) {
                request = request.reply_parameters(ReplyParameters::new(MessageId(id)));
            }
            request
                .await
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    async fn send_typing(&self, conversation_id: ConversationId) -> Result<(), ChannelError> {
        self.bot
            .send_chat_action(ChatId(conversation_id.0), ChatAction::Typing)
            .await
            .map_err(|e| ChannelError::ActionFailed(e.to_string()))?;
        Ok(())
    }
}
