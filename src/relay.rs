//! Conversation pipeline
//!
//! One call to [`Relay::handle`] per inbound message:
//!
//! ```text
//! message ─► route ─► normalize ─► append user turn ─► build prompt
//!                                       │ (chat lock held)
//!                         generate ◄────┘
//!                            │
//!                            ▼
//!               append assistant turn ─► persist ─► send reply
//! ```
//!
//! The chat lock spans from the user-turn append to persistence so two
//! messages in the same chat can never read the same history and overwrite
//! each other's turns. Other chats are not blocked.

use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::channels::{BotIdentity, Channel, ChannelError, ChannelResponse, InboundMessage};
use crate::conversation::{ConversationId, HistoryStore, Turn};
use crate::generation::{Generator, Reply};
use crate::normalize::{canonical_text, normalize};
use crate::persistence::{HistoryFile, PersistenceError};
use crate::prompt::build_prompt;
use crate::router::decide;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to deliver reply: {0}")]
    Channel(#[from] ChannelError),
}

/// Result of handling one message
#[derive(Debug)]
pub enum Outcome {
    /// Not addressed to the bot; nothing stored, nothing sent
    Ignored,
    /// Reply delivered
    Replied {
        reply: Reply,
        /// Set when the history could not be written; the reply was still sent
        persist_error: Option<PersistenceError>,
    },
}

/// The relay: routing, history, generation and persistence wired together
pub struct Relay {
    store: Arc<HistoryStore>,
    history_file: Arc<HistoryFile>,
    generator: Arc<dyn Generator>,
    bot: BotIdentity,
    system_prompt: String,
}

impl Relay {
    pub fn new(
        store: Arc<HistoryStore>,
        history_file: Arc<HistoryFile>,
        generator: Arc<dyn Generator>,
        bot: BotIdentity,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            store,
            history_file,
            generator,
            bot,
            system_prompt: system_prompt.into(),
        }
    }

    /// Load the history file and build a relay around it
    pub async fn open(
        history_file: HistoryFile,
        window: usize,
        generator: Arc<dyn Generator>,
        bot: BotIdentity,
        system_prompt: impl Into<String>,
    ) -> Result<Self, PersistenceError> {
        let snapshot = history_file.load().await?;
        let store = HistoryStore::from_snapshot(snapshot, window);
        Ok(Self::new(
            Arc::new(store),
            Arc::new(history_file),
            generator,
            bot,
            system_prompt,
        ))
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn bot(&self) -> &BotIdentity {
        &self.bot
    }

    /// Handle one inbound message end to end
    pub async fn handle(
        &self,
        msg: &InboundMessage,
        channel: &dyn Channel,
    ) -> Result<Outcome, RelayError> {
        let mention_token = self.bot.mention_token();
        let text = canonical_text(msg);
        let eligibility = decide(msg.kind, &text, &mention_token, msg.is_reply_to(&self.bot));

        if !eligibility.must_respond() {
            info!("Chat {}: other group chatter, ignored", msg.conversation_id);
            return Ok(Outcome::Ignored);
        }

        let (sender_name, sender_username) = msg
            .sender
            .as_ref()
            .map(|s| (s.display_name(), s.username.clone()))
            .unwrap_or_default();
        info!(
            "[USER MESSAGE] Chat: {} (ID: {}) | From: {} (@{}) | Via: {} | Text: {}",
            msg.chat_title.as_deref().unwrap_or("(Private Chat)"),
            msg.conversation_id,
            sender_name,
            sender_username.as_deref().unwrap_or("NoUsername"),
            eligibility.reason(),
            text
        );

        let text = normalize(text, &eligibility, &mention_token);
        let (reply, persist_error) = self.exchange(msg.conversation_id, text, channel).await;

        let response = ChannelResponse::text(msg.conversation_id, &reply.text).with_reply(msg.message_id);
        channel.send(response).await?;

        Ok(Outcome::Replied {
            reply,
            persist_error,
        })
    }

    /// Append, generate, append, persist; all under the chat lock
    async fn exchange(
        &self,
        id: ConversationId,
        text: String,
        channel: &dyn Channel,
    ) -> (Reply, Option<PersistenceError>) {
        let _guard = self.store.lock(id).await;

        let window = self.store.append_trimmed(id, Turn::user(text));
        let prompt = build_prompt(&self.system_prompt, &window);

        if let Err(e) = channel.send_typing(id).await {
            warn!("Failed to send typing indicator to chat {}: {}", id, e);
        }

        let reply = self.generator.generate(&prompt).await;
        if reply.kind.is_failure() {
            warn!("[BOT] chat {} ({:?}): {}", id, reply.kind, reply.text);
        } else {
            info!("[BOT] chat {}: {}", id, reply.text);
        }

        self.store.append_trimmed(id, Turn::assistant(reply.text.clone()));

        let persist_error = match self.history_file.save_store(&self.store).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to persist history after chat {}: {}", id, e);
                Some(e)
            }
        };

        (reply, persist_error)
    }

    /// Final write at shutdown
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.history_file.save_store(&self.store).await?;
        info!(
            "History flushed: {} conversations -> {}",
            self.store.len(),
            self.history_file.path().display()
        );
        Ok(())
    }
}
