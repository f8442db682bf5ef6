//! Channel Trait Definitions
//!
//! Platform-neutral view of an inbound chat message and the two outbound
//! operations the relay needs from a messaging platform.

use async_trait::async_trait;

use crate::conversation::ConversationId;

/// Error types for channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Chat action failed: {0}")]
    ActionFailed(String),
}

/// Direct (one-to-one) or group conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Non-text payload carried by a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// Inline photo
    Photo,
    /// File upload with its declared media type, if any
    Document { media_type: Option<String> },
}

impl Attachment {
    /// Photos and documents declared as `image/*`
    pub fn is_image(&self) -> bool {
        match self {
            Attachment::Photo => true,
            Attachment::Document { media_type } => media_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/")),
        }
    }
}

/// Who sent a message
#[derive(Debug, Clone, Default)]
pub struct Sender {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl Sender {
    /// "First Last", without dangling whitespace
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name.as_deref().unwrap_or(""))
            .trim()
            .to_string()
    }
}

/// The bot's own account
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

impl BotIdentity {
    /// `@username`, or empty if the account has no username
    pub fn mention_token(&self) -> String {
        self.username
            .as_deref()
            .map(|u| format!("@{}", u))
            .unwrap_or_default()
    }
}

/// Universal inbound message representation
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform message ID (used to thread the reply)
    pub message_id: Option<i32>,

    /// Chat/conversation ID
    pub conversation_id: ConversationId,

    pub kind: ConversationKind,

    /// Chat title, groups only
    pub chat_title: Option<String>,

    pub sender: Option<Sender>,

    pub text: Option<String>,

    /// Caption of a media message; never forwarded
    pub caption: Option<String>,

    pub attachment: Option<Attachment>,

    /// Sender ID of the message this one replies to
    pub reply_to_sender: Option<i64>,
}

impl InboundMessage {
    /// Create a simple text message
    pub fn text(conversation_id: i64, kind: ConversationKind, text: &str) -> Self {
        Self {
            message_id: None,
            conversation_id: ConversationId(conversation_id),
            kind,
            chat_title: None,
            sender: None,
            text: Some(text.to_string()),
            caption: None,
            attachment: None,
            reply_to_sender: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn with_reply_to(mut self, sender_id: i64) -> Self {
        self.reply_to_sender = Some(sender_id);
        self
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Does this message reply to something `bot` sent?
    pub fn is_reply_to(&self, bot: &BotIdentity) -> bool {
        self.reply_to_sender == Some(bot.id)
    }
}

/// Reply to send back through the channel
#[derive(Debug, Clone)]
pub struct ChannelResponse {
    pub conversation_id: ConversationId,
    pub content: String,
    /// Reply to specific message
    pub reply_to: Option<i32>,
}

impl ChannelResponse {
    pub fn text(conversation_id: ConversationId, content: &str) -> Self {
        Self {
            conversation_id,
            content: content.to_string(),
            reply_to: None,
        }
    }

    pub fn with_reply(mut self, reply_to: Option<i32>) -> Self {
        self.reply_to = reply_to;
        self
    }
}

/// Channel trait - implement for each platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name identifier
    fn name(&self) -> &str;

    /// Send a response
    async fn send(&self, response: ChannelResponse) -> Result<(), ChannelError>;

    /// Send typing indicator
    async fn send_typing(&self, conversation_id: ConversationId) -> Result<(), ChannelError>;
}
