//! Messaging channel abstraction
//!
//! The relay only talks to platforms through the `Channel` trait; Telegram
//! lives in [`crate::telegram`].

pub mod traits;

pub use traits::{
    Attachment, BotIdentity, Channel, ChannelError, ChannelResponse, ConversationKind,
    InboundMessage, Sender,
};
