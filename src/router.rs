//! Reply Router
//!
//! Decides whether an inbound message warrants a reply:
//! - always in direct chats
//! - in groups, when the bot is @-mentioned
//! - in groups, when the message replies to one of the bot's own messages
//!
//! Everything else is group chatter and is dropped without touching state.

use crate::channels::ConversationKind;

/// Why (or whether) the bot responds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Eligibility {
    pub direct: bool,
    pub mentioned: bool,
    pub reply_to_bot: bool,
}

impl Eligibility {
    pub fn must_respond(&self) -> bool {
        self.direct || self.mentioned || self.reply_to_bot
    }

    /// Short label for logs
    pub fn reason(&self) -> &'static str {
        if self.direct {
            "direct"
        } else if self.mentioned {
            "mention"
        } else if self.reply_to_bot {
            "reply"
        } else {
            "ignored"
        }
    }
}

/// Route a message. Pure: no I/O, no state.
///
/// An empty `mention_token` never matches.
pub fn decide(
    kind: ConversationKind,
    text: &str,
    mention_token: &str,
    reply_to_bot: bool,
) -> Eligibility {
    Eligibility {
        direct: kind == ConversationKind::Direct,
        mentioned: !mention_token.is_empty() && text.contains(mention_token),
        reply_to_bot,
    }
}
