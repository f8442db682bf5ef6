//! Text normalization for inbound messages
//!
//! Images are reduced to a placeholder, and an @-mention of the bot is cut
//! out of the text before it reaches the history.

use crate::channels::InboundMessage;
use crate::router::Eligibility;

/// Stand-in for any image payload
pub const IMAGE_PLACEHOLDER: &str = "[image]";

/// Used when a message was nothing but the mention
pub const EMPTY_MENTION_FALLBACK: &str = "Hey!";

/// Text as the relay sees it, before any mention handling
pub fn canonical_text(msg: &InboundMessage) -> String {
    if msg.attachment.as_ref().is_some_and(|a| a.is_image()) {
        return IMAGE_PLACEHOLDER.to_string();
    }
    msg.text.clone().unwrap_or_default()
}

/// Remove the first occurrence of `token` and trim.
///
/// Idempotent once the text holds no further mention; each pass removes
/// exactly one occurrence.
pub fn strip_mention(text: &str, token: &str) -> String {
    let stripped = if token.is_empty() {
        text.to_string()
    } else {
        text.replacen(token, "", 1)
    };

    let stripped = stripped.trim();
    if stripped.is_empty() {
        EMPTY_MENTION_FALLBACK.to_string()
    } else {
        stripped.to_string()
    }
}

/// Payload to store as the user turn
pub fn normalize(text: String, eligibility: &Eligibility, mention_token: &str) -> String {
    if eligibility.mentioned {
        strip_mention(&text, mention_token)
    } else {
        text
    }
}
