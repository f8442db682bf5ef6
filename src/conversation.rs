//! Conversation Store
//!
//! Keeps the turn history of every chat in memory. Each chat is bounded to a
//! rolling working window: before a turn is appended the history is cut down to
//! the most recent `window` turns, so a prompt never sees more than
//! `window + 1` turns.
//!
//! The map itself sits behind a short-lived lock. Whole exchanges (user turn,
//! generation, assistant turn, persistence) are serialized per chat through
//! [`HistoryStore::lock`], so unrelated chats never wait on each other.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Maximum prior turns kept per conversation (rolling window)
pub const MAX_TURNS_PER_CONVERSATION: usize = 50;

/// Stable identifier of a chat/thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub i64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConversationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(ConversationId)
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        ConversationId(id)
    }
}

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Full copy of every conversation, used for persistence
pub type Snapshot = HashMap<ConversationId, Vec<Turn>>;

/// In-memory conversation history shared by all message handlers
pub struct HistoryStore {
    conversations: RwLock<Snapshot>,
    locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    window: usize,
}

impl HistoryStore {
    /// Empty store with the default window
    pub fn new() -> Self {
        Self::with_window(MAX_TURNS_PER_CONVERSATION)
    }

    /// Empty store with a custom window
    pub fn with_window(window: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            window,
        }
    }

    /// Store pre-populated from a persisted snapshot
    pub fn from_snapshot(snapshot: Snapshot, window: usize) -> Self {
        let store = Self::with_window(window);
        store.load(snapshot);
        store
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Stored turns for a conversation, empty if never seen
    pub fn get(&self, id: ConversationId) -> Vec<Turn> {
        self.conversations
            .read()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }

    /// Trim to the last `window` turns, append `turn`, store and return the result
    pub fn append_trimmed(&self, id: ConversationId, turn: Turn) -> Vec<Turn> {
        let mut conversations = self.conversations.write();
        let history = conversations.entry(id).or_default();

        if history.len() > self.window {
            let excess = history.len() - self.window;
            history.drain(..excess);
        }
        history.push(turn);

        debug!("Chat {} now holds {} turns", id, history.len());
        history.clone()
    }

    /// Read-only copy of every conversation
    pub fn snapshot(&self) -> Snapshot {
        self.conversations.read().clone()
    }

    /// Replace the store contents (startup)
    pub fn load(&self, snapshot: Snapshot) {
        *self.conversations.write() = snapshot;
    }

    /// Number of known conversations
    pub fn len(&self) -> usize {
        self.conversations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.read().is_empty()
    }

    /// Exclusive access to one conversation for the length of an exchange.
    ///
    /// Only handlers for the same chat contend; the guard must be held from the
    /// user-turn append through persistence.
    pub async fn lock(&self, id: ConversationId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
