//! Chat Relay
//!
//! Telegram bot that answers with a local LLM command-line tool.
//!
//! # Features
//!
//! - **Reply routing**: direct chats, @-mentions and replies to the bot
//! - **Rolling history**: per-chat working window of the last 50 turns
//! - **Prompt assembly**: `SYSTEM:` / `USER:` / `ASSISTANT:` transcript
//! - **Generation**: `ollama run <model> <prompt>` with timeout and error mapping
//! - **Persistence**: JSON history file, rewritten atomically after every reply
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Dispatcher ──► Relay ──► ollama run <model>
//!                               │
//!                               ├── Router (reply or ignore)
//!                               ├── Normalizer ([image], @mention)
//!                               ├── HistoryStore (per-chat locks)
//!                               ├── Prompt builder
//!                               └── HistoryFile (chat_histories.json)
//! ```

pub mod channels;
pub mod config;
pub mod conversation;
pub mod generation;
pub mod normalize;
pub mod persistence;
pub mod prompt;
pub mod relay;
pub mod router;
pub mod telegram;


pub use channels::{BotIdentity, Channel, ChannelError, InboundMessage};
pub use config::{Config, ConfigError};
pub use conversation::{ConversationId, HistoryStore, Role, Snapshot, Turn};
pub use generation::{classify, CommandGenerator, Generator, GeneratorConfig, Reply, ReplyKind};
pub use persistence::{HistoryFile, PersistenceError};
pub use prompt::build_prompt;
pub use relay::{Outcome, Relay, RelayError};
pub use router::{decide, Eligibility};
