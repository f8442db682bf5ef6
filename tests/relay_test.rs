//! Relay Integration Tests
//!
//! End-to-end flow without a Telegram connection: a recording channel stands
//! in for the platform and a scripted generator for the LLM CLI.

use async_trait::async_trait;
use chatrelay::channels::{
    Attachment, BotIdentity, Channel, ChannelError, ChannelResponse, ConversationKind,
    InboundMessage,
};
use chatrelay::generation::{Generator, Reply, ReplyKind, INTERNAL_ERROR_REPLY, RESOURCE_EXHAUSTED_REPLY};
use chatrelay::{ConversationId, HistoryFile, HistoryStore, Outcome, Relay, Role, Turn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const BOT_ID: i64 = 4242;
const DIRECTIVE: &str = "You are a friendly bot.";

/// Channel that records everything sent through it
#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<ChannelResponse>>,
    typing: Mutex<Vec<ConversationId>>,
    fail_typing: bool,
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, response: ChannelResponse) -> Result<(), ChannelError> {
        self.sent.lock().push(response);
        Ok(())
    }

    async fn send_typing(&self, conversation_id: ConversationId) -> Result<(), ChannelError> {
        if self.fail_typing {
            return Err(ChannelError::ActionFailed("offline".into()));
        }
        self.typing.lock().push(conversation_id);
        Ok(())
    }
}

/// Generator returning canned replies and remembering every prompt
struct ScriptedGenerator {
    reply: Reply,
    delay: Duration,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn new(text: &str) -> Self {
        Self::with_reply(Reply { text: text.to_string(), kind: ReplyKind::Generated })
    }

    fn with_reply(reply: Reply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Reply {
        self.prompts.lock().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}

struct TestEnvironment {
    temp_dir: TempDir,
    generator: Arc<ScriptedGenerator>,
    relay: Relay,
}

impl TestEnvironment {
    fn new(generator: ScriptedGenerator) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let generator = Arc::new(generator);
        let relay = Relay::new(
            Arc::new(HistoryStore::new()),
            Arc::new(HistoryFile::new(temp_dir.path().join("chat_histories.json"))),
            generator.clone(),
            bot(),
            DIRECTIVE,
        );
        Self { temp_dir, generator, relay }
    }

    fn history_path(&self) -> std::path::PathBuf {
        self.temp_dir.path().join("chat_histories.json")
    }
}

fn bot() -> BotIdentity {
    BotIdentity { id: BOT_ID, username: Some("relay_bot".into()) }
}

#[tokio::test]
async fn test_direct_message_full_flow() {
    let env = TestEnvironment::new(ScriptedGenerator::new("Hello there"));
    let channel = RecordingChannel::default();
    let mut msg = InboundMessage::text(100, ConversationKind::Direct, "Hi bot");
    msg.message_id = Some(7);

    let outcome = env.relay.handle(&msg, &channel).await.unwrap();

    match outcome {
        Outcome::Replied { reply, persist_error } => {
            assert_eq!(reply.text, "Hello there");
            assert!(persist_error.is_none());
        }
        Outcome::Ignored => panic!("direct message must be answered"),
    }

    let sent = channel.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Hello there");
    assert_eq!(sent[0].reply_to, Some(7));
    assert_eq!(*channel.typing.lock(), vec![ConversationId(100)]);

    let prompts = env.generator.prompts.lock();
    assert_eq!(prompts[0], "SYSTEM: You are a friendly bot.\nUSER: Hi bot\nASSISTANT:");

    let history = env.relay.store().get(ConversationId(100));
    assert_eq!(history, vec![Turn::user("Hi bot"), Turn::assistant("Hello there")]);
}

#[tokio::test]
async fn test_group_chatter_is_noop() {
    let env = TestEnvironment::new(ScriptedGenerator::new("unused"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(-500, ConversationKind::Group, "anyone up for lunch?");

    let outcome = env.relay.handle(&msg, &channel).await.unwrap();

    assert!(matches!(outcome, Outcome::Ignored));
    assert!(channel.sent.lock().is_empty());
    assert!(channel.typing.lock().is_empty());
    assert!(env.generator.prompts.lock().is_empty());
    assert!(env.relay.store().is_empty());
    assert!(!env.history_path().exists());
}

#[tokio::test]
async fn test_group_mention_is_stripped() {
    let env = TestEnvironment::new(ScriptedGenerator::new("Sure"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(-500, ConversationKind::Group, "@relay_bot   tell me a joke ");

    env.relay.handle(&msg, &channel).await.unwrap();

    let history = env.relay.store().get(ConversationId(-500));
    assert_eq!(history[0], Turn::user("tell me a joke"));
}

#[tokio::test]
async fn test_bare_mention_becomes_greeting() {
    let env = TestEnvironment::new(ScriptedGenerator::new("Hi!"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(-500, ConversationKind::Group, "@relay_bot");

    env.relay.handle(&msg, &channel).await.unwrap();

    assert_eq!(env.relay.store().get(ConversationId(-500))[0].content, "Hey!");
}

#[tokio::test]
async fn test_group_reply_to_bot_keeps_raw_text() {
    let env = TestEnvironment::new(ScriptedGenerator::new("Indeed"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(-500, ConversationKind::Group, "  really?  ").with_reply_to(BOT_ID);

    let outcome = env.relay.handle(&msg, &channel).await.unwrap();

    assert!(matches!(outcome, Outcome::Replied { .. }));
    assert_eq!(env.relay.store().get(ConversationId(-500))[0].content, "  really?  ");
}

#[tokio::test]
async fn test_group_reply_to_someone_else_ignored() {
    let env = TestEnvironment::new(ScriptedGenerator::new("unused"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(-500, ConversationKind::Group, "agreed").with_reply_to(1);

    let outcome = env.relay.handle(&msg, &channel).await.unwrap();
    assert!(matches!(outcome, Outcome::Ignored));
}

#[tokio::test]
async fn test_image_becomes_placeholder() {
    let env = TestEnvironment::new(ScriptedGenerator::new("Nice picture"));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(100, ConversationKind::Direct, "")
        .with_attachment(Attachment::Document { media_type: Some("image/webp".into()) });

    env.relay.handle(&msg, &channel).await.unwrap();

    assert_eq!(env.relay.store().get(ConversationId(100))[0].content, "[image]");
}

#[tokio::test]
async fn test_error_replies_are_stored_and_sent() {
    let env = TestEnvironment::new(ScriptedGenerator::with_reply(Reply::resource_exhausted()));
    let channel = RecordingChannel::default();
    let msg = InboundMessage::text(100, ConversationKind::Direct, "hi");

    env.relay.handle(&msg, &channel).await.unwrap();

    assert_eq!(channel.sent.lock()[0].content, RESOURCE_EXHAUSTED_REPLY);
    let history = env.relay.store().get(ConversationId(100));
    assert_eq!(history[1], Turn::assistant(RESOURCE_EXHAUSTED_REPLY));
}

#[tokio::test]
async fn test_typing_failure_is_not_fatal() {
    let env = TestEnvironment::new(ScriptedGenerator::with_reply(Reply::internal_error()));
    let channel = RecordingChannel { fail_typing: true, ..Default::default() };
    let msg = InboundMessage::text(100, ConversationKind::Direct, "hi");

    env.relay.handle(&msg, &channel).await.unwrap();

    assert_eq!(channel.sent.lock()[0].content, INTERNAL_ERROR_REPLY);
}

#[tokio::test]
async fn test_history_persisted_after_each_exchange() {
    let env = TestEnvironment::new(ScriptedGenerator::new("ok"));
    let channel = RecordingChannel::default();

    env.relay
        .handle(&InboundMessage::text(1, ConversationKind::Direct, "first"), &channel)
        .await
        .unwrap();
    env.relay
        .handle(&InboundMessage::text(2, ConversationKind::Direct, "second"), &channel)
        .await
        .unwrap();

    let loaded = HistoryFile::new(env.history_path()).load().await.unwrap();
    assert_eq!(loaded, env.relay.store().snapshot());
    assert_eq!(loaded[&ConversationId(2)][0].content, "second");
}

#[tokio::test]
async fn test_persistence_failure_still_replies() {
    let temp_dir = TempDir::new().unwrap();
    // A directory where the file should be makes the rename fail
    let blocked = temp_dir.path().join("chat_histories.json");
    std::fs::create_dir_all(blocked.join("occupied")).unwrap();

    let relay = Relay::new(
        Arc::new(HistoryStore::new()),
        Arc::new(HistoryFile::new(&blocked)),
        Arc::new(ScriptedGenerator::new("still here")),
        bot(),
        DIRECTIVE,
    );
    let channel = RecordingChannel::default();

    let outcome = relay
        .handle(&InboundMessage::text(1, ConversationKind::Direct, "hi"), &channel)
        .await
        .unwrap();

    match outcome {
        Outcome::Replied { reply, persist_error } => {
            assert_eq!(reply.text, "still here");
            assert!(persist_error.is_some());
        }
        Outcome::Ignored => panic!("expected a reply"),
    }
    assert_eq!(channel.sent.lock().len(), 1);
}

#[tokio::test]
async fn test_prompt_window_bounded() {
    let env = TestEnvironment::new(ScriptedGenerator::new("ack"));
    let channel = RecordingChannel::default();

    for i in 0..60 {
        let msg = InboundMessage::text(9, ConversationKind::Direct, &format!("message {}", i));
        env.relay.handle(&msg, &channel).await.unwrap();
    }

    for prompt in env.generator.prompts.lock().iter() {
        let turns = prompt.lines().filter(|l| l.starts_with("USER:") || l.starts_with("ASSISTANT: ")).count();
        assert!(turns <= 51, "prompt carried {} turns", turns);
    }

    let history = env.relay.store().get(ConversationId(9));
    assert!(history.len() <= 51);
    assert_eq!(history.last().unwrap(), &Turn::assistant("ack"));
    assert_eq!(history[history.len() - 2], Turn::user("message 59"));
}

#[tokio::test]
async fn test_concurrent_messages_same_chat_keep_both_turns() {
    let env = TestEnvironment::new(ScriptedGenerator::new("reply").delayed(Duration::from_millis(50)));
    let channel = RecordingChannel::default();

    let first = InboundMessage::text(77, ConversationKind::Direct, "one");
    let second = InboundMessage::text(77, ConversationKind::Direct, "two");

    let (a, b) = tokio::join!(
        env.relay.handle(&first, &channel),
        env.relay.handle(&second, &channel)
    );
    a.unwrap();
    b.unwrap();

    let history = env.relay.store().get(ConversationId(77));
    assert_eq!(history.len(), 4);

    // Exchanges are serialized: user, assistant, user, assistant
    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);

    let users: Vec<&str> = history
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.content.as_str())
        .collect();
    assert!(users.contains(&"one") && users.contains(&"two"));

    // The second prompt saw the first exchange
    let prompts = env.generator.prompts.lock();
    assert!(prompts[1].contains("ASSISTANT: reply\n"));
}

#[tokio::test]
async fn test_different_chats_run_concurrently() {
    let env = TestEnvironment::new(ScriptedGenerator::new("reply").delayed(Duration::from_millis(300)));
    let channel = RecordingChannel::default();

    let a = InboundMessage::text(1, ConversationKind::Direct, "a");
    let b = InboundMessage::text(2, ConversationKind::Direct, "b");

    let start = std::time::Instant::now();
    let (ra, rb) = tokio::join!(env.relay.handle(&a, &channel), env.relay.handle(&b, &channel));
    ra.unwrap();
    rb.unwrap();

    assert!(start.elapsed() < Duration::from_millis(550));
    assert_eq!(env.relay.store().len(), 2);
}

#[tokio::test]
async fn test_open_loads_existing_history() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("chat_histories.json");
    std::fs::write(
        &path,
        r#"{ "100": [ { "role": "user", "content": "remember me" }, { "role": "assistant", "content": "sure" } ] }"#,
    )
    .unwrap();

    let generator = Arc::new(ScriptedGenerator::new("I remember"));
    let relay = Relay::open(HistoryFile::new(&path), 50, generator.clone(), bot(), DIRECTIVE)
        .await
        .unwrap();
    let channel = RecordingChannel::default();

    relay
        .handle(&InboundMessage::text(100, ConversationKind::Direct, "do you?"), &channel)
        .await
        .unwrap();

    assert_eq!(
        generator.prompts.lock()[0],
        "SYSTEM: You are a friendly bot.\nUSER: remember me\nASSISTANT: sure\nUSER: do you?\nASSISTANT:"
    );

    relay.flush().await.unwrap();
    let reloaded = HistoryFile::new(&path).load().await.unwrap();
    assert_eq!(reloaded[&ConversationId(100)].len(), 4);
}
