//! Chat Relay - Entry Point
//!
//! Options:
//! - --json: log JSON lines to stderr instead of colored text
//! - --help / -h: usage

use chatrelay::Config;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Parse args
    let args: Vec<String> = std::env::args().collect();
    let json_logs = args.iter().any(|a| a == "--json");
    let help_mode = args.iter().any(|a| a == "--help" || a == "-h");

    if help_mode {
        println!("Chat Relay v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: chatrelay [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --json             Log JSON lines to stderr");
        println!("  --help, -h         Show this help");
        println!();
        println!("Environment variables:");
        println!("  TELEGRAM_BOT_TOKEN             Bot token (else RELAY_TOKEN_FILE, default token.cfg)");
        println!("  RELAY_SYSTEM_PROMPT            Personality (else RELAY_PERSONALITY_FILE, default personality.cfg)");
        println!("  RELAY_HISTORY_FILE             History file (default: chat_histories.json)");
        println!("  RELAY_MODEL                    Model name (default: llama3.1:8b)");
        println!("  RELAY_GENERATOR_BIN            Generation CLI (default: ollama)");
        println!("  RELAY_GENERATOR_ARGS           Arguments before the model (default: run)");
        println!("  RELAY_GENERATION_TIMEOUT_SECS  Generation timeout (default: 300)");
        println!("  RELAY_HISTORY_WINDOW           Turns kept per chat (default: 50)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        // Live chat feed - log to stdout with colors
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Chat Relay v{}", env!("CARGO_PKG_VERSION"));

    // Token and personality must exist before any message is processed
    let config = Config::from_env()?;
    chatrelay::telegram::run_telegram_bot(config).await?;

    Ok(())
}
