//! Generation process
//!
//! Runs the local LLM CLI (`ollama run <model> <prompt>` by default) once per
//! exchange and turns whatever it printed into a reply. The process never
//! fails the pipeline: missing binaries, silence, memory exhaustion and
//! timeouts all map to fixed reply texts.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Phrase ollama prints when the model does not fit in RAM
const MEMORY_EXHAUSTION_MARKER: &str = "requires more system memory";

pub const RESOURCE_EXHAUSTED_REPLY: &str =
    "Code 503 Service unavailable. Likely cause: System memory overload.";

pub const INTERNAL_ERROR_REPLY: &str = "Code 500 Internal Server Error";

/// Default generation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ANSI regex")
});

/// How a reply came about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// Text produced on stdout
    Generated,
    /// Nothing on stdout; stderr forwarded as-is
    Stderr,
    /// Model needs more memory than the host has
    ResourceExhausted,
    /// No usable output, or the process could not be started
    InternalError,
    /// Process exceeded the timeout and was killed
    TimedOut,
}

impl ReplyKind {
    /// Stderr text is still usable output and is sent like a generated reply
    pub fn is_failure(&self) -> bool {
        !matches!(self, ReplyKind::Generated | ReplyKind::Stderr)
    }
}

/// Classified output of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub kind: ReplyKind,
}

impl Reply {
    pub fn resource_exhausted() -> Self {
        Self {
            text: RESOURCE_EXHAUSTED_REPLY.to_string(),
            kind: ReplyKind::ResourceExhausted,
        }
    }

    pub fn internal_error() -> Self {
        Self {
            text: INTERNAL_ERROR_REPLY.to_string(),
            kind: ReplyKind::InternalError,
        }
    }

    pub fn timed_out() -> Self {
        Self {
            text: INTERNAL_ERROR_REPLY.to_string(),
            kind: ReplyKind::TimedOut,
        }
    }
}

/// Strip ANSI escape codes from CLI output
pub fn strip_ansi_codes(s: &str) -> String {
    ANSI_ESCAPE.replace_all(s, "").to_string()
}

/// Classify captured output, first match wins:
/// memory exhaustion, then stdout, then stderr, then internal error.
pub fn classify(stdout: &str, stderr: &str) -> Reply {
    let combined = format!("{}{}", stdout, stderr).to_lowercase();
    if combined.contains(MEMORY_EXHAUSTION_MARKER) {
        return Reply::resource_exhausted();
    }

    let out = stdout.trim();
    if !out.is_empty() {
        return Reply {
            text: out.to_string(),
            kind: ReplyKind::Generated,
        };
    }

    let err = stderr.trim();
    if !err.is_empty() {
        return Reply {
            text: err.to_string(),
            kind: ReplyKind::Stderr,
        };
    }

    Reply::internal_error()
}

/// Anything that can turn a prompt into a reply
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Reply;
}

/// Generation CLI configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Executable to run
    pub program: String,
    /// Arguments placed before the model (e.g. `run`)
    pub args: Vec<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "ollama".to_string(),
            args: vec!["run".to_string()],
            model: "llama3.1:8b".to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Generator backed by an external process
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    config: GeneratorConfig,
}

impl CommandGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    async fn run(&self, prompt: &str) -> Reply {
        let start = Instant::now();
        debug!(
            "Invoking {} (model={}) with prompt length: {}",
            self.config.program,
            self.config.model,
            prompt.len()
        );

        let child = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&self.config.model)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn {}: {}", self.config.program, e);
                return Reply::internal_error();
            }
        };

        // Dropping the future on timeout kills the child
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                error!("Failed to wait for {}: {}", self.config.program, e);
                return Reply::internal_error();
            }
            Err(_) => {
                warn!(
                    "{} timed out after {:?}, process killed",
                    self.config.program, self.config.timeout
                );
                return Reply::timed_out();
            }
        };

        let stdout = strip_ansi_codes(&String::from_utf8_lossy(&output.stdout));
        let stderr = strip_ansi_codes(&String::from_utf8_lossy(&output.stderr));

        info!(
            "{} completed in {:?} with status: {:?} ({} bytes stdout, {} bytes stderr)",
            self.config.program,
            start.elapsed(),
            output.status,
            stdout.len(),
            stderr.len()
        );

        let reply = classify(&stdout, &stderr);
        match reply.kind {
            ReplyKind::ResourceExhausted => warn!("Model ran out of system memory"),
            ReplyKind::Stderr => warn!("No stdout, forwarding stderr as reply"),
            ReplyKind::InternalError => warn!("Generation produced no output"),
            _ => {}
        }
        reply
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(&self, prompt: &str) -> Reply {
        self.run(prompt).await
    }
}
