//! Prompt assembly
//!
//! Flattens the system directive and the working window into the single text
//! blob the generation CLI takes as its argument.

use crate::conversation::{Role, Turn};

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "USER:",
        Role::Assistant => "ASSISTANT:",
    }
}

/// Build the full prompt. Ends with a bare `ASSISTANT:` for the model to continue.
pub fn build_prompt(directive: &str, turns: &[Turn]) -> String {
    let body: usize = turns.iter().map(|t| t.content.len() + 12).sum();
    let mut prompt = String::with_capacity(directive.len() + body + 24);

    prompt.push_str("SYSTEM: ");
    prompt.push_str(directive);
    prompt.push('\n');

    for turn in turns {
        prompt.push_str(role_label(turn.role));
        prompt.push(' ');
        prompt.push_str(&turn.content);
        prompt.push('\n');
    }

    prompt.push_str(role_label(Role::Assistant));
    prompt
}
