//! Prompt assembly for one reply.

use crate::generator::GenerationRequest;
use crate::memory::Turn;

/// System instruction: persona name (when configured) followed by the tone line.
pub fn system_instruction(persona_name: Option<&str>, tone: &str) -> String {
    match persona_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!("You are {}. {}", name, tone.trim()),
        None => tone.trim().to_string(),
    }
}

/// Tone as system, then short-term context, then memory, then the new message.
///
/// Both context sources are oldest first; only their most recent
/// `context_limit` and `memory_limit` turns are kept.
pub fn build_reply_request(
    system_instruction: String,
    short_term: &[Turn],
    context_limit: usize,
    memory: &[Turn],
    memory_limit: usize,
    message: &str,
    max_tokens: u32,
) -> GenerationRequest {
    let mut context = Vec::with_capacity(context_limit + memory_limit);
    context.extend_from_slice(tail(short_term, context_limit));
    context.extend_from_slice(tail(memory, memory_limit));

    GenerationRequest::new(system_instruction, message)
        .with_context(context)
        .with_max_tokens(max_tokens)
}

fn tail<T>(items: &[T], n: usize) -> &[T] {
    &items[items.len().saturating_sub(n)..]
}
