//! Knowledge-note distillation helpers.

use std::collections::HashSet;

use crate::models::{ChatMessage, Role, Source};

/// Reply meaning the conversation settled nothing worth keeping.
pub const NO_DECISION_SENTINEL: &str = "NO_DECISION";

const SYSTEM_PROMPT: &str = "You read a conversation about a software project and record what it settled. \
Reply with exactly one sentence stating the decision, conclusion or fact established, \
phrased so it makes sense without the conversation. \
If nothing significant was decided or learned, reply with the single word NO_DECISION.";

/// True when `messages` holds at least one user message followed later by an
/// assistant reply.
pub fn has_exchange(messages: &[ChatMessage]) -> bool {
    let Some(first_user) = messages.iter().position(|m| m.role == Role::User) else {
        return false;
    };
    messages[first_user..].iter().any(|m| m.role == Role::Assistant)
}

/// Build the chat messages asking for a one-sentence knowledge note.
pub fn knowledge_messages(transcript: &[ChatMessage]) -> Vec<ChatMessage> {
    let text = transcript
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| format!("{}: {}", m.role.as_str(), m.content.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(text)]
}

/// The note text, or `None` for the sentinel or an empty reply.
pub fn parse_knowledge_reply(reply: &str) -> Option<String> {
    let text = reply.trim().trim_matches('"').trim();
    let bare = text.trim_end_matches('.');
    if text.is_empty() || bare.eq_ignore_ascii_case(NO_DECISION_SENTINEL) {
        return None;
    }
    Some(text.to_string())
}

/// Flatten per-message source lists, keeping the first occurrence of each
/// `(type, id)` pair.
pub fn collect_cited_sources<'a, I>(lists: I) -> Vec<Source>
where
    I: IntoIterator<Item = &'a [Source]>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for list in lists {
        for source in list {
            if seen.insert((source.source_type, source.id.clone())) {
                out.push(source.clone());
            }
        }
    }
    out
}
