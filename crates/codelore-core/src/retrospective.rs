//! Retrospective task generation: prompt construction and response parsing.
//!
//! A commit that does not reference a task is shown to the model together
//! with its patch. The model answers with a JSON object
//! `{"title", "category", "description"}` or with the bare sentinel
//! `TRIVIAL`. The reply is untrusted: anything that does not parse into all
//! three non-empty fields is reported as [`Retrospective::Unparseable`] and
//! no task is created.

use serde::Deserialize;

use crate::gateway::truncate_chars;
use crate::models::{ChatMessage, CommitInfo};

/// Reply that marks a commit as not worth a task.
pub const TRIVIAL_SENTINEL: &str = "TRIVIAL";

const SYSTEM_PROMPT: &str = "You maintain the task history of a software project. \
Given a commit message and its patch, describe the unit of work the commit completed as a task. \
Reply with a single JSON object with exactly these string fields: \
\"title\" (under 80 characters, imperative mood), \
\"category\" (one of: feature, bugfix, refactor, docs, test, chore), \
\"description\" (two or three sentences). \
If the change is trivial (formatting, version bumps, typo fixes, merge noise), reply with the single word TRIVIAL.";

/// A task synthesized from a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrospectiveTask {
    pub title: String,
    pub category: String,
    pub description: String,
}

impl RetrospectiveTask {
    /// Text that gets embedded for the task vector.
    pub fn embedding_text(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
    }
}

/// Interpretation of a model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrospective {
    Task(RetrospectiveTask),
    Trivial,
    /// The reply was neither the sentinel nor a complete task object.
    Unparseable(String),
}

#[derive(Deserialize)]
struct RawTask {
    title: Option<String>,
    category: Option<String>,
    description: Option<String>,
}

/// Build the chat messages asking for a retrospective task.
pub fn retrospective_messages(
    commit: &CommitInfo,
    patch: &str,
    max_patch_chars: usize,
) -> Vec<ChatMessage> {
    let user = format!(
        "Commit {}\nAuthor: {}\n\nMessage:\n{}\n\nPatch:\n{}",
        commit.hash,
        commit.author,
        commit.message.trim(),
        truncate_chars(patch, max_patch_chars)
    );
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

/// Parse a model reply into a [`Retrospective`].
pub fn parse_retrospective(reply: &str) -> Retrospective {
    let body = strip_code_fence(reply.trim());
    let bare = body.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace());
    if bare.eq_ignore_ascii_case(TRIVIAL_SENTINEL) {
        return Retrospective::Trivial;
    }

    let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) else {
        return Retrospective::Unparseable("no JSON object in reply".to_string());
    };
    if end < start {
        return Retrospective::Unparseable("no JSON object in reply".to_string());
    }

    let raw: RawTask = match serde_json::from_str(&body[start..=end]) {
        Ok(raw) => raw,
        Err(e) => return Retrospective::Unparseable(format!("invalid JSON: {}", e)),
    };

    match validate(raw) {
        Ok(task) => Retrospective::Task(task),
        Err(reason) => Retrospective::Unparseable(reason),
    }
}

fn validate(raw: RawTask) -> Result<RetrospectiveTask, String> {
    Ok(RetrospectiveTask {
        title: required(raw.title, "title")?,
        category: required(raw.category, "category")?.to_ascii_lowercase(),
        description: required(raw.description, "description")?,
    })
}

fn required(value: Option<String>, name: &str) -> Result<String, String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("missing field '{}'", name)),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let reply = r#"{"title":"Add login form","category":"Feature","description":"Adds a login form."}"#;
        assert_eq!(
            parse_retrospective(reply),
            Retrospective::Task(RetrospectiveTask {
                title: "Add login form".into(),
                category: "feature".into(),
                description: "Adds a login form.".into(),
            })
        );
    }

    #[test]
    fn parses_fenced_json_with_chatter() {
        let reply = "```json\nHere you go: {\"title\":\"T\",\"category\":\"chore\",\"description\":\"D\"}\n```";
        assert!(matches!(parse_retrospective(reply), Retrospective::Task(t) if t.title == "T"));
    }

    #[test]
    fn recognises_sentinel() {
        assert_eq!(parse_retrospective("TRIVIAL"), Retrospective::Trivial);
        assert_eq!(parse_retrospective("  \"trivial\".\n"), Retrospective::Trivial);
        assert_eq!(parse_retrospective("```\nTRIVIAL\n```"), Retrospective::Trivial);
    }

    #[test]
    fn missing_or_blank_fields_are_unparseable() {
        let reply = r#"{"title":"Only a title","category":"feature"}"#;
        assert!(matches!(parse_retrospective(reply), Retrospective::Unparseable(r) if r.contains("description")));
        let reply = r#"{"title":"  ","category":"x","description":"d"}"#;
        assert!(matches!(parse_retrospective(reply), Retrospective::Unparseable(_)));
    }

    #[test]
    fn malformed_json_is_unparseable() {
        assert!(matches!(parse_retrospective("{not json"), Retrospective::Unparseable(_)));
        assert!(matches!(parse_retrospective("I think this adds a feature"), Retrospective::Unparseable(_)));
        assert!(matches!(parse_retrospective(r#"{"title": 5}"#), Retrospective::Unparseable(_)));
    }

    #[test]
    fn prompt_truncates_patch() {
        let commit = CommitInfo {
            hash: "abc".into(),
            author: "dev".into(),
            timestamp: 0,
            message: "Do things\n".into(),
        };
        let patch = "x".repeat(100);
        let msgs = retrospective_messages(&commit, &patch, 10);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.ends_with(&"x".repeat(10)));
        assert!(!msgs[1].content.contains(&"x".repeat(11)));
    }
}
