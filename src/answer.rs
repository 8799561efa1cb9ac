//! Question answering over the project index.
//!
//! [`get_answer`] is the streaming entry point: it returns the delta stream
//! and the provenance list together. [`ask`] drives a full turn: it forwards
//! deltas to a callback, then records the question and the finished answer
//! in the conversation (creating one when needed).

use anyhow::Result;
use futures::StreamExt;
use serde::Serialize;

use codelore_core::models::{ChatMessage, Source};
use codelore_core::retrieval::{self, Answer};

use crate::app::App;
use crate::conversations::{create_conversation, get_conversation, load_history, record_turn};

/// Retrieve context and start a streamed answer. `conversation_id` supplies
/// the prior turns.
pub async fn get_answer(
    app: &App,
    project_id: i64,
    question: &str,
    conversation_id: Option<i64>,
) -> Result<Answer> {
    let history: Vec<ChatMessage> = match conversation_id {
        Some(id) => {
            get_conversation(&app.pool, project_id, id).await?;
            load_history(&app.pool, id).await?
        }
        None => Vec::new(),
    };

    let store = app.store();
    retrieval::get_answer(
        &store,
        app.gateway.as_ref(),
        project_id,
        question,
        &history,
        &app.config.retrieval.limits(),
    )
    .await
}

#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub conversation_id: i64,
    pub answer: String,
    pub sources: Vec<Source>,
}

/// Answer `question`, streaming deltas into `on_delta`, and store the turn.
///
/// Nothing is recorded when the stream fails part way.
pub async fn ask<F>(
    app: &App,
    project_id: i64,
    question: &str,
    conversation_id: Option<i64>,
    mut on_delta: F,
) -> Result<Turn>
where
    F: FnMut(&str),
{
    let Answer {
        mut stream,
        sources,
    } = get_answer(app, project_id, question, conversation_id).await?;

    let mut answer = String::new();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        on_delta(&delta);
        answer.push_str(&delta);
    }

    let conversation_id = match conversation_id {
        Some(id) => id,
        None => {
            create_conversation(&app.pool, project_id, &conversation_title(question))
                .await?
                .id
        }
    };
    record_turn(&app.pool, conversation_id, question, &answer, &sources).await?;

    Ok(Turn {
        conversation_id,
        answer,
        sources,
    })
}

fn conversation_title(question: &str) -> String {
    let line = question.lines().next().unwrap_or("").trim();
    let mut title: String = line.chars().take(60).collect();
    if line.chars().count() > 60 {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_first_line_capped() {
        assert_eq!(conversation_title("How does sync work?\nmore"), "How does sync work?");
        let long = "x".repeat(100);
        let title = conversation_title(&long);
        assert_eq!(title.chars().count(), 61);
        assert!(title.ends_with('…'));
    }
}
