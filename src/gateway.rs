//! Model gateway implementations.
//!
//! - **[`DisabledGateway`]**: fails every call; used when `model.provider =
//!   "disabled"`.
//! - **[`OpenAiGateway`]**: talks to an OpenAI-compatible HTTP API for
//!   embeddings (`POST {base_url}/embeddings`), completions and streamed
//!   completions (`POST {base_url}/chat/completions`, server-sent events).
//!
//! Errors propagate to the caller as-is. Nothing is retried: the ingestion
//! engines isolate a failure to the file or commit being processed and move
//! on, so a retry loop here would only stretch a failing run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest_eventsource::retry::Never;
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource};

use codelore_core::gateway::{ModelGateway, TextStream};
use codelore_core::models::ChatMessage;

use crate::config::ModelConfig;

/// Build the gateway selected by `config.provider`.
///
/// # Errors
///
/// Unknown providers, missing model settings and a missing API key
/// environment variable are all fatal.
pub fn create_gateway(config: &ModelConfig) -> Result<Arc<dyn ModelGateway>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGateway)),
        "openai" => Ok(Arc::new(OpenAiGateway::new(config)?)),
        other => bail!("Unknown model provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledGateway;

#[async_trait]
impl ModelGateway for DisabledGateway {
    fn embedding_model(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Model provider is disabled; set [model] provider = \"openai\" in the config")
    }

    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Model provider is disabled; set [model] provider = \"openai\" in the config")
    }

    async fn complete_stream(&self, _messages: &[ChatMessage]) -> Result<TextStream> {
        bail!("Model provider is disabled; set [model] provider = \"openai\" in the config")
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    dims: usize,
    batch_size: usize,
}

impl OpenAiGateway {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let embedding_model = config
            .embedding_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.embedding_model required for OpenAI provider"))?;
        let chat_model = config
            .chat_model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.chat_model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("model.dims required for OpenAI provider"))?;

        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} environment variable not set", config.api_key_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            embedding_model,
            chat_model,
            dims,
            batch_size: config.batch_size.max(1),
        })
    }

    fn request(&self, endpoint: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, endpoint))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn post(&self, endpoint: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .request(endpoint, body)
            .send()
            .await
            .with_context(|| format!("request to {} failed", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Model API error {}: {}", status, body_text);
        }
        Ok(response)
    }

    fn chat_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.chat_model,
            "messages": messages,
            "stream": stream,
        })
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.embedding_model,
                "input": batch,
            });
            let json: serde_json::Value = self.post("embeddings", &body).await?.json().await?;
            let batch_vectors = parse_embeddings_response(&json, self.dims)?;
            if batch_vectors.len() != batch.len() {
                bail!(
                    "Model API returned {} embeddings for {} inputs",
                    batch_vectors.len(),
                    batch.len()
                );
            }
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let json: serde_json::Value = self
            .post("chat/completions", &self.chat_body(messages, false))
            .await?
            .json()
            .await?;
        parse_chat_response(&json)
    }

    async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let request = self.request("chat/completions", &self.chat_body(messages, true));
        let mut source =
            EventSource::new(request).context("Failed to open completion event stream")?;
        source.set_retry_policy(Box::new(Never));
        Ok(stream_deltas(source))
    }
}

/// Extract `data[].embedding` in `index` order, checking dimensionality.
fn parse_embeddings_response(json: &serde_json::Value, dims: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vec.len() != dims {
            bail!(
                "Embedding has {} dimensions, expected {} (check model.dims)",
                vec.len(),
                dims
            );
        }

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(position as u64);
        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))
}

#[derive(Debug, PartialEq, Eq)]
enum StreamEvent {
    Delta(String),
    Done,
    Ignore,
}

/// Interpret the data payload of one chat-completions stream event.
fn parse_stream_event(data: &str) -> Result<StreamEvent> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }
    if data.is_empty() {
        return Ok(StreamEvent::Ignore);
    }

    let json: serde_json::Value =
        serde_json::from_str(data).with_context(|| format!("Invalid stream event: {}", data))?;
    if let Some(err) = json.get("error") {
        bail!("Model API stream error: {}", err);
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .map(|s| StreamEvent::Delta(s.to_string()))
        .unwrap_or(StreamEvent::Ignore))
}

/// Turn server-sent events into text deltas. The stream ends at `[DONE]`,
/// at the first error, or when the server closes the connection.
fn stream_deltas<S>(events: S) -> TextStream
where
    S: Stream<Item = Result<Event, EventSourceError>> + Unpin + Send + 'static,
{
    futures::stream::unfold(Some(events), |state| async move {
        let mut events = state?;
        loop {
            let event = events.next().await;
            match event {
                None | Some(Err(EventSourceError::StreamEnded)) => return None,
                Some(Ok(Event::Open)) => {}
                Some(Ok(Event::Message(msg))) => match parse_stream_event(&msg.data) {
                    Ok(StreamEvent::Delta(delta)) if !delta.is_empty() => {
                        return Some((Ok(delta), Some(events)))
                    }
                    Ok(StreamEvent::Done) => return None,
                    Ok(_) => {}
                    Err(e) => return Some((Err(e), None)),
                },
                Some(Err(EventSourceError::InvalidStatusCode(status, response))) => {
                    let body_text = response.text().await.unwrap_or_default();
                    return Some((Err(anyhow!("Model API error {}: {}", status, body_text)), None));
                }
                Some(Err(e)) => return Some((Err(anyhow!("Model stream failed: {}", e)), None)),
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventsource_stream::Event as MessageEvent;

    fn message(data: &str) -> Result<Event, EventSourceError> {
        Ok(Event::Message(MessageEvent {
            event: "message".to_string(),
            data: data.to_string(),
            id: String::new(),
            retry: None,
        }))
    }

    #[test]
    fn stream_event_kinds() {
        assert_eq!(parse_stream_event("[DONE]").unwrap(), StreamEvent::Done);
        assert_eq!(parse_stream_event("").unwrap(), StreamEvent::Ignore);
        assert_eq!(
            parse_stream_event(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            StreamEvent::Delta("Hi".into())
        );
        assert_eq!(
            parse_stream_event(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamEvent::Ignore
        );
        assert!(parse_stream_event("{oops").is_err());
        assert!(parse_stream_event(r#"{"error":{"message":"quota"}}"#).is_err());
    }

    #[tokio::test]
    async fn deltas_stop_at_done() {
        let events = vec![
            Ok(Event::Open),
            message(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#),
            message(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#),
            message(r#"{"choices":[{"delta":{"content":" world"}}]}"#),
            message("[DONE]"),
            message(r#"{"choices":[{"delta":{"content":"late"}}]}"#),
        ];
        let deltas: Vec<String> = stream_deltas(futures::stream::iter(events))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn closed_connection_ends_the_stream() {
        let events = vec![
            message(r#"{"choices":[{"delta":{"content":"end"}}]}"#),
            Err(EventSourceError::StreamEnded),
        ];
        let deltas: Vec<String> = stream_deltas(futures::stream::iter(events))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["end".to_string()]);
    }

    #[tokio::test]
    async fn bad_event_fails_once_and_ends() {
        let events = vec![
            message(r#"{"choices":[{"delta":{"content":"par"}}]}"#),
            message(r#"{"error":{"message":"overloaded"}}"#),
            message(r#"{"choices":[{"delta":{"content":"never"}}]}"#),
        ];
        let items: Vec<Result<String>> = stream_deltas(futures::stream::iter(events)).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "par");
        assert!(items[1].as_ref().unwrap_err().to_string().contains("overloaded"));
    }

    #[test]
    fn embeddings_are_ordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        let vecs = parse_embeddings_response(&json, 2).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn embeddings_with_wrong_dims_are_rejected() {
        let json = serde_json::json!({"data": [{"index": 0, "embedding": [1.0, 0.0, 0.5]}]});
        let err = parse_embeddings_response(&json, 2).unwrap_err().to_string();
        assert!(err.contains("expected 2"), "{err}");
    }

    #[test]
    fn chat_content_is_extracted() {
        let json = serde_json::json!({"choices": [{"message": {"role": "assistant", "content": "ok"}}]});
        assert_eq!(parse_chat_response(&json).unwrap(), "ok");
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[tokio::test]
    async fn disabled_gateway_fails_every_call() {
        let gw = DisabledGateway;
        assert!(gw.embed("x").await.is_err());
        assert!(gw.complete(&[ChatMessage::user("x")]).await.is_err());
        assert!(gw.complete_stream(&[ChatMessage::user("x")]).await.is_err());
    }
}
