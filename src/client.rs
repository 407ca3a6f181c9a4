//! Answer service client.
//!
//! Defines the [`AnswerService`] seam the fetch loop calls through, and
//! [`SseAnswerClient`], which talks to a streaming chat endpoint that
//! answers with server-sent events.
//!
//! # Stream Shape
//!
//! The endpoint emits frames such as:
//!
//! ```text
//! event: reply
//! data: {"payload": {"content": "...", "is_final": false, "is_from_self": false}}
//!
//! event: reference
//! data: {"payload": {"references": [{"id": "1", "url": "https://..."}]}}
//! ```
//!
//! Only the final non-self `reply` and the last `reference` frame matter;
//! intermediate frames are partial renders of the same answer.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::error::TimelineError;

/// Final answer of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnswerReply {
    /// Raw reference payload, interpreted by [`crate::fetch::references_from_payload`].
    pub references: Value,
    /// Final answer text.
    pub text: String,
}

/// A natural-language answer service.
///
/// Implementations must be safe to call concurrently; the orchestrator
/// shares one instance across all in-flight units.
#[async_trait]
pub trait AnswerService: Send + Sync {
    async fn query(&self, text: &str) -> Result<AnswerReply, TimelineError>;
}

/// Fresh session identifier for one query.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Fresh 48-character hex request identifier.
pub fn new_request_id() -> String {
    let mut bytes = Uuid::new_v4().as_bytes().to_vec();
    bytes.extend_from_slice(&Uuid::new_v4().as_bytes()[..8]);
    hex::encode(bytes)
}

/// [`AnswerService`] over an SSE chat endpoint.
pub struct SseAnswerClient {
    http: reqwest::Client,
    config: ServiceConfig,
    app_key: String,
}

impl SseAnswerClient {
    /// Build a client, reading the app key from `config.app_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable is unset or empty.
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let app_key = match std::env::var(&config.app_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.app_key_env),
        };
        Self::with_key(config, app_key)
    }

    pub fn with_key(config: &ServiceConfig, app_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config: config.clone(),
            app_key: app_key.into(),
        })
    }

    fn request_body(&self, text: &str) -> Value {
        serde_json::json!({
            "content": text,
            "bot_app_key": self.app_key,
            "visitor_biz_id": self.config.visitor_biz_id,
            "session_id": new_session_id(),
            "streaming_throttle": self.config.streaming_throttle,
            "search_network": if self.config.search_network { "enable" } else { "disable" },
            "model_name": self.config.model_name,
            "workflow_status": "disable",
        })
    }
}

#[async_trait]
impl AnswerService for SseAnswerClient {
    async fn query(&self, text: &str) -> Result<AnswerReply, TimelineError> {
        let request_id = new_request_id();
        tracing::debug!(request_id = %request_id, query = text, "sending query");

        let response = self
            .http
            .post(&self.config.endpoint)
            .header("Accept", "text/event-stream")
            .header("X-Request-Id", &request_id)
            .json(&self.request_body(text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TimelineError::Transport(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        // Blocks until the server closes the stream.
        let body = response.text().await?;
        parse_event_stream(&body)
    }
}

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Split an event-stream body into frames.
///
/// Comment lines and `id:`/`retry:` fields are ignored. A frame without an
/// `event:` field is named `message`; a frame without data is dropped.
pub fn split_frames(body: &str) -> Vec<SseFrame> {
    let normalized = body.replace("\r\n", "\n");
    let mut frames = Vec::new();

    for block in normalized.split("\n\n") {
        let mut event = String::from("message");
        let mut data: Vec<&str> = Vec::new();
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                data.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
        if !data.is_empty() {
            frames.push(SseFrame {
                event,
                data: data.join("\n"),
            });
        }
    }
    frames
}

/// Reduce a complete event stream to its final reply and references.
pub fn parse_event_stream(body: &str) -> Result<AnswerReply, TimelineError> {
    let mut reply = AnswerReply::default();

    for frame in split_frames(body) {
        match frame.event.as_str() {
            "reply" => {
                let data = decode_frame(&frame)?;
                let payload = &data["payload"];
                if payload["is_from_self"].as_bool().unwrap_or(false) {
                    continue;
                }
                if payload["is_final"].as_bool().unwrap_or(false) {
                    reply.text = payload["content"].as_str().unwrap_or_default().to_string();
                }
            }
            "reference" => {
                reply.references = decode_frame(&frame)?;
            }
            "error" => {
                let message = serde_json::from_str::<Value>(&frame.data)
                    .ok()
                    .and_then(|v| {
                        v.pointer("/error/message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .unwrap_or(frame.data);
                return Err(TimelineError::Transport(format!(
                    "service error: {}",
                    message
                )));
            }
            _ => {}
        }
    }

    if reply.text.trim().is_empty() {
        return Err(TimelineError::Transport(
            "stream ended without a final reply".to_string(),
        ));
    }
    Ok(reply)
}

fn decode_frame(frame: &SseFrame) -> Result<Value, TimelineError> {
    serde_json::from_str(&frame.data).map_err(|e| {
        TimelineError::Transport(format!("undecodable '{}' frame: {}", frame.event, e))
    })
}
