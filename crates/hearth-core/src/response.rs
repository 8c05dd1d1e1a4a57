use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use hearth_protocol::{ResponseEvent, ResponsePayload};

use crate::mqtt::Publisher;

/// Sink for agent output. The agent side of the bridge only sees this
/// trait, so tests can record events instead of publishing them.
#[async_trait]
pub trait ResponseSink: Send {
    async fn send(&mut self, event: Value);
    async fn end(&mut self);
    /// Attach a new session id to subsequent events. Defined for
    /// forward compatibility; the bridge itself never calls it.
    fn set_session_id(&mut self, session_id: String);
}

/// Converts raw agent events into response-topic messages, either as
/// they arrive (streaming) or collected into the terminal `complete`
/// (batched).
pub struct ResponseWriter {
    publisher: Arc<dyn Publisher>,
    topic: String,
    session_id: String,
    source_device: String,
    streaming: bool,
    started: Instant,
    buffer: Vec<Value>,
    finished: bool,
}

impl ResponseWriter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        topic: &str,
        session_id: &str,
        source_device: &str,
        streaming: bool,
    ) -> Self {
        Self {
            publisher,
            topic: topic.to_string(),
            session_id: session_id.to_string(),
            source_device: source_device.to_string(),
            streaming,
            started: Instant::now(),
            buffer: Vec::new(),
            finished: false,
        }
    }

    async fn publish(&self, payload: ResponsePayload) {
        let event = ResponseEvent::new(payload, &self.session_id, &self.source_device);
        publish_event(&*self.publisher, &self.topic, &event).await;
    }
}

#[async_trait]
impl ResponseSink for ResponseWriter {
    async fn send(&mut self, event: Value) {
        let event = normalize_event(event);
        if !self.streaming {
            self.buffer.push(event);
            return;
        }
        // Voice consumers get the short answer before the full chunk.
        if let Some(text) = final_result_text(&event) {
            self.publish(ResponsePayload::Answer { text }).await;
        }
        self.publish(ResponsePayload::Chunk { content: event }).await;
    }

    async fn end(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let content = if self.streaming {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        };
        self.publish(ResponsePayload::Complete {
            content,
            duration_ms,
        })
        .await;
    }

    fn set_session_id(&mut self, session_id: String) {
        self.session_id = session_id;
    }
}

/// Publish one response event; failures are logged and never retried.
pub(crate) async fn publish_event(publisher: &dyn Publisher, topic: &str, event: &ResponseEvent) {
    match hearth_protocol::encode(event) {
        Ok(payload) => {
            if let Err(e) = publisher.publish(topic, payload, false).await {
                tracing::warn!(topic, error = %e, "response publish failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "response encode failed"),
    }
}

/// Agents may hand us an already-serialized record; unwrap it so
/// downstream consumers always see an object.
fn normalize_event(event: Value) -> Value {
    match event {
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text),
        },
        other => other,
    }
}

/// Extract the final answer text from a result event
/// (`data.type == "result"` with non-empty `data.result`).
fn final_result_text(event: &Value) -> Option<String> {
    let data = event.get("data")?;
    if data.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }
    let result = data.get("result").and_then(Value::as_str)?;
    if result.trim().is_empty() {
        return None;
    }
    Some(result.to_string())
}
