//! In-memory doubles for the bridge's external seams, shared by unit
//! and scenario tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::{Agent, AgentError, QueryOptions};
use crate::arbiter::ToolDecision;
use crate::mqtt::{PublishError, Publisher};
use crate::response::ResponseSink;

/// One captured publish.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Value,
    pub retain: bool,
}

/// [`Publisher`] that records instead of talking to a broker.
#[derive(Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<PublishedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Decoded payloads published to `topic`, in order.
    pub fn on_topic(&self, topic: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload)
            .collect()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), PublishError> {
        let payload = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(PublishedMessage {
                topic: topic.to_string(),
                payload,
                retain,
            });
        }
        Ok(())
    }
}

/// Scripted [`Agent`]: optionally requests one tool approval, then
/// emits a fixed list of events. Decisions handed back by the gate are
/// recorded for assertions.
#[derive(Default)]
pub struct ScriptedAgent {
    pub events: Vec<Value>,
    pub tool_call: Option<(String, Value)>,
    /// When set, the run fails with this message after emitting events.
    pub fail_with: Option<String>,
    decisions: Mutex<Vec<ToolDecision>>,
}

impl ScriptedAgent {
    pub fn emitting(events: Vec<Value>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn with_tool_call(mut self, tool_name: &str, input: Value) -> Self {
        self.tool_call = Some((tool_name.to_string(), input));
        self
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn decisions(&self) -> Vec<ToolDecision> {
        self.decisions.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn query(
        &self,
        _message: &str,
        options: QueryOptions,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), AgentError> {
        if let Some((tool_name, input)) = &self.tool_call {
            let decision = (options.can_use_tool)(tool_name.clone(), input.clone()).await;
            if let Ok(mut decisions) = self.decisions.lock() {
                decisions.push(decision);
            }
        }
        for event in &self.events {
            sink.send(event.clone()).await;
        }
        match &self.fail_with {
            Some(message) => Err(AgentError::Stream(message.clone())),
            None => Ok(()),
        }
    }
}
