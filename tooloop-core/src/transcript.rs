//! Transcript message types exchanged with the model sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityResult;

pub type MessageId = uuid::Uuid;

/// Role of a message in the transcript.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Capability,
}

/// A capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityCall {
    pub id: String,
    pub name: String,
    /// Raw argument text as produced by the model. Not guaranteed to be valid JSON.
    pub input: String,
}

impl CapabilityCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input: input.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Calls { calls: Vec<CapabilityCall> },
    Result {
        call_id: String,
        capability: String,
        output: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: MessageRole,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    pub token_estimate: u32,
}

impl ChatMessage {
    fn build(role: MessageRole, content: MessageContent, token_estimate: u32) -> Self {
        Self {
            id: MessageId::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
            token_estimate,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self::build(MessageRole::System, MessageContent::Text { text }, estimate)
    }

    pub fn user(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self::build(MessageRole::User, MessageContent::Text { text }, estimate)
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let estimate = estimate_tokens(&text);
        Self::build(MessageRole::Assistant, MessageContent::Text { text }, estimate)
    }

    pub fn assistant_calls(calls: Vec<CapabilityCall>) -> Self {
        let estimate = calls
            .iter()
            .map(|call| estimate_tokens(&call.name) + estimate_tokens(&call.input))
            .sum();
        Self::build(MessageRole::Assistant, MessageContent::Calls { calls }, estimate)
    }

    pub fn capability_result(call: &CapabilityCall, result: &CapabilityResult) -> Self {
        let output = result.model_text();
        let estimate = estimate_tokens(&output);
        Self::build(
            MessageRole::Capability,
            MessageContent::Result {
                call_id: call.id.clone(),
                capability: call.name.clone(),
                output,
                is_error: result.is_error(),
            },
            estimate,
        )
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Simple token estimate: ~4 chars per token.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 / 4).max(1)
}

pub fn transcript_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(|m| m.token_estimate).sum()
}
