use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tooloop_core::capability::CapabilityDescriptor;
use tooloop_core::error::ModelError;
use tooloop_core::transcript::{CapabilityCall, ChatMessage};

/// One model round-trip's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelResponse {
    /// Final text from the assistant (if any).
    #[serde(default)]
    pub text: Option<String>,
    /// Capability calls requested by the assistant (if any).
    #[serde(default)]
    pub calls: Vec<CapabilityCall>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            calls: Vec::new(),
        }
    }

    pub fn calls(calls: Vec<CapabilityCall>) -> Self {
        Self { text: None, calls }
    }

    /// Single call with a generated id.
    pub fn call(name: impl Into<String>, input: impl Into<String>) -> Self {
        let name = name.into();
        Self::calls(vec![CapabilityCall::new(format!("call-{name}"), name, input)])
    }

    pub fn has_calls(&self) -> bool {
        !self.calls.is_empty()
    }
}

/// Abstraction over the model provider. The loop treats `send` as one blocking round-trip;
/// the wire protocol lives behind it.
#[async_trait]
pub trait ModelSender: Send + Sync {
    async fn send(
        &self,
        transcript: &[ChatMessage],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ModelResponse, ModelError>;
}

/// What a [`ScriptedModel`] was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub transcript_len: usize,
    pub capability_names: Vec<String>,
}

/// A model sender that replays canned responses and records every request.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    fallback: Option<ModelResponse>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Response returned once the script runs out.
    pub fn with_fallback(mut self, response: ModelResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ModelSender for ScriptedModel {
    async fn send(
        &self,
        transcript: &[ChatMessage],
        capabilities: &[CapabilityDescriptor],
    ) -> Result<ModelResponse, ModelError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedRequest {
                transcript_len: transcript.len(),
                capability_names: capabilities.iter().map(|c| c.name.clone()).collect(),
            });

        let next = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(response) => Ok(response),
            None => Err(ModelError::InvalidResponse {
                reason: "scripted model has no more responses".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_model_replays_then_falls_back() {
        let model = ScriptedModel::new(vec![ModelResponse::call("search", "{}")])
            .with_fallback(ModelResponse::text("done"));
        let caps = vec![CapabilityDescriptor {
            name: "search".into(),
            description: "Search".into(),
            input_schema: serde_json::json!({}),
        }];

        let first = model.send(&[], &caps).await.expect("scripted response");
        assert!(first.has_calls());
        assert_eq!(first.calls[0].id, "call-search");

        let second = model.send(&[ChatMessage::user("hi")], &[]).await.expect("fallback");
        assert_eq!(second, ModelResponse::text("done"));

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].capability_names, vec!["search"]);
        assert_eq!(requests[1].transcript_len, 1);
    }

    #[tokio::test]
    async fn scripted_model_without_fallback_errors_when_exhausted() {
        let model = ScriptedModel::new(Vec::new());
        let err = model.send(&[], &[]).await.expect_err("script is empty");
        assert!(err.to_string().contains("no more responses"));
    }

    #[test]
    fn response_deserializes_from_script_json() {
        let response: ModelResponse = serde_json::from_str(
            r#"{"calls": [{"id": "c1", "name": "query", "input": "{\"sql\":\"SELECT 1\"}"}]}"#,
        )
        .expect("script entry parses");
        assert!(response.text.is_none());
        assert_eq!(response.calls[0].name, "query");
    }
}
