use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::disclosure::DisclosureNode;
use crate::error::CapabilityError;

pub type RunId = uuid::Uuid;

/// Shared handle to a capability. Capabilities outlive individual runs.
pub type CapabilityRef = Arc<dyn Capability>;

/// A named, invocable unit offered to the model.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Opaque JSON schema of the input. Forwarded to the model, never inspected by the loop.
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    /// Invoke with the raw input text produced by the model.
    ///
    /// `Err(CapabilityError::Replan(..))` aborts the loop; any other error is shown
    /// to the model as an `Error` result.
    async fn call(
        &self,
        input: &str,
        ctx: &CallContext,
    ) -> Result<CapabilityResult, CapabilityError>;

    /// Downcast hook used by the disclosure policy.
    fn as_disclosure(&self) -> Option<&DisclosureNode> {
        None
    }
}

impl fmt::Debug for dyn Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// What the model is told about a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl CapabilityDescriptor {
    pub fn of(capability: &dyn Capability) -> Self {
        Self {
            name: capability.name().to_string(),
            description: capability.description().to_string(),
            input_schema: capability.input_schema(),
        }
    }
}

/// Explicit per-call context. Passed to every invocation instead of any ambient binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub run_id: RunId,
    pub iteration: u32,
    pub call_id: String,
}

impl CallContext {
    pub fn new(run_id: RunId, iteration: u32, call_id: impl Into<String>) -> Self {
        Self {
            run_id,
            iteration,
            call_id: call_id.into(),
        }
    }

    /// Context for calls made outside a loop run (tests, previews).
    pub fn detached(call_id: impl Into<String>) -> Self {
        Self::new(RunId::nil(), 0, call_id)
    }
}

/// Outcome of a capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapabilityResult {
    Text {
        content: String,
    },
    WithArtifact {
        content: String,
        artifact: Artifact,
    },
    Error {
        message: String,
        cause: Option<String>,
    },
}

impl CapabilityResult {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn with_artifact(content: impl Into<String>, artifact: Artifact) -> Self {
        Self::WithArtifact {
            content: content.into(),
            artifact,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cause: None,
        }
    }

    pub fn error_with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::WithArtifact { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    /// Text the model sees in the transcript.
    pub fn model_text(&self) -> String {
        match self {
            Self::Text { content } | Self::WithArtifact { content, .. } => content.clone(),
            Self::Error {
                message,
                cause: Some(cause),
            } => format!("Error: {message} (cause: {cause})"),
            Self::Error {
                message,
                cause: None,
            } => format!("Error: {message}"),
        }
    }
}

/// Structured payload attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    pub content: serde_json::Value,
    pub mime_type: Option<String>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            kind,
            name: name.into(),
            content,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Text,
    Code,
    File,
    Url,
    Data,
}

/// Best-effort parse of model-supplied input. Empty or malformed text becomes `{}`.
pub fn parse_input(input: &str) -> serde_json::Value {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "capability input is not valid JSON; using empty object");
        serde_json::Value::Object(serde_json::Map::new())
    })
}

/// Typed parse of model-supplied input.
pub fn parse_typed_input<T: DeserializeOwned>(
    capability: &str,
    input: &str,
) -> Result<T, CapabilityError> {
    serde_json::from_value(parse_input(input)).map_err(|err| CapabilityError::InvalidInput {
        capability: capability.to_string(),
        reason: err.to_string(),
    })
}

type CapabilityFuture = Pin<Box<dyn Future<Output = Result<CapabilityResult, CapabilityError>> + Send>>;
type CapabilityFn = dyn Fn(String, CallContext) -> CapabilityFuture + Send + Sync;

/// Closure-backed capability.
pub struct FnCapability {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    handler: Arc<CapabilityFn>,
}

impl FnCapability {
    /// Build from an async handler receiving the raw input and the call context.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(String, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<CapabilityResult, CapabilityError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            handler: Arc::new(move |input: String, ctx: CallContext| -> CapabilityFuture {
                Box::pin(handler(input, ctx))
            }),
        }
    }

    /// Build from a synchronous handler.
    pub fn sync<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str) -> Result<CapabilityResult, CapabilityError> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self::new(name, description, move |input, _ctx| {
            let handler = Arc::clone(&handler);
            async move { handler(&input) }
        })
    }

    /// Capability that always answers with the same text.
    pub fn constant(
        name: impl Into<String>,
        description: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        let response = response.into();
        Self::sync(name, description, move |_| Ok(CapabilityResult::text(response.clone())))
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn into_ref(self) -> CapabilityRef {
        Arc::new(self)
    }
}

#[async_trait]
impl Capability for FnCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    async fn call(
        &self,
        input: &str,
        ctx: &CallContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        (self.handler)(input.to_string(), ctx.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_input_tolerates_malformed_json() {
        assert_eq!(parse_input(""), serde_json::json!({}));
        assert_eq!(parse_input("{not json"), serde_json::json!({}));
        assert_eq!(
            parse_input(r#"{"sql": "SELECT 1"}"#),
            serde_json::json!({"sql": "SELECT 1"})
        );
    }

    #[test]
    fn typed_input_failure_names_the_capability() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct QueryInput {
            sql: String,
        }

        let err = parse_typed_input::<QueryInput>("query", "{}").expect_err("sql is required");
        assert!(err.to_string().contains("query"), "unexpected error: {err}");
    }

    #[test]
    fn error_model_text_includes_cause() {
        let result = CapabilityResult::error_with_cause("lookup failed", "connection reset");
        assert_eq!(
            result.model_text(),
            "Error: lookup failed (cause: connection reset)"
        );
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn fn_capability_passes_raw_input_through() {
        let echo = FnCapability::sync("echo", "Echo the input", |input| {
            Ok(CapabilityResult::text(format!("echo:{input}")))
        });

        let result = echo
            .call("hello", &CallContext::detached("call-1"))
            .await
            .expect("echo succeeds");
        assert_eq!(result, CapabilityResult::text("echo:hello"));
        assert!(echo.as_disclosure().is_none());
    }

    #[test]
    fn result_serializes_with_kind_tag() {
        let result = CapabilityResult::with_artifact(
            "3 rows",
            Artifact::new(ArtifactKind::Data, "rows", serde_json::json!([1, 2, 3])),
        );
        let encoded = serde_json::to_value(&result).expect("serialize");
        assert_eq!(encoded["kind"], "with_artifact");
        assert_eq!(encoded["artifact"]["kind"], "data");
    }
}
