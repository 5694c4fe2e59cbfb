use std::fmt;

use crate::capability::{CapabilityRef, CapabilityResult};
use crate::transcript::CapabilityCall;

/// Immutable record of one capability invocation within a run.
#[derive(Clone)]
pub struct TurnRecord {
    pub call_id: String,
    pub capability_name: String,
    pub raw_input: String,
    pub raw_output: String,
    pub result: CapabilityResult,
    /// JSON view of the output, when it has one.
    pub decoded: Option<serde_json::Value>,
    /// The capability that handled the call; `None` when the name was rejected.
    pub capability: Option<CapabilityRef>,
    pub iteration: u32,
}

impl TurnRecord {
    pub fn new(
        call: &CapabilityCall,
        capability: Option<CapabilityRef>,
        result: CapabilityResult,
        iteration: u32,
    ) -> Self {
        let raw_output = result.model_text();
        let decoded = decode_output(&result);
        Self {
            call_id: call.id.clone(),
            capability_name: call.name.clone(),
            raw_input: call.input.clone(),
            raw_output,
            result,
            decoded,
            capability,
            iteration,
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.is_error()
    }
}

impl fmt::Debug for TurnRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnRecord")
            .field("call_id", &self.call_id)
            .field("capability_name", &self.capability_name)
            .field("raw_input", &self.raw_input)
            .field("raw_output", &self.raw_output)
            .field("iteration", &self.iteration)
            .field("resolved", &self.capability.is_some())
            .finish()
    }
}

fn decode_output(result: &CapabilityResult) -> Option<serde_json::Value> {
    match result {
        CapabilityResult::WithArtifact { artifact, .. } => Some(artifact.content.clone()),
        CapabilityResult::Text { content } => serde_json::from_str(content).ok(),
        CapabilityResult::Error { .. } => None,
    }
}
