//! Replan signal: aborts a loop run and stages a mutation of external shared state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::{CallContext, Capability, CapabilityRef, CapabilityResult};
use crate::disclosure::DisclosureNode;
use crate::error::CapabilityError;

/// Key-value surface the caller owns across loop runs.
pub trait Blackboard: Send {
    fn get(&self, key: &str) -> Option<&serde_json::Value>;

    fn set(&mut self, key: &str, value: serde_json::Value);

    fn remove(&mut self, key: &str) -> Option<serde_json::Value>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBlackboard {
    entries: HashMap<String, serde_json::Value>,
}

impl InMemoryBlackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Blackboard for InMemoryBlackboard {
    fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    fn set(&mut self, key: &str, value: serde_json::Value) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }
}

type StateMutator = Box<dyn FnOnce(&mut dyn Blackboard) + Send>;

/// Request to abandon the current run and re-plan.
///
/// The mutator runs at most once, when the caller applies the request.
pub struct ReplanRequest {
    reason: String,
    mutator: Option<StateMutator>,
}

impl ReplanRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            mutator: None,
        }
    }

    pub fn with_mutator<F>(mut self, mutator: F) -> Self
    where
        F: FnOnce(&mut dyn Blackboard) + Send + 'static,
    {
        self.mutator = Some(Box::new(mutator));
        self
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn has_mutator(&self) -> bool {
        self.mutator.is_some()
    }

    /// Apply the staged mutation. Returns the reason for logging by the caller.
    pub fn apply(self, blackboard: &mut dyn Blackboard) -> String {
        if let Some(mutator) = self.mutator {
            mutator(blackboard);
        }
        self.reason
    }
}

impl fmt::Debug for ReplanRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplanRequest")
            .field("reason", &self.reason)
            .field("has_mutator", &self.mutator.is_some())
            .finish()
    }
}

/// Decides from a call's result whether the run should re-plan.
pub trait ReplanDecider: Send + Sync {
    fn decide(&self, input: &str, result: &CapabilityResult) -> Option<ReplanRequest>;
}

impl<F> ReplanDecider for F
where
    F: Fn(&str, &CapabilityResult) -> Option<ReplanRequest> + Send + Sync,
{
    fn decide(&self, input: &str, result: &CapabilityResult) -> Option<ReplanRequest> {
        self(input, result)
    }
}

/// Wraps a capability and raises a replan when the decider yields a decision.
pub struct ReplanOnDecision {
    inner: CapabilityRef,
    decider: Arc<dyn ReplanDecider>,
}

impl ReplanOnDecision {
    pub fn new(inner: CapabilityRef, decider: impl ReplanDecider + 'static) -> Self {
        Self {
            inner,
            decider: Arc::new(decider),
        }
    }
}

#[async_trait]
impl Capability for ReplanOnDecision {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn input_schema(&self) -> serde_json::Value {
        self.inner.input_schema()
    }

    async fn call(
        &self,
        input: &str,
        ctx: &CallContext,
    ) -> Result<CapabilityResult, CapabilityError> {
        // A replan raised by the inner capability passes straight through.
        let result = self.inner.call(input, ctx).await?;
        match self.decider.decide(input, &result) {
            Some(request) => {
                tracing::info!(
                    capability = %self.inner.name(),
                    call_id = %ctx.call_id,
                    reason = %request.reason(),
                    "replan decided from capability result"
                );
                Err(CapabilityError::Replan(request))
            }
            None => Ok(result),
        }
    }

    fn as_disclosure(&self) -> Option<&DisclosureNode> {
        self.inner.as_disclosure()
    }
}
