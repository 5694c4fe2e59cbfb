use std::collections::HashSet;

use tooloop_core::capability::{Artifact, CapabilityDescriptor, CapabilityRef};
use tooloop_core::error::LoopError;
use tooloop_core::transcript::{CapabilityCall, ChatMessage, MessageContent};
use tooloop_core::turn::TurnRecord;

use crate::policy::InjectionResult;

/// Capabilities visible to the model. Names are unique.
#[derive(Clone, Default)]
pub(crate) struct ActiveSet {
    items: Vec<CapabilityRef>,
}

/// What an [`ActiveSet::apply`] call actually changed.
#[derive(Default)]
pub(crate) struct AppliedChange {
    pub added: Vec<CapabilityRef>,
    pub removed: Vec<CapabilityRef>,
}

impl ActiveSet {
    pub fn new(capabilities: Vec<CapabilityRef>) -> Result<Self, LoopError> {
        let mut set = Self::default();
        for capability in capabilities {
            if set.contains(capability.name()) {
                return Err(LoopError::DuplicateCapability {
                    name: capability.name().to_string(),
                });
            }
            set.items.push(capability);
        }
        Ok(set)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.iter().any(|c| c.name() == name)
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityRef> {
        self.items.iter().find(|c| c.name() == name)
    }

    pub fn as_slice(&self) -> &[CapabilityRef] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.items.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.items
            .iter()
            .map(|c| CapabilityDescriptor::of(c.as_ref()))
            .collect()
    }

    /// Apply a merged change in one step: removals first, then additions.
    ///
    /// An addition whose name is still active after the removals is skipped.
    pub(crate) fn apply(&mut self, change: &InjectionResult) -> AppliedChange {
        let mut applied = AppliedChange::default();
        for capability in &change.to_remove {
            if let Some(pos) = self.items.iter().position(|c| c.name() == capability.name()) {
                applied.removed.push(self.items.remove(pos));
            }
        }
        for capability in &change.to_add {
            if self.contains(capability.name()) {
                tracing::debug!(
                    capability = %capability.name(),
                    "capability already active; addition skipped"
                );
                continue;
            }
            self.items.push(capability.clone());
            applied.added.push(capability.clone());
        }
        applied
    }
}

/// Mutable state of one `execute` call. Dropped when the call returns.
pub(crate) struct LoopState {
    pub transcript: Vec<ChatMessage>,
    pub active: ActiveSet,
    pub iteration: u32,
    pub injected: Vec<CapabilityRef>,
    pub removed: Vec<CapabilityRef>,
    pub turns: Vec<TurnRecord>,
    artifacts: Vec<Artifact>,
}

impl LoopState {
    pub fn new(
        transcript: Vec<ChatMessage>,
        capabilities: Vec<CapabilityRef>,
    ) -> Result<Self, LoopError> {
        Ok(Self {
            transcript,
            active: ActiveSet::new(capabilities)?,
            iteration: 0,
            injected: Vec::new(),
            removed: Vec::new(),
            turns: Vec::new(),
            artifacts: Vec::new(),
        })
    }

    /// Append a finished call: its result message, its record, and any artifact.
    pub fn record_turn(&mut self, record: TurnRecord, message: ChatMessage) {
        if let Some(artifact) = record.result.artifact() {
            self.artifacts.push(artifact.clone());
        }
        self.transcript.push(message);
        self.turns.push(record);
    }

    /// Trim the assistant call message at `index` to the calls answered after it.
    /// A message left with no calls is dropped.
    pub fn settle_calls(&mut self, index: usize) {
        let answered: HashSet<&str> = self
            .transcript
            .iter()
            .skip(index + 1)
            .filter_map(|message| match &message.content {
                MessageContent::Result { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        let Some(MessageContent::Calls { calls }) = self.transcript.get(index).map(|m| &m.content)
        else {
            return;
        };
        let kept: Vec<CapabilityCall> = calls
            .iter()
            .filter(|call| answered.contains(call.id.as_str()))
            .cloned()
            .collect();
        if kept.len() == calls.len() {
            return;
        }

        if kept.is_empty() {
            self.transcript.remove(index);
        } else {
            self.transcript[index] = ChatMessage::assistant_calls(kept);
        }
    }

    pub fn apply(&mut self, change: &InjectionResult) -> AppliedChange {
        let applied = self.active.apply(change);
        self.injected.extend(applied.added.iter().cloned());
        self.removed.extend(applied.removed.iter().cloned());
        applied
    }

    pub fn into_parts(self) -> LoopStateParts {
        LoopStateParts {
            transcript: self.transcript,
            iteration: self.iteration,
            injected: self.injected,
            removed: self.removed,
            turns: self.turns,
            artifacts: self.artifacts,
        }
    }
}

pub(crate) struct LoopStateParts {
    pub transcript: Vec<ChatMessage>,
    pub iteration: u32,
    pub injected: Vec<CapabilityRef>,
    pub removed: Vec<CapabilityRef>,
    pub turns: Vec<TurnRecord>,
    pub artifacts: Vec<Artifact>,
}
