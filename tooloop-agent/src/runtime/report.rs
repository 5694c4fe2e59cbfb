use serde::Serialize;

use tooloop_core::capability::RunId;

/// Event emitted by the engine while a run is in flight.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopReport {
    CapabilityFailed {
        run_id: RunId,
        iteration: u32,
        call_id: String,
        capability: String,
        error: String,
    },
    CapabilitiesChanged {
        run_id: RunId,
        iteration: u32,
        added: Vec<String>,
        removed: Vec<String>,
    },
    Progress {
        run_id: RunId,
        iteration: u32,
        description: String,
    },
    Completed {
        run_id: RunId,
        iterations: u32,
        artifacts: usize,
    },
    Exhausted {
        run_id: RunId,
        iterations: u32,
    },
    ReplanRequested {
        run_id: RunId,
        iteration: u32,
        reason: String,
    },
}

impl LoopReport {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::CapabilityFailed { run_id, .. }
            | Self::CapabilitiesChanged { run_id, .. }
            | Self::Progress { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Exhausted { run_id, .. }
            | Self::ReplanRequested { run_id, .. } => *run_id,
        }
    }
}
