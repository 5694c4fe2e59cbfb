//! Sequential and parallel execution of the calls from one model turn.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, error::Elapsed};

use tooloop_core::capability::{CallContext, CapabilityRef, CapabilityResult, RunId};
use tooloop_core::config::ParallelConfig;
use tooloop_core::transcript::CapabilityCall;

use super::dispatch::{CallOutcome, invoke, rejected_call};
use super::state::ActiveSet;

/// One executed call, in the order the model issued it.
#[derive(Debug)]
pub(crate) struct CallExecution {
    pub call: CapabilityCall,
    pub capability: Option<CapabilityRef>,
    pub outcome: CallOutcome,
}

impl CallExecution {
    fn rejected(call: &CapabilityCall, active: &ActiveSet) -> Self {
        tracing::warn!(
            capability = %call.name,
            call_id = %call.id,
            "model called a capability outside the active set"
        );
        Self {
            call: call.clone(),
            capability: None,
            outcome: CallOutcome::Done(rejected_call(call, &active.names())),
        }
    }
}

/// Execute calls one after another. Stops at the first replan.
pub(crate) async fn execute_sequential(
    active: &ActiveSet,
    calls: &[CapabilityCall],
    run_id: RunId,
    iteration: u32,
) -> Vec<CallExecution> {
    let mut executions = Vec::with_capacity(calls.len());
    for call in calls {
        let Some(capability) = active.get(&call.name) else {
            executions.push(CallExecution::rejected(call, active));
            continue;
        };

        tracing::debug!(
            %run_id,
            iteration,
            capability = %call.name,
            call_id = %call.id,
            "invoking capability"
        );
        let ctx = CallContext::new(run_id, iteration, call.id.clone());
        let outcome = invoke(capability, call, &ctx).await;
        let stop = matches!(outcome, CallOutcome::Replan(_));
        executions.push(CallExecution {
            call: call.clone(),
            capability: Some(capability.clone()),
            outcome,
        });
        if stop {
            break;
        }
    }
    executions
}

/// Fork-join executor for the calls of one model turn.
///
/// Every call runs on its own task under the per-call timeout. Calls still
/// running when the batch deadline passes are aborted and reported as timeouts.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParallelBatchExecutor {
    per_call_timeout: Duration,
    batch_timeout: Duration,
}

enum Pending {
    Resolved(CallExecution),
    Spawned {
        call: CapabilityCall,
        capability: CapabilityRef,
        handle: JoinHandle<Result<CallOutcome, Elapsed>>,
    },
}

impl ParallelBatchExecutor {
    pub fn from_config(config: &ParallelConfig) -> Self {
        Self {
            per_call_timeout: config.per_call_timeout(),
            batch_timeout: config.batch_timeout(),
        }
    }

    pub async fn execute(
        &self,
        active: &ActiveSet,
        calls: &[CapabilityCall],
        run_id: RunId,
        iteration: u32,
    ) -> Vec<CallExecution> {
        let deadline = Instant::now() + self.batch_timeout;
        tracing::debug!(
            %run_id,
            iteration,
            num_calls = calls.len(),
            "executing capability calls in parallel"
        );

        let pending: Vec<Pending> = calls
            .iter()
            .map(|call| match active.get(&call.name) {
                None => Pending::Resolved(CallExecution::rejected(call, active)),
                Some(capability) => {
                    let per_call_timeout = self.per_call_timeout;
                    let task_capability = capability.clone();
                    let task_call = call.clone();
                    let ctx = CallContext::new(run_id, iteration, call.id.clone());
                    let handle = tokio::spawn(async move {
                        tokio::time::timeout(
                            per_call_timeout,
                            invoke(&task_capability, &task_call, &ctx),
                        )
                        .await
                    });
                    Pending::Spawned {
                        call: call.clone(),
                        capability: capability.clone(),
                        handle,
                    }
                }
            })
            .collect();

        let mut executions = Vec::with_capacity(pending.len());
        for entry in pending {
            let (call, capability, mut handle) = match entry {
                Pending::Resolved(execution) => {
                    executions.push(execution);
                    continue;
                }
                Pending::Spawned {
                    call,
                    capability,
                    handle,
                } => (call, capability, handle),
            };

            let outcome = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(outcome))) => outcome,
                Ok(Ok(Err(_))) => {
                    tracing::warn!(
                        %run_id,
                        iteration,
                        capability = %call.name,
                        call_id = %call.id,
                        timeout_ms = self.per_call_timeout.as_millis() as u64,
                        "capability call timed out"
                    );
                    CallOutcome::Done(CapabilityResult::error(format!(
                        "Capability '{}' timed out after {}ms",
                        call.name,
                        self.per_call_timeout.as_millis()
                    )))
                }
                Ok(Err(join_err)) => {
                    tracing::error!(
                        %run_id,
                        capability = %call.name,
                        call_id = %call.id,
                        error = %join_err,
                        "capability task failed"
                    );
                    CallOutcome::Done(CapabilityResult::error_with_cause(
                        format!("Capability '{}' task failed", call.name),
                        join_err.to_string(),
                    ))
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        %run_id,
                        iteration,
                        capability = %call.name,
                        call_id = %call.id,
                        timeout_ms = self.batch_timeout.as_millis() as u64,
                        "batch deadline passed; capability call aborted"
                    );
                    CallOutcome::Done(CapabilityResult::error(format!(
                        "Capability '{}' timed out: batch deadline of {}ms passed",
                        call.name,
                        self.batch_timeout.as_millis()
                    )))
                }
            };

            executions.push(CallExecution {
                call,
                capability: Some(capability),
                outcome,
            });
        }
        executions
    }
}
