//! `LoopEngine`: model round-trips and capability execution until a final answer,
//! a replan, or an exhausted iteration budget.

mod dispatch;
mod execution;
mod report;
mod state;

use std::sync::Arc;

use tooloop_core::capability::{Artifact, CapabilityRef, CapabilityResult, RunId};
use tooloop_core::config::LoopConfig;
use tooloop_core::error::LoopError;
use tooloop_core::replan::ReplanRequest;
use tooloop_core::transcript::ChatMessage;
use tooloop_core::turn::TurnRecord;

use crate::decoder::OutputDecoder;
use crate::model::ModelSender;
use crate::policy::{DisclosurePolicy, InjectionContext, InjectionPolicy, InjectionResult};

use dispatch::CallOutcome;
use execution::{ParallelBatchExecutor, execute_sequential};
use state::{LoopState, LoopStateParts};

pub use report::LoopReport;

const PROGRESS_INTERVAL: u32 = 5;

/// How a run ended. The three endings are siblings; none is an error.
#[derive(Debug)]
pub enum LoopOutcome<T> {
    /// The model produced a final answer, decoded by the caller's decoder.
    Final(T),
    /// A capability asked for a new planning cycle.
    Replan(ReplanRequest),
    /// The iteration budget ran out before a final answer.
    Exhausted { iterations: u32 },
}

impl<T> LoopOutcome<T> {
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }

    pub fn final_value(&self) -> Option<&T> {
        match self {
            Self::Final(value) => Some(value),
            _ => None,
        }
    }
}

/// Everything a run leaves behind.
#[derive(Debug)]
pub struct LoopOutput<T> {
    pub run_id: RunId,
    pub outcome: LoopOutcome<T>,
    /// Capabilities added to the active set, in application order.
    pub injected: Vec<CapabilityRef>,
    /// Capabilities removed from the active set, in application order.
    pub removed: Vec<CapabilityRef>,
    pub turns: Vec<TurnRecord>,
    pub artifacts: Vec<Artifact>,
    /// Final conversation. After a replan the last assistant message keeps only
    /// the calls that received a result.
    pub transcript: Vec<ChatMessage>,
    /// Model round-trips performed.
    pub iterations: u32,
}

impl<T> LoopOutput<T> {
    fn from_parts(run_id: RunId, outcome: LoopOutcome<T>, parts: LoopStateParts) -> Self {
        Self {
            run_id,
            outcome,
            injected: parts.injected,
            removed: parts.removed,
            turns: parts.turns,
            artifacts: parts.artifacts,
            transcript: parts.transcript,
            iterations: parts.iteration,
        }
    }

    pub fn injected_names(&self) -> Vec<&str> {
        self.injected.iter().map(|c| c.name()).collect()
    }

    pub fn removed_names(&self) -> Vec<&str> {
        self.removed.iter().map(|c| c.name()).collect()
    }
}

/// Drives one conversation through repeated model turns.
///
/// The engine holds no per-run state; every `execute` call owns its own
/// transcript and active set, so one engine can serve concurrent runs.
pub struct LoopEngine {
    model: Arc<dyn ModelSender>,
    policy: Option<Arc<dyn InjectionPolicy>>,
    config: LoopConfig,
    report_tx: Option<tokio::sync::mpsc::Sender<LoopReport>>,
}

impl LoopEngine {
    pub fn new(model: Arc<dyn ModelSender>) -> Self {
        Self {
            model,
            policy: None,
            config: LoopConfig::default(),
            report_tx: None,
        }
    }

    /// Replace the default disclosure policy.
    ///
    /// Disclosure nodes only unfold if `policy` includes a [`DisclosurePolicy`],
    /// typically through a [`crate::policy::ChainedPolicy`].
    pub fn with_policy(self, policy: impl InjectionPolicy + 'static) -> Self {
        self.with_shared_policy(Arc::new(policy))
    }

    pub fn with_shared_policy(mut self, policy: Arc<dyn InjectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reports(mut self, report_tx: tokio::sync::mpsc::Sender<LoopReport>) -> Self {
        self.report_tx = Some(report_tx);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop until the model answers, a capability asks for a replan,
    /// or `max_iterations` model round-trips have been spent.
    pub async fn execute<T>(
        &self,
        transcript: Vec<ChatMessage>,
        capabilities: Vec<CapabilityRef>,
        decoder: &dyn OutputDecoder<T>,
    ) -> Result<LoopOutput<T>, LoopError> {
        self.config.validate()?;
        let mut state = LoopState::new(transcript, capabilities)?;
        let run_id = RunId::new_v4();
        let max_iterations = self.config.max_iterations;

        let default_policy;
        let policy: &dyn InjectionPolicy = match &self.policy {
            Some(policy) => policy.as_ref(),
            None => {
                default_policy = DisclosurePolicy::from_config(&self.config.disclosure);
                &default_policy
            }
        };
        let parallel = self
            .config
            .parallel
            .enabled
            .then(|| ParallelBatchExecutor::from_config(&self.config.parallel));

        tracing::info!(
            %run_id,
            max_iterations,
            active = state.active.len(),
            policy = %policy.name(),
            parallel = parallel.is_some(),
            "loop run starting"
        );

        loop {
            if state.iteration >= max_iterations {
                let iterations = state.iteration;
                tracing::warn!(%run_id, iterations, "iteration budget exhausted");
                self.send_report(LoopReport::Exhausted { run_id, iterations })
                    .await;
                let outcome = LoopOutcome::Exhausted { iterations };
                return Ok(LoopOutput::from_parts(run_id, outcome, state.into_parts()));
            }
            state.iteration += 1;
            let iteration = state.iteration;

            tracing::debug!(
                %run_id,
                iteration,
                active = ?state.active.names(),
                "sending transcript to model"
            );
            let response = self
                .model
                .send(&state.transcript, &state.active.descriptors())
                .await?;

            if iteration % PROGRESS_INTERVAL == 0 {
                self.send_report(LoopReport::Progress {
                    run_id,
                    iteration,
                    description: format!("iteration {iteration}/{max_iterations}"),
                })
                .await;
            }

            if !response.has_calls() {
                let text = response.text.unwrap_or_default();
                let value = decoder.decode(&text)?;
                state.transcript.push(ChatMessage::assistant_text(text));

                let parts = state.into_parts();
                tracing::info!(
                    %run_id,
                    iterations = parts.iteration,
                    turns = parts.turns.len(),
                    "loop run completed"
                );
                self.send_report(LoopReport::Completed {
                    run_id,
                    iterations: parts.iteration,
                    artifacts: parts.artifacts.len(),
                })
                .await;
                return Ok(LoopOutput::from_parts(run_id, LoopOutcome::Final(value), parts));
            }

            tracing::debug!(
                %run_id,
                iteration,
                num_calls = response.calls.len(),
                "executing capability calls"
            );
            let calls_at = state.transcript.len();
            state
                .transcript
                .push(ChatMessage::assistant_calls(response.calls.clone()));

            let executions = match &parallel {
                Some(executor) => {
                    executor
                        .execute(&state.active, &response.calls, run_id, iteration)
                        .await
                }
                None => execute_sequential(&state.active, &response.calls, run_id, iteration).await,
            };

            let first_record = state.turns.len();
            let mut replan: Option<ReplanRequest> = None;
            for execution in executions {
                let result = match execution.outcome {
                    CallOutcome::Done(result) => result,
                    CallOutcome::Replan(request) => {
                        if replan.is_none() {
                            replan = Some(request);
                        } else {
                            tracing::debug!(
                                %run_id,
                                capability = %execution.call.name,
                                "additional replan in the same batch dropped"
                            );
                        }
                        continue;
                    }
                };

                if let CapabilityResult::Error { message, .. } = &result {
                    tracing::warn!(
                        %run_id,
                        iteration,
                        capability = %execution.call.name,
                        call_id = %execution.call.id,
                        error = %message,
                        "capability call failed"
                    );
                    self.send_report(LoopReport::CapabilityFailed {
                        run_id,
                        iteration,
                        call_id: execution.call.id.clone(),
                        capability: execution.call.name.clone(),
                        error: message.clone(),
                    })
                    .await;
                }

                let message = ChatMessage::capability_result(&execution.call, &result);
                let record =
                    TurnRecord::new(&execution.call, execution.capability, result, iteration);
                state.record_turn(record, message);
            }

            if let Some(request) = replan {
                tracing::info!(
                    %run_id,
                    iteration,
                    reason = %request.reason(),
                    "replan requested; loop aborted"
                );
                self.send_report(LoopReport::ReplanRequested {
                    run_id,
                    iteration,
                    reason: request.reason().to_string(),
                })
                .await;
                state.settle_calls(calls_at);
                let outcome = LoopOutcome::Replan(request);
                return Ok(LoopOutput::from_parts(run_id, outcome, state.into_parts()));
            }

            let mut change = InjectionResult::no_change();
            for record in &state.turns[first_record..] {
                let ctx = InjectionContext {
                    conversation: &state.transcript,
                    active: state.active.as_slice(),
                    last_turn: record,
                    iteration,
                };
                let result = policy.evaluate(&ctx).inspect_err(|err| {
                    tracing::error!(
                        %run_id,
                        iteration,
                        policy = %err.policy,
                        error = %err.message,
                        "injection policy failed"
                    );
                })?;
                change = change.merge(result);
            }

            if change.is_empty() {
                continue;
            }
            let applied = state.apply(&change);
            if applied.added.is_empty() && applied.removed.is_empty() {
                continue;
            }
            let added: Vec<String> = applied.added.iter().map(|c| c.name().to_string()).collect();
            let removed: Vec<String> =
                applied.removed.iter().map(|c| c.name().to_string()).collect();
            tracing::debug!(
                %run_id,
                iteration,
                added = ?added,
                removed = ?removed,
                "active capabilities changed"
            );
            self.send_report(LoopReport::CapabilitiesChanged {
                run_id,
                iteration,
                added,
                removed,
            })
            .await;
        }
    }

    async fn send_report(&self, report: LoopReport) {
        let Some(tx) = &self.report_tx else {
            return;
        };
        if let Err(e) = tx.send(report).await {
            tracing::error!("failed to send loop report: {e}");
        }
    }
}
