use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use tooloop_core::capability::{CallContext, CapabilityRef, CapabilityResult};
use tooloop_core::error::CapabilityError;
use tooloop_core::replan::ReplanRequest;
use tooloop_core::transcript::CapabilityCall;

/// Result of dispatching one call, before it becomes a turn record.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Done(CapabilityResult),
    Replan(ReplanRequest),
}

/// Invoke a capability, folding every recoverable failure into an `Error` result.
///
/// Only a replan request escapes as a distinct outcome.
pub(crate) async fn invoke(
    capability: &CapabilityRef,
    call: &CapabilityCall,
    ctx: &CallContext,
) -> CallOutcome {
    if !call.input.trim().is_empty()
        && serde_json::from_str::<serde_json::Value>(&call.input).is_err()
    {
        tracing::warn!(
            capability = %call.name,
            call_id = %call.id,
            "capability input is not valid JSON; dispatching raw input"
        );
    }

    let outcome = AssertUnwindSafe(capability.call(&call.input, ctx))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(result)) => CallOutcome::Done(result),
        Ok(Err(CapabilityError::Replan(request))) => CallOutcome::Replan(request),
        Ok(Err(err)) => CallOutcome::Done(CapabilityResult::error(err.to_string())),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                capability = %call.name,
                call_id = %call.id,
                panic = %message,
                "capability panicked"
            );
            CallOutcome::Done(CapabilityResult::error_with_cause(
                format!("capability '{}' panicked", call.name),
                message,
            ))
        }
    }
}

/// Result shown to the model when it calls a name outside the active set.
pub(crate) fn rejected_call(call: &CapabilityCall, active_names: &[String]) -> CapabilityResult {
    let available = if active_names.is_empty() {
        "none".to_string()
    } else {
        active_names.join(", ")
    };
    CapabilityResult::error(format!(
        "Capability '{}' is not available. Available capabilities: {available}",
        call.name
    ))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
