use std::sync::Arc;

use tooloop_agent::decoder::TextDecoder;
use tooloop_agent::model::ScriptedModel;
use tooloop_agent::{LoopEngine, LoopOutcome, LoopOutput, LoopReport};
use tooloop_core::config::LoopConfig;
use tooloop_core::transcript::ChatMessage;

use crate::CliError;
use crate::catalog::load_catalog;
use crate::cli::{ReplayArgs, ValidateArgs};
use crate::config::load_config;
use crate::script::load_script;

pub async fn replay(args: ReplayArgs) -> Result<serde_json::Value, CliError> {
    let config = apply_overrides(load_config(&args.config).map_err(usage)?, &args)?;
    let catalog = load_catalog(&args.catalog).map_err(usage)?;
    let responses = load_script(&args.script).map_err(usage)?;

    let mut transcript = Vec::with_capacity(2);
    if let Some(system) = &args.system {
        transcript.push(ChatMessage::system(system));
    }
    transcript.push(ChatMessage::user(&args.prompt));

    tracing::info!(
        script = %args.script.display(),
        responses = responses.len(),
        active = ?catalog.active_names(),
        "replaying scripted session"
    );

    let (report_tx, mut report_rx) = tokio::sync::mpsc::channel::<LoopReport>(64);
    let drain = tokio::spawn(async move {
        let mut received = 0usize;
        while let Some(report) = report_rx.recv().await {
            tracing::debug!(report = ?report, "loop report");
            received += 1;
        }
        received
    });

    let engine = LoopEngine::new(Arc::new(ScriptedModel::new(responses)))
        .with_config(config)
        .with_reports(report_tx);
    let result = engine
        .execute(transcript, catalog.active(), &TextDecoder)
        .await;
    drop(engine);
    let reports = reports_received(drain.await);

    let output = result.map_err(|err| CliError::Run(err.to_string()))?;
    Ok(render_output(&output, reports))
}

fn reports_received(joined: Result<usize, tokio::task::JoinError>) -> usize {
    joined.unwrap_or_else(|err| {
        tracing::warn!("report drain task failed: {err}");
        0
    })
}

pub fn validate(args: ValidateArgs) -> Result<serde_json::Value, CliError> {
    let config = load_config(&args.config).map_err(usage)?;
    let mut payload = serde_json::json!({
        "config": args.config.display().to_string(),
        "max_iterations": config.max_iterations,
        "parallel": config.parallel.enabled,
        "context_capability": config.disclosure.context_capability,
    });

    if let Some(path) = &args.catalog {
        let catalog = load_catalog(path).map_err(usage)?;
        payload["catalog"] = serde_json::json!({
            "path": path.display().to_string(),
            "items": catalog.total(),
            "active": catalog.active_names(),
        });
    }
    Ok(payload)
}

fn apply_overrides(mut config: LoopConfig, args: &ReplayArgs) -> Result<LoopConfig, CliError> {
    if let Some(max_iterations) = args.max_iterations {
        config = config.with_max_iterations(max_iterations);
    }
    if args.per_call_timeout.is_some() || args.batch_timeout.is_some() {
        let per_call = args
            .per_call_timeout
            .unwrap_or_else(|| config.parallel.per_call_timeout());
        let batch = args
            .batch_timeout
            .unwrap_or_else(|| config.parallel.batch_timeout());
        config = config.with_parallel(per_call, batch);
    }
    config
        .validate()
        .map_err(|err| CliError::Usage(err.to_string()))?;
    Ok(config)
}

fn usage(err: anyhow::Error) -> CliError {
    CliError::Usage(format!("{err:#}"))
}

fn render_output(output: &LoopOutput<String>, reports: usize) -> serde_json::Value {
    let mut payload = match &output.outcome {
        LoopOutcome::Final(answer) => serde_json::json!({
            "outcome": "final",
            "answer": answer,
        }),
        LoopOutcome::Replan(request) => serde_json::json!({
            "outcome": "replan",
            "reason": request.reason(),
            "has_mutator": request.has_mutator(),
        }),
        LoopOutcome::Exhausted { .. } => serde_json::json!({ "outcome": "exhausted" }),
    };

    let turns: Vec<serde_json::Value> = output
        .turns
        .iter()
        .map(|turn| {
            serde_json::json!({
                "call_id": turn.call_id,
                "capability": turn.capability_name,
                "input": turn.raw_input,
                "output": turn.raw_output,
                "is_error": turn.is_error(),
                "iteration": turn.iteration,
            })
        })
        .collect();

    payload["run_id"] = serde_json::json!(output.run_id);
    payload["iterations"] = serde_json::json!(output.iterations);
    payload["injected"] = serde_json::json!(output.injected_names());
    payload["removed"] = serde_json::json!(output.removed_names());
    payload["turns"] = serde_json::Value::Array(turns);
    payload["artifacts"] = serde_json::json!(output.artifacts);
    payload["reports"] = serde_json::json!(reports);
    payload
}
