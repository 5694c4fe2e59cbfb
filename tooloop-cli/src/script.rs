//! Scripted model sessions: a JSON array of canned model responses.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use tooloop_agent::model::ModelResponse;
use tooloop_core::transcript::CapabilityCall;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptEntry {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    calls: Vec<ScriptCall>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptCall {
    #[serde(default)]
    id: Option<String>,
    name: String,
    /// A JSON string is passed through verbatim; any other value is serialized.
    #[serde(default)]
    input: serde_json::Value,
}

pub fn load_script(path: &Path) -> Result<Vec<ModelResponse>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading script: {}", path.display()))?;
    parse_script(&content).with_context(|| format!("parsing script: {}", path.display()))
}

pub fn parse_script(content: &str) -> Result<Vec<ModelResponse>> {
    let entries: Vec<ScriptEntry> = serde_json::from_str(content)?;
    if entries.is_empty() {
        bail!("script has no responses");
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(turn, entry)| {
            if entry.text.is_none() && entry.calls.is_empty() {
                bail!("response {turn} has neither text nor calls");
            }
            let calls = entry
                .calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| {
                    let id = call
                        .id
                        .unwrap_or_else(|| format!("call-{}-{}", turn + 1, index + 1));
                    let input = match call.input {
                        serde_json::Value::String(raw) => raw,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    CapabilityCall::new(id, call.name, input)
                })
                .collect();
            Ok(ModelResponse {
                text: entry.text,
                calls,
            })
        })
        .collect()
}
