use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "tooloop",
    version,
    about = "Replay scripted tool-calling sessions through the loop engine"
)]
pub struct Cli {
    /// Emit stable JSON envelopes.
    #[arg(long, global = true)]
    pub json: bool,

    /// Debug-level logging when RUST_LOG is unset.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one loop against a scripted model session.
    Replay(ReplayArgs),
    /// Check a loop configuration and, optionally, a capability catalog.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ReplayArgs {
    #[arg(long)]
    pub config: PathBuf,

    #[arg(long)]
    pub catalog: PathBuf,

    /// JSON array of model responses, replayed in order.
    #[arg(long)]
    pub script: PathBuf,

    /// User message that opens the transcript.
    #[arg(long, default_value = "Use the available capabilities to answer.")]
    pub prompt: String,

    /// Optional system message placed before the prompt.
    #[arg(long)]
    pub system: Option<String>,

    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Per-call timeout; enables parallel execution.
    #[arg(long, value_parser = parse_duration)]
    pub per_call_timeout: Option<Duration>,

    /// Batch timeout; enables parallel execution.
    #[arg(long, value_parser = parse_duration)]
    pub batch_timeout: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    pub config: PathBuf,

    #[arg(long)]
    pub catalog: Option<PathBuf>,
}

fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime::parse_duration(input).map_err(|err| err.to_string())
}
