mod catalog;
mod cli;
mod commands;
mod config;
mod script;
mod telemetry;

use clap::Parser;

use cli::{Cli, Command};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("{0}")]
    Run(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Run(_) => 3,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(err) = telemetry::init_telemetry(cli.verbose) {
        eprintln!("warning: logging disabled: {err}");
    }

    match run(cli).await {
        Ok(payload) => print_payload(json_mode, &payload),
        Err(err) => {
            let exit_code = err.exit_code();
            print_failure(json_mode, &err, exit_code);
            std::process::exit(exit_code);
        }
    }
}

async fn run(cli: Cli) -> Result<serde_json::Value, CliError> {
    match cli.command {
        Command::Replay(args) => commands::replay(args).await,
        Command::Validate(args) => commands::validate(args),
    }
}

fn print_payload(json_mode: bool, payload: &serde_json::Value) {
    let rendered = if json_mode {
        serde_json::json!({ "ok": true, "result": payload }).to_string()
    } else {
        serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
    };
    println!("{rendered}");
}

fn print_failure(json_mode: bool, err: &CliError, exit_code: i32) {
    if json_mode {
        let envelope = serde_json::json!({
            "ok": false,
            "error": { "message": err.to_string(), "code": exit_code },
        });
        eprintln!("{envelope}");
    } else {
        eprintln!("error: {err}");
    }
}
