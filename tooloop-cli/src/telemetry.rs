use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global subscriber: `RUST_LOG` filter and JSON events on stderr.
///
/// Without `RUST_LOG`, `verbose` selects debug instead of info. Stdout stays
/// reserved for command output.
pub fn init_telemetry(verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .flatten_event(true)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .try_init()?;
    Ok(())
}

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "info" }
}
