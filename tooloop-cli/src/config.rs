use std::path::Path;

use anyhow::{Context, Result};

use tooloop_core::config::LoopConfig;

/// Load, deserialize and validate a loop configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = LoopConfig::from_toml_str(&content)
        .with_context(|| format!("parsing config: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn loads_config_with_defaults() {
        let file = write_temp("max_iterations = 8\n\n[parallel]\nenabled = true\n");
        let config = load_config(file.path()).expect("valid config");

        assert_eq!(config.max_iterations, 8);
        assert!(config.parallel.enabled);
        assert_eq!(config.parallel.per_call_timeout_ms, 30_000);
        assert!(config.disclosure.context_capability);
    }

    #[test]
    fn invalid_config_names_the_file() {
        let file = write_temp("[parallel]\nper_call_timeout_ms = 5000\nbatch_timeout_ms = 1000\n");
        let err = load_config(file.path()).expect_err("batch shorter than per-call");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("parsing config"));
        assert!(rendered.contains("batch_timeout_ms (1000) is shorter"));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_config(Path::new("/nonexistent/tooloop.toml")).expect_err("missing");
        assert!(err.to_string().starts_with("reading config"));
    }
}
