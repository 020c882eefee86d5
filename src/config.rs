//! Configuration management for toolshub.
//!
//! This module defines the structure of the `toolshub.toml` settings file
//! and provides functionality to load and parse it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::output::DEFAULT_OUTPUT_CHUNKS;
use crate::supervisor::SupervisorConfig;

/// Default settings file looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "toolshub.toml";
/// Default location of the tool store, relative to the current directory.
pub const DEFAULT_STORE_FILE: &str = "toolshub-tools.toml";

/// Top-level configuration structure corresponding to `toolshub.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Milliseconds a launch must survive before it counts as running (default: 500).
    pub grace_period_ms: Option<u64>,
    /// Milliseconds a graceful stop may take before the tree is force-killed (default: 5000).
    pub stop_timeout_ms: Option<u64>,
    /// Maximum number of output chunks kept per tool (default: 500).
    pub output_lines: Option<usize>,
    /// Path of the tool store file.
    pub store: Option<PathBuf>,
    /// Whether to strip ANSI escape codes from printed output (default: false).
    pub strip_ansi: Option<bool>,
    /// Whether to emit logs as JSON (default: false).
    pub log_json: Option<bool>,
    /// Shell that runs tool commands (default: `sh` on Unix, `cmd` on Windows).
    pub shell: Option<PathBuf>,
}

impl Config {
    pub fn supervisor(&self) -> SupervisorConfig {
        let defaults = SupervisorConfig::default();
        SupervisorConfig {
            grace_period: self
                .grace_period_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.grace_period),
            stop_timeout: self
                .stop_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stop_timeout),
            shell: self.shell.clone(),
        }
    }

    pub fn output_lines(&self) -> usize {
        self.output_lines.unwrap_or(DEFAULT_OUTPUT_CHUNKS).max(1)
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE))
    }
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
grace_period_ms = 250
stop_timeout_ms = 1000
output_lines = 200
store = "data/tools.toml"
strip_ansi = true
log_json = true
shell = "/bin/bash"
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.grace_period_ms, Some(250));
        assert_eq!(config.output_lines(), 200);
        assert_eq!(config.store_path(), PathBuf::from("data/tools.toml"));
        assert_eq!(config.strip_ansi, Some(true));
        assert_eq!(config.log_json, Some(true));
        let supervisor = config.supervisor();
        assert_eq!(supervisor.grace_period, Duration::from_millis(250));
        assert_eq!(supervisor.stop_timeout, Duration::from_secs(1));
        assert_eq!(supervisor.shell, Some(PathBuf::from("/bin/bash")));
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.output_lines(), 500);
        assert_eq!(config.store_path(), PathBuf::from(DEFAULT_STORE_FILE));
        assert_eq!(
            config.supervisor().grace_period,
            Duration::from_millis(500)
        );
        assert_eq!(config.supervisor().shell, None);
    }

    #[test]
    fn load_config_reports_the_path() {
        let err = load_config(Path::new("/missing/toolshub.toml")).unwrap_err();
        assert!(err.to_string().contains("/missing/toolshub.toml"));
    }
}
