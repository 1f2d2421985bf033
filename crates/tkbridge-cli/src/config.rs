//! Configuration file parsing for tkbridge.toml.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tkbridge_runtime::{BridgeConfig, InterpreterConfig};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "tkbridge.toml";

/// Overrides both keepalive intervals.
pub const TIMER_ENV_VAR: &str = "TKBRIDGE_TIMER_MS";

/// Main configuration structure.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Process-wide settings
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Settings for interpreters created by the CLI
    #[serde(default)]
    pub interpreter: InterpreterConfig,

    /// File the configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Load configuration from `path`, or from `tkbridge.toml` in the working
/// directory when present, then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default.exists() {
                read_config(&default)?
            } else {
                Config::default()
            }
        }
    };
    apply_timer_override(&mut config, std::env::var(TIMER_ENV_VAR).ok().as_deref())?;
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut config: Config = toml::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
    config.source = Some(path.to_path_buf());
    Ok(config)
}

fn apply_timer_override(config: &mut Config, value: Option<&str>) -> anyhow::Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    let ms: u32 = value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a whole number of milliseconds", TIMER_ENV_VAR))?;
    config.bridge.global_timer_interval_ms = ms;
    config.interpreter.timer_interval_ms = ms;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bridge.global_timer_interval_ms, 5);
        assert_eq!(config.interpreter.timer_interval_ms, 5);
        assert!(!config.interpreter.safe);
        assert!(config.source.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[bridge]
global_timer_interval_ms = 20

[interpreter]
safe = true
wait_timeout_ms = 1500
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bridge.global_timer_interval_ms, 20);
        assert!(config.interpreter.safe);
        assert_eq!(config.interpreter.wait_timeout_ms, Some(1500));
        assert_eq!(config.interpreter.timer_interval_ms, 5);
    }

    #[test]
    fn test_timer_override() {
        let mut config = Config::default();
        apply_timer_override(&mut config, None).unwrap();
        assert_eq!(config.interpreter.timer_interval_ms, 5);

        apply_timer_override(&mut config, Some(" 0 ")).unwrap();
        assert_eq!(config.interpreter.timer_interval_ms, 0);
        assert_eq!(config.bridge.global_timer_interval_ms, 0);

        assert!(apply_timer_override(&mut config, Some("fast")).is_err());
    }

    #[test]
    fn test_explicit_file() {
        let path = std::env::temp_dir().join(format!("tkb-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[interpreter]\ntimer_interval_ms = 7\n").unwrap();
        let config = read_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.interpreter.timer_interval_ms, 7);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = load_config(Some(Path::new("/nonexistent/tkbridge.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }
}
