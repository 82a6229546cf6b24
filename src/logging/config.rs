//! Logging configuration
//!
//! Per-component log levels and output destinations for the registration tool.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include source file and line in console logs
    pub include_file_location: bool,

    /// Level for the correspondence providers and the fallback cascade
    pub matcher_level: String,

    /// Level for orchestration, stack assembly and export
    pub pipeline_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            matcher_level: "info".to_string(),
            pipeline_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose console logging plus JSON files under `logs/`
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            matcher_level: "trace".to_string(),
            pipeline_level: "debug".to_string(),
        }
    }

    /// File logging only, warnings and above except for pipeline progress
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            log_directory: Some(PathBuf::from("/var/log/multiplex-align")),
            include_file_location: false,
            matcher_level: "warn".to_string(),
            pipeline_level: "info".to_string(),
        }
    }

    /// Raise every level to at least `debug` (`-v`) or `trace` (`-vv`)
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => return self,
            1 => "debug",
            _ => "trace",
        };
        for field in [
            &mut self.global_level,
            &mut self.matcher_level,
            &mut self.pipeline_level,
        ] {
            if level_rank(level) < level_rank(field.as_str()) {
                *field = level.to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("matcher_level", &self.matcher_level),
            ("pipeline_level", &self.pipeline_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "matcher" | "algorithms" => &self.matcher_level,
            "pipeline" => &self.pipeline_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for this crate's modules
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::pipeline={},{krate}::algorithms={},{krate}::pipeline::matcher={}",
            self.global_level, self.pipeline_level, self.matcher_level, self.matcher_level
        )
    }
}

/// Lower is more verbose
fn level_rank(level: &str) -> usize {
    VALID_LEVELS
        .iter()
        .position(|l| *l == level)
        .unwrap_or(VALID_LEVELS.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.global_level, "info");
        assert!(config.console_output);
        assert!(config.log_directory.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        let dev = LoggingConfig::development();
        assert_eq!(dev.matcher_level, "trace");
        assert!(dev.include_file_location);

        let prod = LoggingConfig::production();
        assert_eq!(prod.global_level, "warn");
        assert!(!prod.console_output);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoggingConfig::default();
        config.matcher_level = "loud".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("matcher_level"));
    }

    #[test]
    fn test_verbosity_only_lowers_levels() {
        let config = LoggingConfig {
            pipeline_level: "trace".to_string(),
            ..LoggingConfig::default()
        }
        .with_verbosity(1);
        assert_eq!(config.global_level, "debug");
        assert_eq!(config.matcher_level, "debug");
        assert_eq!(config.pipeline_level, "trace");
    }

    #[test]
    fn test_filter_directives_name_crate_modules() {
        let directives = LoggingConfig::development().filter_directives();
        assert!(directives.starts_with("multiplex_align=debug"));
        assert!(directives.contains("multiplex_align::pipeline::matcher=trace"));
    }
}
