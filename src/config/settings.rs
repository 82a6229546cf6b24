use crate::algorithms::{BlockMatchingParams, FeatureParams};
use crate::config::RegistrationConfigBuilder;
use crate::error::RegistrationError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Constants of the correspondence fallback cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingParams {
    /// Upper bound of the steps-per-octave sweep, inclusive
    pub max_steps: u32,
    pub step_increment: u32,
    /// Template for the first strategy; steps, octave size and inlier ratio are set per attempt
    pub sift: FeatureParams,
    /// Template for the second strategy; steps and octave size are set per attempt
    pub mops: FeatureParams,
    pub block: BlockMatchingParams,
}

impl Default for MatchingParams {
    fn default() -> Self {
        Self {
            max_steps: 30,
            step_increment: 3,
            sift: FeatureParams::sift(),
            mops: FeatureParams::mops(),
            block: BlockMatchingParams::default(),
        }
    }
}

impl MatchingParams {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.step_increment == 0 {
            errors.push("step_increment must be positive".to_string());
        }
        for (name, params) in [("sift", &self.sift), ("mops", &self.mops)] {
            if params.fd_size < 2 {
                errors.push(format!("{name}.fd_size must be at least 2"));
            }
            if !(0.0..1.0).contains(&params.rod) {
                errors.push(format!("{name}.rod must be within [0, 1)"));
            }
            if params.max_epsilon <= 0.0 {
                errors.push(format!("{name}.max_epsilon must be positive"));
            }
        }
        if self.block.layer_scale <= 0.0 || self.block.layer_scale > 1.0 {
            errors.push("block.layer_scale must be within (0, 1]".to_string());
        }
        if self.block.block_radius == 0 || self.block.grid_spacing == 0 {
            errors.push("block.block_radius and block.grid_spacing must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// File form of a run configuration; every field is optional so that
/// command-line flags can fill in or override values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationSettings {
    pub input_folder: Option<PathBuf>,
    pub marker: Option<String>,
    pub rounds: Option<usize>,
    pub layer_keyword: Option<String>,
    pub save_folder: Option<PathBuf>,
    pub fine_tune: Option<bool>,
    pub min_inlier_ratio: Option<f64>,
    pub initial_steps: Option<u32>,
    pub matching: MatchingParams,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Copy)]
pub enum SettingsFormat {
    Json,
    Toml,
}

impl RegistrationSettings {
    /// Read a TOML document, or JSON when the content starts with `{`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, RegistrationError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RegistrationError::io(path, e))?;

        let parsed = if content.trim_start().starts_with('{') {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            toml::from_str(&content).map_err(|e| e.to_string())
        };
        let settings: Self = parsed.map_err(|reason| {
            RegistrationError::Config(format!("cannot parse {}: {reason}", path.display()))
        })?;

        settings
            .matching
            .validate()
            .map_err(|errors| RegistrationError::Config(errors.join("; ")))?;
        Ok(settings)
    }

    pub fn save_to_file<P: AsRef<Path>>(
        &self,
        path: P,
        format: SettingsFormat,
    ) -> Result<(), RegistrationError> {
        let path = path.as_ref();
        let content = match format {
            SettingsFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| RegistrationError::export(path, e))?
            }
            SettingsFormat::Toml => {
                toml::to_string_pretty(self).map_err(|e| RegistrationError::export(path, e))?
            }
        };
        fs::write(path, content).map_err(|e| RegistrationError::io(path, e))
    }

    /// Start a builder from the values present in the file.
    pub fn into_builder(self) -> RegistrationConfigBuilder {
        let mut builder = RegistrationConfigBuilder::default();
        if let Some(folder) = self.input_folder {
            builder = builder.input_folder(folder);
        }
        if let Some(marker) = self.marker {
            builder = builder.marker(marker);
        }
        if let Some(rounds) = self.rounds {
            builder = builder.rounds(rounds);
        }
        if let Some(keyword) = self.layer_keyword {
            builder = builder.layer_keyword(keyword);
        }
        if let Some(folder) = self.save_folder {
            builder = builder.save_folder(folder);
        }
        if let Some(fine_tune) = self.fine_tune {
            builder = builder.fine_tune(fine_tune);
        }
        if let Some(ratio) = self.min_inlier_ratio {
            builder = builder.min_inlier_ratio(ratio);
        }
        if let Some(steps) = self.initial_steps {
            builder = builder.initial_steps(steps);
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_with_partial_matching_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        let content = format!(
            "input_folder = {:?}\nmarker = \"Hu\"\nrounds = 3\nfine_tune = true\nmin_inlier_ratio = 0.2\n\n[matching]\nmax_steps = 12\n",
            dir.path().display().to_string()
        );
        std::fs::write(&path, content).unwrap();

        let settings = RegistrationSettings::load_from_file(&path).unwrap();
        assert_eq!(settings.matching.max_steps, 12);
        assert_eq!(settings.matching.step_increment, 3);

        let config = settings.into_builder().build().unwrap();
        assert_eq!(config.marker(), "Hu");
        assert_eq!(config.rounds(), 3);
        assert_eq!(config.effective_min_inlier_ratio(), 0.2);
    }

    #[test]
    fn test_json_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let settings = RegistrationSettings {
            marker: Some("DAPI".to_string()),
            rounds: Some(4),
            ..RegistrationSettings::default()
        };
        settings.save_to_file(&path, SettingsFormat::Json).unwrap();
        assert_eq!(RegistrationSettings::load_from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_matching_params_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[matching]\nstep_increment = 0\n").unwrap();
        let err = RegistrationSettings::load_from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}
