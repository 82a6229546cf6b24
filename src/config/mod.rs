use crate::error::RegistrationError;
use std::path::{Path, PathBuf};

pub mod settings;

pub use settings::*;

/// Minimal inlier ratio used when fine tuning is off
pub const DEFAULT_MIN_INLIER_RATIO: f64 = 0.05;
/// Initial steps per scale octave used when fine tuning is off
pub const DEFAULT_INITIAL_STEPS: u32 = 3;
pub const DEFAULT_LAYER_KEYWORD: &str = "Layer";
/// Folder created under the save folder for all run outputs
pub const RESULTS_DIR: &str = "Results";

/// Immutable configuration of one registration run.
///
/// Built and validated by [`RegistrationConfigBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationConfig {
    input_folder: PathBuf,
    marker: String,
    rounds: usize,
    layer_keyword: String,
    save_folder: PathBuf,
    fine_tune: bool,
    min_inlier_ratio: f64,
    initial_steps: u32,
}

impl RegistrationConfig {
    pub fn builder() -> RegistrationConfigBuilder {
        RegistrationConfigBuilder::default()
    }

    pub fn input_folder(&self) -> &Path {
        &self.input_folder
    }

    /// Common-marker token, matched case-insensitively against file stems
    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn layer_keyword(&self) -> &str {
        &self.layer_keyword
    }

    pub fn save_folder(&self) -> &Path {
        &self.save_folder
    }

    pub fn results_folder(&self) -> PathBuf {
        self.save_folder.join(RESULTS_DIR)
    }

    pub fn fine_tune(&self) -> bool {
        self.fine_tune
    }

    pub fn min_inlier_ratio(&self) -> f64 {
        self.min_inlier_ratio
    }

    pub fn initial_steps(&self) -> u32 {
        self.initial_steps
    }

    /// The ratio handed to the matcher: the configured one only when fine tuning
    pub fn effective_min_inlier_ratio(&self) -> f64 {
        if self.fine_tune {
            self.min_inlier_ratio
        } else {
            DEFAULT_MIN_INLIER_RATIO
        }
    }

    pub fn effective_initial_steps(&self) -> u32 {
        if self.fine_tune {
            self.initial_steps
        } else {
            DEFAULT_INITIAL_STEPS
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationConfigBuilder {
    input_folder: Option<PathBuf>,
    marker: Option<String>,
    rounds: usize,
    layer_keyword: String,
    save_folder: Option<PathBuf>,
    fine_tune: bool,
    min_inlier_ratio: f64,
    initial_steps: u32,
}

impl Default for RegistrationConfigBuilder {
    fn default() -> Self {
        Self {
            input_folder: None,
            marker: None,
            rounds: 1,
            layer_keyword: DEFAULT_LAYER_KEYWORD.to_string(),
            save_folder: None,
            fine_tune: false,
            min_inlier_ratio: DEFAULT_MIN_INLIER_RATIO,
            initial_steps: DEFAULT_INITIAL_STEPS,
        }
    }
}

impl RegistrationConfigBuilder {
    pub fn input_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.input_folder = Some(folder.into());
        self
    }

    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn layer_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.layer_keyword = keyword.into();
        self
    }

    /// Outputs go to `<save_folder>/Results`; defaults to the input folder
    pub fn save_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.save_folder = Some(folder.into());
        self
    }

    pub fn fine_tune(mut self, fine_tune: bool) -> Self {
        self.fine_tune = fine_tune;
        self
    }

    pub fn min_inlier_ratio(mut self, ratio: f64) -> Self {
        self.min_inlier_ratio = ratio;
        self
    }

    pub fn initial_steps(mut self, steps: u32) -> Self {
        self.initial_steps = steps;
        self
    }

    pub fn build(self) -> Result<RegistrationConfig, RegistrationError> {
        let mut errors = Vec::new();

        match &self.input_folder {
            None => errors.push("input folder is not set".to_string()),
            Some(folder) if !folder.is_dir() => {
                errors.push(format!("input folder {} is not a directory", folder.display()))
            }
            Some(_) => {}
        }

        let marker = self.marker.unwrap_or_default();
        if marker.trim().is_empty() {
            errors.push("common marker must not be empty".to_string());
        }
        if self.rounds < 1 {
            errors.push("number of rounds must be at least 1".to_string());
        }
        if self.layer_keyword.trim().is_empty() {
            errors.push("layer keyword must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_inlier_ratio) {
            errors.push(format!(
                "minimal inlier ratio must be within [0, 1], got {}",
                self.min_inlier_ratio
            ));
        }
        if self.initial_steps < 1 {
            errors.push("initial steps per scale octave must be at least 1".to_string());
        }

        let input_folder = match self.input_folder {
            Some(folder) if errors.is_empty() => folder,
            _ => return Err(RegistrationError::Config(errors.join("; "))),
        };

        Ok(RegistrationConfig {
            save_folder: self.save_folder.unwrap_or_else(|| input_folder.clone()),
            input_folder,
            marker,
            rounds: self.rounds,
            layer_keyword: self.layer_keyword,
            fine_tune: self.fine_tune,
            min_inlier_ratio: self.min_inlier_ratio,
            initial_steps: self.initial_steps,
        })
    }
}
