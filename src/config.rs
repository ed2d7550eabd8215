//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/haptime/haptime.toml`
//! 3. Environment variables: `HAPTIME_*` prefix
//!
//! Command-line flags are applied on top by the CLI.

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::domain::control::DEFAULT_NSAMPLE;
use crate::domain::SubstitutionModel;

pub const DEFAULT_MUT_RATE: f64 = 7.6e-10;
pub const DEFAULT_FILTER: f64 = 0.2;

/// Unified configuration for haptime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Estimator program (default: mcmctree on PATH)
    pub estimator: String,
    /// Substitution model
    pub model: SubstitutionModel,
    /// Mutation rate per site per year
    pub mut_rate: f64,
    /// MCMC sample count
    pub nsample: u64,
    /// Missing-data cutoff for alignment sites, 0 disables filtering
    pub filter: f64,
    /// Haplogroup age table used by automatic calibration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_table: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            estimator: "mcmctree".into(),
            model: SubstitutionModel::default(),
            mut_rate: DEFAULT_MUT_RATE,
            nsample: DEFAULT_NSAMPLE,
            filter: DEFAULT_FILTER,
            calibration_table: None,
        }
    }
}

/// Raw settings for intermediate parsing (`None` means "not specified").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub estimator: Option<String>,
    pub model: Option<SubstitutionModel>,
    pub mut_rate: Option<f64>,
    pub nsample: Option<u64>,
    pub filter: Option<f64>,
    pub calibration_table: Option<PathBuf>,
}

/// Get the XDG config directory for haptime.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "haptime").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("haptime.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

fn expand(value: &str) -> String {
    match shellexpand::full(value) {
        Ok(expanded) => expanded.into_owned(),
        Err(_) => value.to_string(),
    }
}

impl Settings {
    /// Expand `~`, `$VAR` and `${VAR}` in path-like fields.
    fn expand_paths(&mut self) {
        self.estimator = expand(&self.estimator);
        if let Some(table) = &self.calibration_table {
            self.calibration_table = Some(PathBuf::from(expand(&table.to_string_lossy())));
        }
    }

    /// Overlay wins where it specifies a value.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            estimator: overlay
                .estimator
                .clone()
                .unwrap_or_else(|| self.estimator.clone()),
            model: overlay.model.unwrap_or(self.model),
            mut_rate: overlay.mut_rate.unwrap_or(self.mut_rate),
            nsample: overlay.nsample.unwrap_or(self.nsample),
            filter: overlay.filter.unwrap_or(self.filter),
            calibration_table: overlay
                .calibration_table
                .clone()
                .or_else(|| self.calibration_table.clone()),
        }
    }

    /// Load settings with layered precedence.
    ///
    /// `config_file` replaces the global config file when given.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ApplicationError> {
        let mut current = Self::default();

        match config_file {
            Some(path) => {
                let raw = load_raw_settings(path)?;
                current = current.merge_with(&raw);
            }
            None => {
                if let Some(global_path) = global_config_path() {
                    if global_path.exists() {
                        let raw = load_raw_settings(&global_path)?;
                        current = current.merge_with(&raw);
                    }
                }
            }
        }

        current = Self::apply_env_overrides(current)?;
        current.expand_paths();
        current.validate()?;
        Ok(current)
    }

    /// Apply HAPTIME_* environment variables as explicit overrides.
    fn apply_env_overrides(settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(Environment::with_prefix("HAPTIME"))
            .build()
            .map_err(config_err)?;

        let mut raw = RawSettings::default();
        if let Ok(val) = config.get_string("estimator") {
            raw.estimator = Some(val);
        }
        if let Ok(val) = config.get_string("model") {
            let model = val.parse().map_err(|message| ApplicationError::Config { message })?;
            raw.model = Some(model);
        }
        raw.mut_rate = env_number(&config, "mut_rate")?;
        raw.nsample = env_number(&config, "nsample")?;
        raw.filter = env_number(&config, "filter")?;
        if let Ok(val) = config.get_string("calibration_table") {
            raw.calibration_table = Some(PathBuf::from(val));
        }
        Ok(settings.merge_with(&raw))
    }

    pub fn validate(&self) -> Result<(), ApplicationError> {
        if !(self.mut_rate.is_finite() && self.mut_rate > 0.0) {
            return Err(ApplicationError::Config {
                message: format!("mut_rate must be positive, got {}", self.mut_rate),
            });
        }
        if !(0.0..=1.0).contains(&self.filter) {
            return Err(ApplicationError::Config {
                message: format!("filter must be within [0, 1], got {}", self.filter),
            });
        }
        if self.estimator.trim().is_empty() {
            return Err(ApplicationError::Config {
                message: "estimator must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# haptime configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/haptime/haptime.toml
#   Env:    HAPTIME_* environment variables (e.g. HAPTIME_MUT_RATE=8e-10)
#   Flags:  command-line options

# Estimator program, name on PATH or full path
# estimator = "mcmctree"

# Substitution model: jc69, k80, f81, f84, hky85, gtr
# model = "hky85"

# Mutation rate per site per year
# mut_rate = 7.6e-10

# MCMC sample count (values below 1000 fall back to 10000)
# nsample = 10000

# Drop alignment sites with at least this fraction of N/- (0 disables)
# filter = 0.2

# Tab-separated haplogroup ages (Haplogroup, Lower1, Upper1) for --auto-cal
# calibration_table = "~/.local/share/haptime/haplogroup_ages.tsv"
"#
        .to_string()
    }
}

fn env_number<T>(config: &Config, key: &str) -> Result<Option<T>, ApplicationError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match config.get_string(key) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ApplicationError::Config {
                message: format!("HAPTIME_{}: {}", key.to_uppercase(), e),
            }),
        Err(_) => Ok(None),
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn given_defaults_when_created_then_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.estimator, "mcmctree");
        assert_eq!(settings.model, SubstitutionModel::Hky85);
        assert_eq!(settings.mut_rate, 7.6e-10);
        assert_eq!(settings.nsample, 10000);
        assert_eq!(settings.filter, 0.2);
        assert!(settings.calibration_table.is_none());
    }

    #[test]
    fn given_partial_overlay_when_merging_then_keeps_unspecified_values() {
        let base = Settings::default();
        let overlay = RawSettings {
            model: Some(SubstitutionModel::Gtr),
            nsample: Some(20000),
            ..Default::default()
        };

        let merged = base.merge_with(&overlay);

        assert_eq!(merged.model, SubstitutionModel::Gtr);
        assert_eq!(merged.nsample, 20000);
        assert_eq!(merged.estimator, "mcmctree");
        assert_eq!(merged.mut_rate, DEFAULT_MUT_RATE);
    }

    #[test]
    fn given_config_file_when_loading_then_applies_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("haptime.toml");
        std::fs::write(
            &path,
            "model = \"k80\"\nmut_rate = 5e-10\ncalibration_table = \"/data/ages.tsv\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.model, SubstitutionModel::K80);
        assert_eq!(settings.mut_rate, 5e-10);
        assert_eq!(settings.calibration_table, Some(PathBuf::from("/data/ages.tsv")));
    }

    #[test]
    fn given_invalid_toml_when_loading_then_config_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("haptime.toml");
        std::fs::write(&path, "model = [").unwrap();

        let result = Settings::load(Some(&path));
        assert!(matches!(result, Err(ApplicationError::Config { .. })));
    }

    #[test]
    fn given_filter_out_of_range_when_validating_then_errors() {
        let settings = Settings {
            filter: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn given_tilde_in_estimator_when_expand_paths_then_expands_to_home() {
        let mut settings = Settings {
            estimator: "~/bin/mcmctree".into(),
            calibration_table: Some(PathBuf::from("$HOME/ages.tsv")),
            ..Default::default()
        };

        settings.expand_paths();

        let home = std::env::var("HOME").expect("HOME should be set");
        assert!(settings.estimator.starts_with(&home));
        assert!(settings
            .calibration_table
            .unwrap()
            .to_string_lossy()
            .starts_with(&home));
    }

    #[test]
    fn given_settings_when_serializing_then_template_and_toml_agree_on_keys() {
        let toml = Settings::default().to_toml().unwrap();
        let template = Settings::template();
        for key in ["estimator", "model", "mut_rate", "nsample", "filter"] {
            assert!(toml.contains(key), "{key} missing from toml");
            assert!(template.contains(key), "{key} missing from template");
        }
    }
}
