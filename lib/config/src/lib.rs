//! Hierarchical configuration for fmriprep.
//!
//! Settings are grouped in four sections:
//!
//! - **environment**: facts detected from the running process, read-only
//! - **execution**: paths and switches of one invocation
//! - **workflow**: choices that shape the assembled pipelines
//! - **nipype**: settings of the execution engine
//!
//! A configuration is loaded from an optional TOML file overlaid with
//! `FMRIPREP__<SECTION>__<KEY>` environment variables, and can be written
//! back to TOML for provenance.

pub mod dataset;
pub mod environment;
pub mod error;
pub mod sections;

pub use dataset::{dataset_description, write_dataset_description};
pub use environment::{Environment, ExecEnv};
pub use error::ConfigError;
pub use sections::{DEFAULT_SPACE, Execution, Ignore, Nipype, WorkflowSettings, new_run_uuid};

use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "FMRIPREP";

/// Keys whose environment values are whitespace-separated lists.
const LIST_KEYS: [&str; 2] = ["execution.participant_label", "workflow.ignore"];

/// The full configuration of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    pub execution: Execution,
    pub workflow: WorkflowSettings,
    pub nipype: Nipype,
}

impl Config {
    /// Loads configuration from `path` (if any) and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a source cannot be read or does
    /// not deserialize.
    pub fn load(path: Option<&Path>) -> Result<Self, Report<ConfigError>> {
        Self::load_with(path, None)
    }

    /// Like [`Config::load`], reading overrides from `env` instead of the
    /// process environment when given.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn load_with(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, Report<ConfigError>> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "reading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let mut environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .list_separator(" ")
            .try_parsing(true)
            .source(env);
        for key in LIST_KEYS {
            environment = environment.with_list_parse_key(key);
        }

        let mut config: Self = builder
            .add_source(environment)
            .build()
            .map_err(ConfigError::from)?
            .try_deserialize()
            .map_err(ConfigError::from)?;
        config.environment = Environment::detect();
        config.execution.normalize_labels();
        config.nipype.resolve(config.environment.cpu_count);
        Ok(config)
    }

    /// Checks cross-setting constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for the first offending setting.
    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        self.workflow.validate()?;
        if self.execution.bids_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                setting: "execution.bids_dir".to_string(),
                reason: "no BIDS dataset given".to_string(),
            }
            .into());
        }
        if self.execution.output_dir == self.execution.bids_dir {
            return Err(ConfigError::Invalid {
                setting: "execution.output_dir".to_string(),
                reason: "outputs must not be written into the input dataset".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Serializes to TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a value has no TOML form.
    pub fn to_toml(&self) -> Result<String, Report<ConfigError>> {
        toml::to_string(self).map_err(|e| {
            ConfigError::Invalid {
                setting: "config".to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Writes the TOML form to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] when the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), Report<ConfigError>> {
        let text = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
        }
        std::fs::write(path, text).map_err(|e| ConfigError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}
