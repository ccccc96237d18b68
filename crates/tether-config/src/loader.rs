//! Configuration loader with multi-source merging

use std::path::{Path, PathBuf};

use crate::{ConfigError, ConfigResult, TetherConfig};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    path: PathBuf,
    env_prefix: String,
    env_source: Option<config::Map<String, String>>,
}

impl ConfigLoader {
    /// Create a loader for the config file at `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            env_prefix: "TETHER".to_string(),
            env_source: None,
        }
    }

    /// Set the environment variable prefix (default: "TETHER")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: config::Map<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Load, merge and validate the configuration
    pub fn load(self) -> ConfigResult<TetherConfig> {
        if !self.path.is_file() {
            return Err(ConfigError::NotFound(self.path));
        }

        let defaults = TetherConfig::default();
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(
                config::File::from(self.path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(self.env_source),
            )
            .build()?;

        let mut tether_config: TetherConfig = built.try_deserialize()?;

        if let Some(base) = self.path.parent() {
            tether_config.resolve_paths(base);
        }
        tether_config.validate()?;

        Ok(tether_config)
    }
}
