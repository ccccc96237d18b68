//! Configuration error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("`{field}` must be host:port, got '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
