//! Error type shared by the platform glue and the configuration loader.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised outside the GPU layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or handle retrieval failed.
    #[error("Window error: {0}")]
    Window(String),

    /// The Vulkan surface for a window could not be created.
    #[error("Surface error: {0}")]
    Surface(String),

    /// A configuration file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid TOML for [`crate::Config`].
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is out of range.
    #[error("Invalid config value for `{field}`: {reason}")]
    Config { field: &'static str, reason: String },

    /// IO errors not tied to a config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
