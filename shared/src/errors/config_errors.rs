use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur while loading or resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failure to read the configuration file
    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema failure
    #[error(transparent)]
    Parse(#[from] toml::de::Error),

    /// Structurally valid but semantically wrong settings
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// A destination name no `[destinations.<name>]` section declares
    #[error("unknown destination `{0}`")]
    UnknownDestination(String),
}
