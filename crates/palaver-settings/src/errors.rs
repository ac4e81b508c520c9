//! Reasons settings are refused at startup.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded or accepted.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file, or the file merged over defaults, is not valid settings JSON.
    #[error("settings JSON is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    /// An Azure OpenAI value the provider cannot start without (named by its env variable).
    #[error("{0} is required to reach Azure OpenAI")]
    MissingCredential(&'static str),
    /// `session.maxConnections` is zero, so no client could ever connect.
    #[error("session.maxConnections must be at least 1")]
    NoCapacity,
    /// A session timer period of zero.
    #[error("session.{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
