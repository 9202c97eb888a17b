//! Configuration module
//!
//! Adapter settings (port, Route-B credentials, protocol timings) and the
//! persisted application configuration.

mod settings;

pub use settings::{AdapterConfig, AdapterSection, AppConfig, LogOutput, LoggingConfig, Timings};

use directories::ProjectDirs;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors, raised once at construction and never retried
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Serial port path is malformed
    #[error("Invalid serial port path: {0}")]
    InvalidPort(String),

    /// Route-B authentication ID is not 32 hex digits
    #[error("Route-B ID must be 32 hexadecimal digits")]
    InvalidId,

    /// Route-B password is empty or contains non-alphanumeric characters
    #[error("Route-B password must be non-empty and alphanumeric")]
    InvalidPassword,

    /// A required setting is missing from flags, environment and file
    #[error("Missing setting: {0}")]
    Missing(&'static str),

    /// No platform configuration directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the configuration file failed
    #[error("Config file {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration could not be serialized
    #[error("Could not serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "routeb", "Routeb")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}

/// Default configuration file path
pub fn config_file() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}
