use thiserror::Error;

/// Failure to locate, read or validate a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: String },

    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("Could not parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Bad value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
