//! Configuration errors.

use std::path::PathBuf;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  /// The configuration file could not be read.
  #[error("failed to read config file '{}'", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// The configuration file is not valid JSON for the expected type.
  #[error("failed to parse config: {source}")]
  Parse {
    #[source]
    source: serde_json::Error,
  },

  /// A field holds a value outside its allowed range.
  #[error("invalid value for '{field}': {message}")]
  InvalidField { field: String, message: String },
}

impl ConfigError {
  pub(crate) fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self::InvalidField {
      field: field.into(),
      message: message.into(),
    }
  }
}
