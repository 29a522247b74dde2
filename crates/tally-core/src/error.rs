//! Error types for Tally

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// Malformed configuration or rule file
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The destination ledger could not be safely rewritten. Nothing was written.
    #[error("Cannot rewrite {}: {reason}", path.display())]
    StructuralWrite { path: PathBuf, reason: String },
}

impl Error {
    pub(crate) fn structural(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::StructuralWrite {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
