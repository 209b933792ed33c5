//! Config loader using TOML and serde.
//!
//! Callers define their own typed config structs; this module only reads
//! the file and reports which file failed and why.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("cannot parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid { field: field.into(), message: message.into() }
    }
}

/// Load a typed config from a TOML file path.
pub fn load_from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let p = path.as_ref();
    let s = fs::read_to_string(p).map_err(|e| ConfigError::Io {
        path: p.to_path_buf(),
        message: e.to_string(),
    })?;
    load_from_str(&s).map_err(|message| ConfigError::Parse { path: p.to_path_buf(), message })
}

fn load_from_str<T: DeserializeOwned>(s: &str) -> Result<T, String> {
    toml::from_str(s).map_err(|e| e.to_string())
}
