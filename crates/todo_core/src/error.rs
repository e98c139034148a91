use std::io;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("todo name must not be empty")]
    EmptyName,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("index {index} is out of range for a list of {len} items")]
    OutOfRange { index: usize, len: usize },
}

/// Failures raised by a [`SettingsStore`](crate::settings::SettingsStore) backend.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings key `{0}`")]
    InvalidKey(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to encode todo list")]
    EncodeFailed(#[source] serde_json::Error),
    #[error("failed to write todo list")]
    WriteFailed(#[source] SettingsError),
    #[error("failed to decode todo list")]
    DecodeFailed(#[source] serde_json::Error),
    #[error("failed to read todo list")]
    ReadFailed(#[source] SettingsError),
}
