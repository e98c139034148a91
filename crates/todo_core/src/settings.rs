use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::SettingsError;

/// Key-value persistence used for durability across sessions.
pub trait SettingsStore: Send + Sync {
    /// Overwrites whatever was stored under `key`.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), SettingsError>;
    /// Returns the stored bytes, or `None` if `key` was never saved.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError>;
}

/// Volatile store. Clones share one map.
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    values: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.read().contains_key(key)
    }
}

impl SettingsStore for MemorySettingsStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), SettingsError> {
        self.values.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        Ok(self.values.read().get(key).cloned())
    }
}

/// Directory-backed store holding one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    root: PathBuf,
}

impl FileSettingsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, SettingsError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid {
            return Err(SettingsError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl SettingsStore for FileSettingsStore {
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), SettingsError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)?;
        let staging = path.with_extension("json.tmp");
        let written = fs::File::create(&staging)
            .and_then(|mut file| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, &path));
        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_file(&staging) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove staging file");
                }
            }
            return Err(err.into());
        }
        tracing::debug!(path = %path.display(), len = bytes.len(), "settings written");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, SettingsError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
