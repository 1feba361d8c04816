use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

const STORAGE_FILE_NAME: &str = "storage.json";

/// Durable key-value storage surviving process restarts
///
/// Values are whole JSON documents; a `save` replaces the previous value of
/// the key.
pub trait Persistence: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Value>>;

    fn save(&self, key: &str, value: Value) -> Result<()>;
}

/// Loads `key` as `T`, or returns `default` when nothing was stored yet
pub fn load_or<T: DeserializeOwned>(
    persistence: &dyn Persistence,
    key: &str,
    default: T,
) -> Result<T> {
    match persistence.load(key)? {
        Some(value) => serde_json::from_value(value)
            .with_context(|| format!("Stored value under {key} has an unexpected shape")),
        None => Ok(default),
    }
}

pub fn default_storage_path() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "cph")
        .ok_or_else(|| anyhow!("Unable to find user directory"))?;
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir)?;

    Ok(data_dir.join(STORAGE_FILE_NAME))
}

/// All keys live in one JSON object on disk, rewritten on every save
pub struct JsonFilePersistence {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl JsonFilePersistence {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("Corrupt storage file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
        };

        log::info!("Opened storage at {} with {} keys", path.display(), entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a truncated file
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&next)?)?;
        fs::rename(&tmp_path, &self.path)?;
        *entries = next;

        log::debug!("Saved {key} to {}", self.path.display());
        Ok(())
    }
}

/// Process-local storage, for tests and hosts that persist elsewhere
#[derive(Default)]
pub struct MemoryPersistence {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}
