// src/prefs.rs
// Small persisted key-value store backing identity, pin, role and routing state.

use crate::error::{BridgeError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// String-keyed preferences persisted as one JSON object per file.
///
/// Every mutation goes through [`Preferences::update`], which writes the whole
/// map back atomically (temp file + rename). Without a path the store lives
/// in memory only.
#[derive(Debug, Default)]
pub struct Preferences {
    path: Option<PathBuf>,
    values: Map<String, Value>,
}

impl Preferences {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or lazily create) the preferences file at `path`.
    /// An unreadable or corrupt file is reported, not silently discarded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Map::new(),
            Ok(bytes) => serde_json::from_slice::<Map<String, Value>>(&bytes).map_err(|e| {
                BridgeError::Storage(format!("{}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(BridgeError::Storage(format!("{}: {}", path.display(), e))),
        };
        Ok(Self {
            path: Some(path),
            values,
        })
    }

    /// Open `<dir>/<name>`; `None` dir means in-memory.
    pub fn open_in(dir: Option<&Path>, name: &str) -> Result<Self> {
        match dir {
            Some(d) => Self::open(d.join(name)),
            None => Ok(Self::in_memory()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Apply a batch of edits and persist once.
    ///
    /// The edits only become visible once they are on disk; a failed write
    /// leaves the store unchanged.
    pub fn update<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut Editor<'_>),
    {
        let mut staged = self.values.clone();
        edit(&mut Editor {
            values: &mut staged,
        });
        self.write(&staged)?;
        self.values = staged;
        Ok(())
    }

    fn write(&self, values: &Map<String, Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let storage_err = |e: std::io::Error| BridgeError::Storage(format!("{}: {}", path.display(), e));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(storage_err)?;
        }
        let json = serde_json::to_vec_pretty(values)
            .map_err(|e| BridgeError::Storage(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(storage_err)?;
        std::fs::rename(&tmp, path).map_err(storage_err)?;
        Ok(())
    }
}

/// Mutable view handed to [`Preferences::update`].
pub struct Editor<'a> {
    values: &'a mut Map<String, Value>,
}

impl Editor<'_> {
    pub fn put_string(&mut self, key: &str, value: impl Into<String>) {
        self.values
            .insert(key.to_string(), Value::String(value.into()));
    }

    pub fn put_bool(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), Value::Bool(value));
    }

    pub fn remove(&mut self, key: &str) {
        self.values.remove(key);
    }
}
