//! Key-value preference and secret stores
//!
//! The relay never reaches for ambient global state: cursor and credential
//! persistence go through explicitly constructed store instances that are
//! injected where they are needed.

use crate::error::{RelayError, StoreError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Plain key-value preference storage.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn PreferenceStore>`,
/// and each write must be atomic for its key.
pub trait PreferenceStore: Send + Sync {
    /// Read a string value; `Ok(None)` when unset, `WrongKind` when binary.
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Read a binary value; `Ok(None)` when unset, `WrongKind` when a string.
    fn get_data(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set_data(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a value of either kind. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// List stored keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// Storage for secret strings such as API tokens
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
enum MemoryValue {
    String(String),
    Data(Vec<u8>),
}

/// In-process store, for tests and embedding hosts that persist elsewhere
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, MemoryValue>>,
    secrets: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryValue>>, StoreError> {
        self.values.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl PreferenceStore for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.values()?.get(key) {
            Some(MemoryValue::String(s)) => Ok(Some(s.clone())),
            Some(MemoryValue::Data(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(None),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values()?
            .insert(key.to_string(), MemoryValue::String(value.to_string()));
        Ok(())
    }

    fn get_data(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.values()?.get(key) {
            Some(MemoryValue::Data(d)) => Ok(Some(d.clone())),
            Some(MemoryValue::String(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(None),
        }
    }

    fn set_data(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.values()?
            .insert(key.to_string(), MemoryValue::Data(value.to_vec()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values()?.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .values()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl SecretStore for MemoryStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        let secrets = self.secrets.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(secrets.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut secrets = self.secrets.lock().map_err(|_| StoreError::LockPoisoned)?;
        secrets.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Value as persisted in the store document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
enum StoredValue {
    String(String),
    /// Base64-encoded bytes
    Data(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    values: BTreeMap<String, StoredValue>,
    #[serde(default)]
    secrets: BTreeMap<String, String>,
}

/// Store backed by a single JSON document on disk.
///
/// The file is the source of truth: reads load it afresh, and every write
/// re-reads it, applies its one-key change and renames a uniquely named
/// temporary file over it. Other handles on the same file therefore keep
/// their own keys, and a crash mid-write leaves the previous state intact.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist yet
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreDocument::default()),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Apply `change` to the current on-disk document and persist it
    fn update(&self, change: impl FnOnce(&mut StoreDocument)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let mut document = self.load()?;
        change(&mut document);
        self.persist(&document)
    }

    fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let filename = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("store");
        let tmp = parent.join(format!(
            ".{}.{}.{}.tmp",
            filename,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));

        fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl PreferenceStore for FileStore {
    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.load()?.values.get(key) {
            Some(StoredValue::String(s)) => Ok(Some(s.clone())),
            Some(StoredValue::Data(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(None),
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.values
                .insert(key.to_string(), StoredValue::String(value.to_string()));
        })
    }

    fn get_data(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.load()?.values.get(key) {
            Some(StoredValue::Data(encoded)) => BASE64
                .decode(encoded)
                .map(Some)
                .map_err(|_| StoreError::Encoding(key.to_string())),
            Some(StoredValue::String(_)) => Err(StoreError::WrongKind(key.to_string())),
            None => Ok(None),
        }
    }

    fn set_data(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let encoded = BASE64.encode(value);
        self.update(|doc| {
            doc.values
                .insert(key.to_string(), StoredValue::Data(encoded));
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        if !self.load()?.values.contains_key(key) {
            return Ok(());
        }
        self.update(|doc| {
            doc.values.remove(key);
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // BTreeMap keys are already sorted
        Ok(self
            .load()?
            .values
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

impl SecretStore for FileStore {
    fn get_secret(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.secrets.get(key).cloned())
    }

    fn set_secret(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|doc| {
            doc.secrets.insert(key.to_string(), value.to_string());
        })
    }
}

/// Run a blocking store operation off the async executor threads
pub(crate) async fn blocking<T, F>(operation: F) -> Result<T, RelayError>
where
    F: FnOnce() -> Result<T, RelayError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| RelayError::Store(StoreError::Task(e.to_string())))?
}
