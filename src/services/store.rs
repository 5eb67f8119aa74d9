use sled::Db;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Stored value for '{key}' is not UTF-8")]
    InvalidText { key: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Text key-value persistence used for the ledger and the admission set.
pub trait KvStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, text: &str) -> Result<(), StoreError>;
}

/// Sled-backed store. Every save is flushed before returning.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

impl KvStore for SledStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.db.get(key)? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|_| StoreError::InvalidText {
                    key: key.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn save(&self, key: &str, text: &str) -> Result<(), StoreError> {
        self.db.insert(key, text.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }
}

/// In-process store, used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, text: &str) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert(key.to_string(), text.to_string());
        }
        self
    }
}

impl KvStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(values.get(key).cloned())
    }

    fn save(&self, key: &str, text: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| StoreError::Poisoned)?;
        values.insert(key.to_string(), text.to_string());
        Ok(())
    }
}
