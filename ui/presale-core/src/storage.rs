//! Small persisted key/value state: the sticky disconnect flag, the theme and the snapshot
//! cache all live here.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, WalletError};

pub const DISCONNECTED_KEY: &str = "walletDisconnected";
pub const THEME_KEY: &str = "theme";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn keys(&self) -> Vec<String>;
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

/// A JSON object on disk, rewritten in full on every mutation.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged and replaced.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding unreadable state file");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        let text =
            serde_json::to_string_pretty(entries).map_err(|e| WalletError::Storage(e.to_string()))?;
        fs::write(&self.path, text).map_err(|e| WalletError::Storage(e.to_string()))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// Sticky disconnect flag
// ---------------------------------------------------------------------------

pub fn user_disconnected(store: &dyn KeyValueStore) -> bool {
    store.get(DISCONNECTED_KEY).as_deref() == Some("true")
}

pub fn set_user_disconnected(store: &dyn KeyValueStore, disconnected: bool) -> Result<()> {
    if disconnected {
        store.set(DISCONNECTED_KEY, "true")
    } else {
        store.remove(DISCONNECTED_KEY)
    }
}

// ---------------------------------------------------------------------------
// Theme preference
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(THEME_KEY).as_deref() {
            Some("light") => Self::Light,
            _ => Self::Dark,
        }
    }

    pub fn save(self, store: &dyn KeyValueStore) -> Result<()> {
        store.set(THEME_KEY, self.as_str())
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dark => "dark",
            Self::Light => "light",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_flag_round_trips_through_the_store() {
        let store = MemoryStore::new();
        assert!(!user_disconnected(&store));
        set_user_disconnected(&store, true).unwrap();
        assert!(user_disconnected(&store));
        set_user_disconnected(&store, false).unwrap();
        assert!(!user_disconnected(&store));
        assert!(store.keys().is_empty());
    }

    #[test]
    fn theme_defaults_to_dark() {
        let store = MemoryStore::new();
        assert_eq!(Theme::load(&store), Theme::Dark);
        Theme::Light.save(&store).unwrap();
        assert_eq!(Theme::load(&store), Theme::Light);
        assert_eq!(Theme::Light.toggled(), Theme::Dark);
    }

    #[test]
    fn file_store_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "presale-store-{}-{}.json",
            std::process::id(),
            line!()
        ));
        {
            let store = FileStore::open(&path);
            store.set(DISCONNECTED_KEY, "true").unwrap();
            store.set(THEME_KEY, "light").unwrap();
            store.remove(THEME_KEY).unwrap();
        }
        let reopened = FileStore::open(&path);
        assert!(user_disconnected(&reopened));
        assert_eq!(reopened.get(THEME_KEY), None);
        let _ = fs::remove_file(&path);
    }
}
