//! Persistent preferences.
//!
//! This module provides a key/value storage trait that can be implemented
//! differently on each platform:
//! - Linux: JSON file ([`FilePreferences`])
//! - ESP32: NVS namespace (`NvsPreferences` in `espfw-esp32`)
//!
//! [`AppPreferences`] holds the handful of values the framework persists
//! across reboots.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Key holding the app instance ID. Its presence marks stored preferences.
pub const KEY_INSTANCE_ID: &str = "appInstanceID";
pub const KEY_VOLUME: &str = "Volume";
pub const KEY_BOOT_COUNT: &str = "BootCount";
pub const KEY_FRIENDLY_NAME: &str = "FriendlyName";

/// Longest friendly name kept, in bytes.
pub const FRIENDLY_NAME_MAX: usize = 100;

/// Errors that can occur during preference operations.
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    /// The requested key was not found.
    #[error("Preference not found: {0}")]
    NotFound(String),
    /// The stored value has a different type.
    #[error("Preference {0} has the wrong type")]
    WrongType(String),
    /// Failed to read preferences.
    #[error("Read error: {0}")]
    ReadError(String),
    /// Failed to write preferences.
    #[error("Write error: {0}")]
    WriteError(String),
    /// Storage is not available.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Abstract key/value preference storage.
///
/// All methods are synchronous to support embedded platforms.
pub trait PreferenceStore: Send + Sync {
    /// Check if a key exists.
    fn contains(&self, key: &str) -> bool;

    /// Load an integer value.
    fn get_i32(&self, key: &str) -> Result<i32, PrefsError>;

    /// Save an integer value.
    fn set_i32(&self, key: &str, value: i32) -> Result<(), PrefsError>;

    /// Load a string value.
    fn get_string(&self, key: &str) -> Result<String, PrefsError>;

    /// Save a string value.
    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError>;

    /// Delete a key.
    fn remove(&self, key: &str) -> Result<(), PrefsError>;
}

/// A stored preference value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrefValue {
    Int(i32),
    Str(String),
}

/// In-memory preferences, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    data: RwLock<HashMap<String, PrefValue>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read_int(data: &HashMap<String, PrefValue>, key: &str) -> Result<i32, PrefsError> {
    match data.get(key) {
        Some(PrefValue::Int(v)) => Ok(*v),
        Some(PrefValue::Str(_)) => Err(PrefsError::WrongType(key.to_string())),
        None => Err(PrefsError::NotFound(key.to_string())),
    }
}

fn read_str(data: &HashMap<String, PrefValue>, key: &str) -> Result<String, PrefsError> {
    match data.get(key) {
        Some(PrefValue::Str(v)) => Ok(v.clone()),
        Some(PrefValue::Int(_)) => Err(PrefsError::WrongType(key.to_string())),
        None => Err(PrefsError::NotFound(key.to_string())),
    }
}

impl PreferenceStore for MemoryPreferences {
    fn contains(&self, key: &str) -> bool {
        self.data
            .read()
            .map(|d| d.contains_key(key))
            .unwrap_or(false)
    }

    fn get_i32(&self, key: &str) -> Result<i32, PrefsError> {
        let data = self
            .data
            .read()
            .map_err(|_| PrefsError::ReadError("lock poisoned".to_string()))?;
        read_int(&data, key)
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<(), PrefsError> {
        self.data
            .write()
            .map_err(|_| PrefsError::WriteError("lock poisoned".to_string()))?
            .insert(key.to_string(), PrefValue::Int(value));
        Ok(())
    }

    fn get_string(&self, key: &str) -> Result<String, PrefsError> {
        let data = self
            .data
            .read()
            .map_err(|_| PrefsError::ReadError("lock poisoned".to_string()))?;
        read_str(&data, key)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.data
            .write()
            .map_err(|_| PrefsError::WriteError("lock poisoned".to_string()))?
            .insert(key.to_string(), PrefValue::Str(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.data
            .write()
            .map_err(|_| PrefsError::WriteError("lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Preferences persisted to a JSON file, written through on every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    data: RwLock<HashMap<String, PrefValue>>,
}

impl FilePreferences {
    /// Open the preference file, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PrefsError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json)
                .map_err(|e| PrefsError::ReadError(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preference file at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(PrefsError::StorageUnavailable(e.to_string())),
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    fn update<F>(&self, f: F) -> Result<(), PrefsError>
    where
        F: FnOnce(&mut HashMap<String, PrefValue>),
    {
        let mut data = self
            .data
            .write()
            .map_err(|_| PrefsError::WriteError("lock poisoned".to_string()))?;
        f(&mut data);
        let json =
            serde_json::to_string_pretty(&*data).map_err(|e| PrefsError::WriteError(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefsError::WriteError(e.to_string()))?;
        }
        std::fs::write(&self.path, json).map_err(|e| PrefsError::WriteError(e.to_string()))
    }
}

impl PreferenceStore for FilePreferences {
    fn contains(&self, key: &str) -> bool {
        self.data
            .read()
            .map(|d| d.contains_key(key))
            .unwrap_or(false)
    }

    fn get_i32(&self, key: &str) -> Result<i32, PrefsError> {
        let data = self
            .data
            .read()
            .map_err(|_| PrefsError::ReadError("lock poisoned".to_string()))?;
        read_int(&data, key)
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<(), PrefsError> {
        self.update(|d| {
            d.insert(key.to_string(), PrefValue::Int(value));
        })
    }

    fn get_string(&self, key: &str) -> Result<String, PrefsError> {
        let data = self
            .data
            .read()
            .map_err(|_| PrefsError::ReadError("lock poisoned".to_string()))?;
        read_str(&data, key)
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.update(|d| {
            d.insert(key.to_string(), PrefValue::Str(value.to_string()));
        })
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.update(|d| {
            d.remove(key);
        })
    }
}

/// Values the framework persists across reboots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppPreferences {
    /// Instance number among devices running the same app; -1 until claimed.
    pub app_instance_id: i32,
    /// Output volume in percent.
    pub volume: i32,
    /// Number of boots recorded.
    pub boot_count: i32,
    /// Human readable device name.
    pub friendly_name: String,
}

impl Default for AppPreferences {
    fn default() -> Self {
        Self {
            app_instance_id: -1,
            volume: 50,
            boot_count: 0,
            friendly_name: "NoNameSet".to_string(),
        }
    }
}

impl AppPreferences {
    /// Whether an instance ID has been claimed.
    pub fn has_instance_id(&self) -> bool {
        self.app_instance_id >= 0
    }

    /// Load stored preferences.
    ///
    /// Values are only read when the instance ID key exists; otherwise the
    /// defaults are returned unchanged.
    pub fn load<S: PreferenceStore + ?Sized>(store: &S) -> Result<Self, PrefsError> {
        let mut prefs = Self::default();
        if !store.contains(KEY_INSTANCE_ID) {
            warn!("Could not find Preferences!");
            info!("appInstanceID not set yet!");
            return Ok(prefs);
        }

        info!("Loading settings.");
        prefs.app_instance_id = store.get_i32(KEY_INSTANCE_ID)?;
        prefs.volume = store.get_i32(KEY_VOLUME).unwrap_or(prefs.volume);
        prefs.boot_count = store.get_i32(KEY_BOOT_COUNT).unwrap_or(0);
        if let Ok(name) = store.get_string(KEY_FRIENDLY_NAME) {
            prefs.friendly_name = truncate_name(&name);
        }
        Ok(prefs)
    }

    /// Write all values to the store.
    pub fn store<S: PreferenceStore + ?Sized>(&self, store: &S) -> Result<(), PrefsError> {
        info!("Storing Preferences.");
        store.set_i32(KEY_INSTANCE_ID, self.app_instance_id)?;
        store.set_i32(KEY_VOLUME, self.volume)?;
        store.set_i32(KEY_BOOT_COUNT, self.boot_count)?;
        store.set_string(KEY_FRIENDLY_NAME, &truncate_name(&self.friendly_name))?;
        Ok(())
    }

    /// Set the friendly name, truncated to [`FRIENDLY_NAME_MAX`] bytes.
    pub fn set_friendly_name(&mut self, name: &str) {
        self.friendly_name = truncate_name(name);
    }
}

fn truncate_name(name: &str) -> String {
    if name.len() <= FRIENDLY_NAME_MAX {
        return name.to_string();
    }
    let mut end = FRIENDLY_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_load_without_instance_id_keeps_defaults() {
        let store = MemoryPreferences::new();
        store.set_i32(KEY_VOLUME, 80).unwrap();

        let prefs = AppPreferences::load(&store).unwrap();
        assert_eq!(prefs, AppPreferences::default());
        assert!(!prefs.has_instance_id());
    }

    #[test]
    fn test_store_and_load() {
        let store = MemoryPreferences::new();
        let prefs = AppPreferences {
            app_instance_id: 3,
            volume: 70,
            boot_count: 12,
            friendly_name: "Front Door".to_string(),
        };
        prefs.store(&store).unwrap();

        let loaded = AppPreferences::load(&store).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryPreferences::new();
        store.set_string(KEY_INSTANCE_ID, "three").unwrap();
        assert!(matches!(
            AppPreferences::load(&store),
            Err(PrefsError::WrongType(_))
        ));
    }

    #[test]
    fn test_friendly_name_truncated() {
        let mut prefs = AppPreferences::default();
        prefs.set_friendly_name(&"é".repeat(80));
        assert!(prefs.friendly_name.len() <= FRIENDLY_NAME_MAX);
        assert_eq!(prefs.friendly_name.chars().count(), 50);
    }

    #[test]
    fn test_file_preferences_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nvs").join("prefs.json");

        {
            let store = FilePreferences::open(&path).unwrap();
            store.set_i32(KEY_INSTANCE_ID, 1).unwrap();
            store.set_string(KEY_FRIENDLY_NAME, "garage").unwrap();
        }

        let store = FilePreferences::open(&path).unwrap();
        assert!(store.contains(KEY_INSTANCE_ID));
        assert_eq!(store.get_i32(KEY_INSTANCE_ID).unwrap(), 1);
        assert_eq!(store.get_string(KEY_FRIENDLY_NAME).unwrap(), "garage");

        store.remove(KEY_INSTANCE_ID).unwrap();
        let reopened = FilePreferences::open(&path).unwrap();
        assert!(!reopened.contains(KEY_INSTANCE_ID));
    }
}
