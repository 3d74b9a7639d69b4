//! Preferences in NVS flash, one namespace per app.

use espfw_core::{PreferenceStore, PrefsError};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
use std::sync::Mutex;

/// NVS string values are read into a buffer of this size.
const MAX_STRING: usize = 256;

pub struct NvsPreferences {
    nvs: Mutex<EspNvs<NvsDefault>>,
}

impl NvsPreferences {
    /// Open (or create) `namespace` on the default partition.
    pub fn open(partition: EspDefaultNvsPartition, namespace: &str) -> Result<Self, PrefsError> {
        let nvs = EspNvs::new(partition, namespace, true)
            .map_err(|e| PrefsError::StorageUnavailable(e.to_string()))?;
        Ok(Self {
            nvs: Mutex::new(nvs),
        })
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&mut EspNvs<NvsDefault>) -> Result<T, PrefsError>,
    ) -> Result<T, PrefsError> {
        let mut nvs = self
            .nvs
            .lock()
            .map_err(|_| PrefsError::StorageUnavailable("lock poisoned".to_string()))?;
        f(&mut nvs)
    }
}

impl PreferenceStore for NvsPreferences {
    fn contains(&self, key: &str) -> bool {
        self.with(|nvs| {
            nvs.contains(key)
                .map_err(|e| PrefsError::ReadError(e.to_string()))
        })
        .unwrap_or(false)
    }

    fn get_i32(&self, key: &str) -> Result<i32, PrefsError> {
        self.with(|nvs| {
            nvs.get_i32(key)
                .map_err(|_| PrefsError::WrongType(key.to_string()))?
                .ok_or_else(|| PrefsError::NotFound(key.to_string()))
        })
    }

    fn set_i32(&self, key: &str, value: i32) -> Result<(), PrefsError> {
        self.with(|nvs| {
            nvs.set_i32(key, value)
                .map_err(|e| PrefsError::WriteError(e.to_string()))
        })
    }

    fn get_string(&self, key: &str) -> Result<String, PrefsError> {
        self.with(|nvs| {
            let mut buf = [0u8; MAX_STRING];
            nvs.get_str(key, &mut buf)
                .map_err(|_| PrefsError::WrongType(key.to_string()))?
                .map(str::to_string)
                .ok_or_else(|| PrefsError::NotFound(key.to_string()))
        })
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), PrefsError> {
        self.with(|nvs| {
            nvs.set_str(key, value)
                .map_err(|e| PrefsError::WriteError(e.to_string()))
        })
    }

    fn remove(&self, key: &str) -> Result<(), PrefsError> {
        self.with(|nvs| {
            nvs.remove(key)
                .map(|_| ())
                .map_err(|e| PrefsError::WriteError(e.to_string()))
        })
    }
}
