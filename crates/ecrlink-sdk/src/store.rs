//! Persisted set of accepted device ids (a flat JSON array on disk).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use ecrlink_core::error::{EcrError, Result};

#[derive(Debug)]
pub struct DeviceStore {
    path: PathBuf,
    ids: Mutex<BTreeSet<String>>,
}

impl DeviceStore {
    /// Load `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ids = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| EcrError::Internal(format!("read {} failed: {e}", path.display())))?;
            if raw.trim().is_empty() {
                BTreeSet::new()
            } else {
                serde_json::from_str(&raw).map_err(|e| {
                    EcrError::Config(format!("invalid device store {}: {e}", path.display()))
                })?
            }
        } else {
            BTreeSet::new()
        };
        tracing::debug!(path = %path.display(), count = ids.len(), "device store loaded");
        Ok(Self {
            path,
            ids: Mutex::new(ids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true if the id was newly added.
    pub fn add(&self, id: &str) -> Result<bool> {
        let mut ids = self.ids.lock();
        if !ids.insert(id.to_string()) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &ids) {
            ids.remove(id);
            return Err(e);
        }
        Ok(true)
    }

    /// Returns true if the id was present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut ids = self.ids.lock();
        if !ids.remove(id) {
            return Ok(false);
        }
        if let Err(e) = persist(&self.path, &ids) {
            ids.insert(id.to_string());
            return Err(e);
        }
        Ok(true)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn list(&self) -> Vec<String> {
        self.ids.lock().iter().cloned().collect()
    }
}

/// Write to a sibling temp file, then rename over the target.
fn persist(path: &Path, ids: &BTreeSet<String>) -> Result<()> {
    let body = serde_json::to_vec_pretty(ids)
        .map_err(|e| EcrError::Internal(format!("encode device store failed: {e}")))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, body)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|e| EcrError::Internal(format!("write {} failed: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");

        let store = DeviceStore::open(&path).unwrap();
        assert!(store.add("AA:BB:CC:DD:EE:FF").unwrap());
        assert!(!store.add("AA:BB:CC:DD:EE:FF").unwrap());
        assert!(store.add("10.0.0.7").unwrap());
        drop(store);

        let store = DeviceStore::open(&path).unwrap();
        assert_eq!(store.list(), vec!["10.0.0.7", "AA:BB:CC:DD:EE:FF"]);
        assert!(store.remove("10.0.0.7").unwrap());
        assert!(!store.remove("10.0.0.7").unwrap());
        assert!(!store.contains("10.0.0.7"));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let store = DeviceStore::open(&path).unwrap();
        store.add("x").unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["devices.json"]);
    }

    #[test]
    fn corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        fs::write(&path, "{not json").unwrap();
        let err = DeviceStore::open(&path).unwrap_err();
        assert_eq!(err.kind().as_str(), "CONFIG");
    }
}
