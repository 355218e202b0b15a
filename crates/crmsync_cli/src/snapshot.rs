//! JSON snapshot files standing in for the two stores.
//!
//! A local snapshot holds the contact items of the personal-information
//! store, metadata properties included. A remote snapshot holds the CRM
//! user and its records.

use crmsync_engine::{LocalContact, MemoryLocalStore, MemoryRemote, RemoteRecord};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Contents of a local snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LocalSnapshot {
    /// Contact items.
    #[serde(default)]
    pub items: Vec<LocalContact>,
}

/// Contents of a remote snapshot file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    /// The authenticated CRM user.
    #[serde(default)]
    pub user_id: String,
    /// Records of the synchronized module.
    #[serde(default)]
    pub records: Vec<RemoteRecord>,
}

/// Reads a local snapshot. A missing file is an empty store.
pub fn load_local(path: &Path) -> Result<LocalSnapshot, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(LocalSnapshot::default());
    }
    let data = fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&data)
        .map_err(|e| format!("invalid local snapshot {}: {}", path.display(), e))?;
    Ok(snapshot)
}

/// Reads a remote snapshot.
pub fn load_remote(path: &Path) -> Result<RemoteSnapshot, Box<dyn std::error::Error>> {
    let data = fs::read_to_string(path)
        .map_err(|e| format!("cannot read remote snapshot {}: {}", path.display(), e))?;
    let snapshot = serde_json::from_str(&data)
        .map_err(|e| format!("invalid remote snapshot {}: {}", path.display(), e))?;
    Ok(snapshot)
}

/// Writes a snapshot through a temporary file so a failed write leaves
/// the previous contents in place.
pub fn save<T: Serialize>(path: &Path, snapshot: &T) -> Result<(), Box<dyn std::error::Error>> {
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl LocalSnapshot {
    /// Loads the items into an in-memory store.
    pub fn into_store(self) -> MemoryLocalStore {
        MemoryLocalStore::from_items(self.items)
    }

    /// Captures the items of a store.
    pub fn from_store(store: &MemoryLocalStore) -> Self {
        Self {
            items: store.items(),
        }
    }
}

impl RemoteSnapshot {
    /// Loads the records into an in-memory remote, authenticated as
    /// `user_id` unless overridden.
    pub fn into_remote(self, user_override: Option<&str>) -> MemoryRemote {
        let user = user_override.map_or(self.user_id, str::to_owned);
        MemoryRemote::from_records(user, self.records)
    }

    /// Captures the records of a remote.
    pub fn from_remote(remote: &MemoryRemote) -> Self {
        Self {
            user_id: remote.user_id().to_owned(),
            records: remote.records(),
        }
    }
}
