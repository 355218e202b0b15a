//! Per-item synchronization state.

use crate::error::{SyncError, SyncResult};
use crate::local::{LocalContact, LocalItemId, Sensitivity};
use crate::timestamp::parse_sync_timestamp;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

/// Correlation record linking one local item to its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Local item identity. The store owns the item.
    pub local_id: LocalItemId,
    /// Remote identity. Empty until the item is pushed or matched.
    pub remote_entry_id: String,
    /// Remote `date_modified` at the last reconciliation, or save time at
    /// the last push. Also the debounce anchor.
    pub last_synced: Option<NaiveDateTime>,
    /// Guard against the engine's own save notifications.
    pub update_pending: u8,
    /// Visibility of the item when last observed.
    pub sensitivity: Sensitivity,
    /// Fingerprint of the mapped fields when local and remote last agreed.
    /// Unknown after a restart.
    pub content_digest: Option<u64>,
}

impl SyncState {
    /// State for an item the engine has never pushed or matched.
    pub fn unsynced(local_id: LocalItemId) -> Self {
        Self {
            local_id,
            remote_entry_id: String::new(),
            last_synced: None,
            update_pending: 0,
            sensitivity: Sensitivity::Normal,
            content_digest: None,
        }
    }

    /// State for an item matched to `remote_entry_id` at `last_synced`.
    pub fn synced(
        local_id: LocalItemId,
        remote_entry_id: impl Into<String>,
        last_synced: NaiveDateTime,
    ) -> Self {
        Self {
            local_id,
            remote_entry_id: remote_entry_id.into(),
            last_synced: Some(last_synced),
            update_pending: 0,
            sensitivity: Sensitivity::Normal,
            content_digest: None,
        }
    }

    /// Rebuilds state from an item's persisted metadata.
    ///
    /// An unparseable timestamp leaves the item unsynced but keeps its
    /// remote id.
    pub fn from_item(item: &LocalContact) -> Self {
        let last_synced = item
            .metadata
            .synced_modified_date
            .as_deref()
            .and_then(|value| parse_sync_timestamp(value).ok());
        Self {
            local_id: item.id.clone(),
            remote_entry_id: item.metadata.remote_id().unwrap_or_default().to_owned(),
            last_synced,
            update_pending: 0,
            sensitivity: item.sensitivity,
            content_digest: None,
        }
    }

    /// Returns true once the item has a remote counterpart.
    pub fn has_remote(&self) -> bool {
        !self.remote_entry_id.is_empty()
    }
}

/// The in-memory table of sync states, keyed by local identity with an
/// index on remote identity.
///
/// Every access goes through one mutex, so the reconciliation pass and the
/// notification path never observe a half-applied change. Iteration uses
/// [`SyncStateStore::snapshot_all`], never a live view.
#[derive(Debug, Default)]
pub struct SyncStateStore {
    table: Mutex<StateTable>,
}

#[derive(Debug, Default)]
struct StateTable {
    by_local: HashMap<LocalItemId, SyncState>,
    by_remote: HashMap<String, LocalItemId>,
}

impl StateTable {
    fn unindex(&mut self, state: &SyncState) {
        if state.has_remote()
            && self.by_remote.get(&state.remote_entry_id) == Some(&state.local_id)
        {
            self.by_remote.remove(&state.remote_entry_id);
        }
    }

    fn index(&mut self, state: &SyncState) {
        if state.has_remote() {
            self.by_remote
                .insert(state.remote_entry_id.clone(), state.local_id.clone());
        }
    }

    fn owner_of(&self, remote_id: &str) -> Option<&LocalItemId> {
        if remote_id.is_empty() {
            return None;
        }
        self.by_remote.get(remote_id)
    }
}

impl SyncStateStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with one state per local item.
    ///
    /// A remote id carried by more than one item (a copied contact keeps
    /// its properties) stays with the first item. The others are loaded
    /// unsynced and returned so the caller can reset their metadata.
    pub fn rebuild(&self, items: &[LocalContact]) -> Vec<LocalItemId> {
        let mut table = self.table.lock();
        table.by_local.clear();
        table.by_remote.clear();

        let mut demoted = Vec::new();
        for item in items {
            let mut state = SyncState::from_item(item);
            if let Some(owner) = table.owner_of(&state.remote_entry_id) {
                warn!(
                    local_id = %item.id,
                    owner = %owner,
                    remote_id = %state.remote_entry_id,
                    "remote id already claimed, loading item as unsynced"
                );
                state = SyncState::unsynced(item.id.clone());
                state.sensitivity = item.sensitivity;
                demoted.push(item.id.clone());
            }
            table.index(&state);
            table.by_local.insert(item.id.clone(), state);
        }
        demoted
    }

    /// Looks up a state by local identity.
    pub fn lookup_by_local_id(&self, local_id: &LocalItemId) -> Option<SyncState> {
        self.table.lock().by_local.get(local_id).cloned()
    }

    /// Looks up a state by remote identity. Empty ids never match.
    pub fn lookup_by_remote_id(&self, remote_id: &str) -> Option<SyncState> {
        let table = self.table.lock();
        let local_id = table.owner_of(remote_id)?;
        table.by_local.get(local_id).cloned()
    }

    /// Inserts or replaces the state for `state.local_id`.
    ///
    /// Fails if another local item already holds the same non-empty
    /// remote id.
    pub fn insert(&self, state: SyncState) -> SyncResult<Option<SyncState>> {
        let mut table = self.table.lock();
        if let Some(owner) = table.owner_of(&state.remote_entry_id) {
            if *owner != state.local_id {
                return Err(SyncError::DuplicateRemoteId {
                    remote_id: state.remote_entry_id.clone(),
                    existing: owner.to_string(),
                });
            }
        }
        let previous = table.by_local.remove(&state.local_id);
        if let Some(previous) = &previous {
            table.unindex(previous);
        }
        table.index(&state);
        table.by_local.insert(state.local_id.clone(), state);
        Ok(previous)
    }

    /// Applies `f` to the state for `local_id` under the lock.
    pub fn update<R>(
        &self,
        local_id: &LocalItemId,
        f: impl FnOnce(&mut SyncState) -> R,
    ) -> Option<R> {
        let mut table = self.table.lock();
        let state = table.by_local.get_mut(local_id)?;
        let before = state.remote_entry_id.clone();
        let result = f(state);
        if state.remote_entry_id != before {
            let after = state.clone();
            if !before.is_empty() && table.by_remote.get(&before) == Some(local_id) {
                table.by_remote.remove(&before);
            }
            table.index(&after);
        }
        Some(result)
    }

    /// Removes the state for `local_id`.
    pub fn remove(&self, local_id: &LocalItemId) -> Option<SyncState> {
        let mut table = self.table.lock();
        let removed = table.by_local.remove(local_id)?;
        table.unindex(&removed);
        Some(removed)
    }

    /// Returns a copy of every state.
    pub fn snapshot_all(&self) -> Vec<SyncState> {
        self.table.lock().by_local.values().cloned().collect()
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.table.lock().by_local.len()
    }

    /// Returns true if there are no states.
    pub fn is_empty(&self) -> bool {
        self.table.lock().by_local.is_empty()
    }
}
