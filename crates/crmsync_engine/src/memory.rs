//! In-memory adapters.
//!
//! [`MemoryRemote`] behaves like a CRM holding one module's records and
//! [`MemoryLocalStore`] like a personal-information store with change
//! notifications. Both are thread-safe and keep counters so tests can
//! assert on the calls the engine made.

use crate::clock::{Clock, SystemClock};
use crate::contact::{ContactFields, FieldList, RemoteContact, RemoteEntry};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalContact, LocalEvent, LocalItemId, LocalStore, Sensitivity, SyncMetadata};
use crate::remote::{AccessOperation, EntryListPage, ListQuery, RemoteAccess};
use crate::timestamp::{format_sync_timestamp, parse_sync_timestamp};
use chrono::{NaiveDateTime, TimeDelta};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// A record held by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// The record as the CRM lists it.
    #[serde(flatten)]
    pub contact: RemoteContact,
    /// Owning CRM user.
    #[serde(default)]
    pub assigned_user_id: String,
    /// Creation time; listings are ordered newest first.
    #[serde(default)]
    pub date_entered: String,
    /// Soft-deletion flag. Deleted records are never listed.
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug)]
struct RawRow {
    assigned_user_id: String,
    entry: RemoteEntry,
}

#[derive(Debug, Default)]
struct RemoteInner {
    records: Vec<RemoteRecord>,
    raw: Vec<RawRow>,
    denied: HashSet<AccessOperation>,
    fail_pushes: bool,
    fail_listing: bool,
    list_calls: usize,
    pushed: Vec<FieldList>,
    last_stamp: Option<NaiveDateTime>,
}

impl RemoteInner {
    /// Next modification stamp. Strictly increasing so that every write is
    /// visible as a change.
    fn stamp(&mut self, now: NaiveDateTime) -> String {
        let next = match self.last_stamp {
            Some(last) if now <= last => last + TimeDelta::seconds(1),
            _ => now,
        };
        self.last_stamp = Some(next);
        format_sync_timestamp(next)
    }

    fn observe(&mut self, value: &str) {
        if let Ok(at) = parse_sync_timestamp(value) {
            if self.last_stamp.is_none_or(|last| at > last) {
                self.last_stamp = Some(at);
            }
        }
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut RemoteRecord> {
        self.records.iter_mut().find(|r| r.contact.id == id)
    }
}

/// An in-memory CRM module.
pub struct MemoryRemote {
    user_id: String,
    clock: Arc<dyn Clock>,
    inner: Mutex<RemoteInner>,
}

impl MemoryRemote {
    /// Creates an empty remote authenticated as `user_id`.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::with_clock(user_id, Arc::new(SystemClock))
    }

    /// Creates an empty remote stamping records from `clock`.
    pub fn with_clock(user_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            user_id: user_id.into(),
            clock,
            inner: Mutex::new(RemoteInner::default()),
        }
    }

    /// Creates a remote holding `records`.
    pub fn from_records(user_id: impl Into<String>, records: Vec<RemoteRecord>) -> Self {
        let remote = Self::new(user_id);
        {
            let mut inner = remote.inner.lock();
            for record in &records {
                inner.observe(&record.contact.date_modified);
                inner.observe(&record.date_entered);
            }
            inner.records = records;
        }
        remote
    }

    /// The authenticated user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Adds a record owned by the authenticated user and returns its id.
    ///
    /// An empty id is replaced with a fresh one; an empty `date_modified`
    /// is stamped.
    pub fn insert_record(&self, contact: RemoteContact) -> String {
        self.insert_record_for(&self.user_id, contact)
    }

    /// Adds a record owned by `user_id` and returns its id.
    pub fn insert_record_for(&self, user_id: &str, mut contact: RemoteContact) -> String {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if contact.id.is_empty() {
            contact.id = uuid::Uuid::new_v4().to_string();
        }
        let date_entered = inner.stamp(now);
        if contact.date_modified.is_empty() {
            contact.date_modified = date_entered.clone();
        } else {
            inner.observe(&contact.date_modified);
        }
        let id = contact.id.clone();
        inner.records.push(RemoteRecord {
            contact,
            assigned_user_id: user_id.to_owned(),
            date_entered,
            deleted: false,
        });
        id
    }

    /// Edits a record's fields as a CRM user would. Returns false if the
    /// record does not exist.
    pub fn update_record(&self, id: &str, edit: impl FnOnce(&mut ContactFields)) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let stamp = inner.stamp(now);
        match inner.find_mut(id) {
            Some(record) => {
                edit(&mut record.contact.fields);
                record.contact.date_modified = stamp;
                true
            }
            None => false,
        }
    }

    /// Removes a record outright. Returns false if it did not exist.
    pub fn remove_record(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.records.len();
        inner.records.retain(|r| r.contact.id != id);
        inner.records.len() != before
    }

    /// Adds an unparsed entry owned by the authenticated user. Raw entries
    /// are listed after all records.
    pub fn insert_raw_entry(&self, raw: serde_json::Value) {
        self.inner.lock().raw.push(RawRow {
            assigned_user_id: self.user_id.clone(),
            entry: RemoteEntry::new(raw),
        });
    }

    /// Makes `check_access` refuse `operation`.
    pub fn deny(&self, operation: AccessOperation) {
        self.inner.lock().denied.insert(operation);
    }

    /// Lifts a denial.
    pub fn allow(&self, operation: AccessOperation) {
        self.inner.lock().denied.remove(&operation);
    }

    /// Makes every create-or-update call fail.
    pub fn set_fail_pushes(&self, fail: bool) {
        self.inner.lock().fail_pushes = fail;
    }

    /// Makes every listing call fail.
    pub fn set_fail_listing(&self, fail: bool) {
        self.inner.lock().fail_listing = fail;
    }

    /// Number of accepted create-or-update calls.
    pub fn push_calls(&self) -> usize {
        self.inner.lock().pushed.len()
    }

    /// Number of listing calls, failed ones included.
    pub fn list_calls(&self) -> usize {
        self.inner.lock().list_calls
    }

    /// Field lists of the accepted create-or-update calls, in order.
    pub fn pushed_field_lists(&self) -> Vec<FieldList> {
        self.inner.lock().pushed.clone()
    }

    /// Every record, deleted ones included.
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.inner.lock().records.clone()
    }

    /// Looks up a record by id.
    pub fn get(&self, id: &str) -> Option<RemoteRecord> {
        self.inner
            .lock()
            .records
            .iter()
            .find(|r| r.contact.id == id)
            .cloned()
    }
}

impl RemoteAccess for MemoryRemote {
    fn check_access(&self, _module: &str, operation: AccessOperation) -> SyncResult<bool> {
        Ok(!self.inner.lock().denied.contains(&operation))
    }

    fn list_records(&self, query: &ListQuery) -> SyncResult<EntryListPage> {
        let mut inner = self.inner.lock();
        inner.list_calls += 1;
        if inner.fail_listing {
            return Err(SyncError::remote_retryable("listing unavailable"));
        }

        let mut visible: Vec<&RemoteRecord> = inner
            .records
            .iter()
            .filter(|r| !r.deleted && r.assigned_user_id == query.assigned_user_id)
            .collect();
        // Stable, so records entered in the same second keep insertion order.
        visible.sort_by(|a, b| b.date_entered.cmp(&a.date_entered));

        let listing: Vec<RemoteEntry> = visible
            .into_iter()
            .map(|r| RemoteEntry::from_contact(&r.contact))
            .chain(
                inner
                    .raw
                    .iter()
                    .filter(|row| row.assigned_user_id == query.assigned_user_id)
                    .map(|row| row.entry.clone()),
            )
            .collect();

        let page: Vec<RemoteEntry> = listing
            .into_iter()
            .skip(query.offset as usize)
            .take(query.page_size.max(1) as usize)
            .collect();
        let next_offset = if page.is_empty() {
            0
        } else {
            query.offset + page.len() as u32
        };
        Ok(EntryListPage::new(page, next_offset))
    }

    fn create_or_update(&self, _module: &str, fields: &FieldList) -> SyncResult<String> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.fail_pushes {
            return Err(SyncError::remote_retryable("create_or_update rejected"));
        }
        inner.pushed.push(fields.clone());
        let stamp = inner.stamp(now);
        let deleted = fields.get("deleted") == Some("1");

        let id = match fields.get("id").filter(|id| !id.is_empty()) {
            Some(id) => id.to_owned(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        match inner.find_mut(&id) {
            Some(record) => {
                record.contact.fields.apply_field_list(fields);
                record.contact.date_modified = stamp;
                record.deleted |= deleted;
            }
            None => {
                let mut contact_fields = ContactFields::default();
                contact_fields.apply_field_list(fields);
                let owner = fields
                    .get("assigned_user_id")
                    .unwrap_or(self.user_id.as_str())
                    .to_owned();
                inner.records.push(RemoteRecord {
                    contact: RemoteContact {
                        id: id.clone(),
                        date_modified: stamp.clone(),
                        sync_contact: false,
                        fields: contact_fields,
                    },
                    assigned_user_id: owner,
                    date_entered: stamp,
                    deleted,
                });
            }
        }
        Ok(id)
    }

    fn current_user_id(&self) -> SyncResult<String> {
        Ok(self.user_id.clone())
    }
}

#[derive(Debug, Default)]
struct LocalInner {
    items: BTreeMap<LocalItemId, LocalContact>,
    saves: HashMap<LocalItemId, u64>,
    next_id: u64,
    fail_saves: bool,
    subscribers: Vec<Sender<LocalEvent>>,
}

impl LocalInner {
    fn allocate_id(&mut self) -> LocalItemId {
        loop {
            self.next_id += 1;
            let id = LocalItemId::new(format!("item-{}", self.next_id));
            if !self.items.contains_key(&id) {
                return id;
            }
        }
    }

    fn store(&mut self, item: LocalContact) {
        *self.saves.entry(item.id.clone()).or_default() += 1;
        self.items.insert(item.id.clone(), item);
    }

    fn emit(&mut self, event: LocalEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// An in-memory local store.
///
/// Every save, whether by the engine or through [`MemoryLocalStore::edit`],
/// is counted and notified to subscribers.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    inner: Mutex<LocalInner>,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `items`. Loading does not count as saving.
    pub fn from_items(items: Vec<LocalContact>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for item in items {
                inner.items.insert(item.id.clone(), item);
            }
        }
        store
    }

    /// Subscribes to add, change and remove notifications.
    pub fn subscribe(&self) -> Receiver<LocalEvent> {
        let (tx, rx) = mpsc::channel();
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// Creates an item as the user would.
    pub fn insert(&self, fields: ContactFields, sensitivity: Sensitivity) -> LocalContact {
        let mut inner = self.inner.lock();
        let mut item = LocalContact::new(inner.allocate_id(), fields);
        item.sensitivity = sensitivity;
        inner.store(item.clone());
        inner.emit(LocalEvent::Added(item.id.clone()));
        item
    }

    /// Edits and saves an item as the user would.
    pub fn edit(&self, id: &LocalItemId, edit: impl FnOnce(&mut LocalContact)) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        let mut item = inner
            .items
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::ItemNotFound(id.to_string()))?;
        edit(&mut item);
        item.id = id.clone();
        inner.store(item);
        inner.emit(LocalEvent::Changed(id.clone()));
        Ok(())
    }

    /// Deletes an item as the user would. Returns false if it did not
    /// exist.
    pub fn remove(&self, id: &LocalItemId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.items.remove(id).is_some();
        if removed {
            inner.emit(LocalEvent::Removed);
        }
        removed
    }

    /// Every item, ordered by id.
    pub fn items(&self) -> Vec<LocalContact> {
        self.inner.lock().items.values().cloned().collect()
    }

    /// Number of saves of one item, creation included.
    pub fn save_count(&self, id: &LocalItemId) -> u64 {
        self.inner.lock().saves.get(id).copied().unwrap_or(0)
    }

    /// Number of saves across all items.
    pub fn total_saves(&self) -> u64 {
        self.inner.lock().saves.values().sum()
    }

    /// Makes every engine save fail.
    pub fn set_fail_saves(&self, fail: bool) {
        self.inner.lock().fail_saves = fail;
    }
}

impl LocalStore for MemoryLocalStore {
    fn list_items(&self) -> SyncResult<Vec<LocalContact>> {
        Ok(self.items())
    }

    fn get_item(&self, id: &LocalItemId) -> SyncResult<Option<LocalContact>> {
        Ok(self.inner.lock().items.get(id).cloned())
    }

    fn create_item(
        &self,
        fields: ContactFields,
        metadata: SyncMetadata,
    ) -> SyncResult<LocalContact> {
        let mut inner = self.inner.lock();
        if inner.fail_saves {
            return Err(SyncError::LocalStore("store is read-only".into()));
        }
        let mut item = LocalContact::new(inner.allocate_id(), fields);
        item.metadata = metadata;
        inner.store(item.clone());
        inner.emit(LocalEvent::Added(item.id.clone()));
        Ok(item)
    }

    fn save_item(&self, item: &LocalContact) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if inner.fail_saves {
            return Err(SyncError::LocalStore("store is read-only".into()));
        }
        if !inner.items.contains_key(&item.id) {
            return Err(SyncError::ItemNotFound(item.id.to_string()));
        }
        inner.store(item.clone());
        inner.emit(LocalEvent::Changed(item.id.clone()));
        Ok(())
    }

    fn delete_item(&self, id: &LocalItemId) -> SyncResult<()> {
        let mut inner = self.inner.lock();
        if inner.items.remove(id).is_none() {
            return Err(SyncError::ItemNotFound(id.to_string()));
        }
        inner.emit(LocalEvent::Removed);
        Ok(())
    }
}
