//! Local store abstraction.
//!
//! The local store is the personal-information store the user edits
//! directly. The engine reads and writes contact items through
//! [`LocalStore`] and reacts to the [`LocalEvent`] notifications the store
//! delivers.

use crate::contact::ContactFields;
use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the metadata property holding the last synchronized timestamp.
pub const SYNCED_MODIFIED_DATE_PROPERTY: &str = "SyncedModifiedDate";

/// Name of the metadata property holding the remote identity.
pub const SYNCED_REMOTE_ID_PROPERTY: &str = "SyncedRemoteId";

/// Stable identity of a local item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalItemId(String);

impl LocalItemId {
    /// Wraps a store-assigned identity.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Visibility of a local item. Only `Normal` items leave the local side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// Ordinary item.
    #[default]
    Normal,
    /// Personal item.
    Personal,
    /// Private item.
    Private,
    /// Confidential item.
    Confidential,
}

impl Sensitivity {
    /// Returns true for `Normal`.
    pub fn is_normal(&self) -> bool {
        matches!(self, Sensitivity::Normal)
    }
}

/// The two custom properties the engine persists on each local item.
///
/// These are the engine's only durable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Remote `date_modified` as of the last reconciliation, or local save
    /// time as of the last push.
    #[serde(
        rename = "SyncedModifiedDate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub synced_modified_date: Option<String>,
    /// Remote identity.
    #[serde(
        rename = "SyncedRemoteId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub synced_remote_id: Option<String>,
}

impl SyncMetadata {
    /// Metadata of an item matched to `remote_id` at `modified`.
    pub fn synced(modified: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            synced_modified_date: Some(modified.into()),
            synced_remote_id: Some(remote_id.into()),
        }
    }

    /// Returns true if the item carries a non-empty synchronized timestamp.
    pub fn has_synced_timestamp(&self) -> bool {
        self.synced_modified_date
            .as_deref()
            .is_some_and(|value| !value.trim().is_empty())
    }

    /// The remote identity, if non-empty.
    pub fn remote_id(&self) -> Option<&str> {
        self.synced_remote_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
    }
}

/// A contact item as held by the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalContact {
    /// Store-assigned identity.
    pub id: LocalItemId,
    /// Mapped attributes.
    #[serde(default)]
    pub fields: ContactFields,
    /// Visibility.
    #[serde(default)]
    pub sensitivity: Sensitivity,
    /// Engine metadata.
    #[serde(default)]
    pub metadata: SyncMetadata,
}

impl LocalContact {
    /// Creates a normal, never-synced item.
    pub fn new(id: LocalItemId, fields: ContactFields) -> Self {
        Self {
            id,
            fields,
            sensitivity: Sensitivity::Normal,
            metadata: SyncMetadata::default(),
        }
    }
}

/// Notifications delivered by the local store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    /// An item was created.
    Added(LocalItemId),
    /// An item was saved.
    Changed(LocalItemId),
    /// Some item was removed. The store does not say which.
    Removed,
}

/// Access to the local store.
///
/// Implementations must be safe to call from the reconciliation pass and
/// the notification path at the same time.
pub trait LocalStore: Send + Sync {
    /// Enumerates all items of the synchronized type.
    fn list_items(&self) -> SyncResult<Vec<LocalContact>>;

    /// Reads one item.
    fn get_item(&self, id: &LocalItemId) -> SyncResult<Option<LocalContact>>;

    /// Creates and saves a new normal item.
    fn create_item(&self, fields: ContactFields, metadata: SyncMetadata)
        -> SyncResult<LocalContact>;

    /// Saves an existing item, fields and metadata together.
    fn save_item(&self, item: &LocalContact) -> SyncResult<()>;

    /// Deletes an item.
    fn delete_item(&self, id: &LocalItemId) -> SyncResult<()>;
}
