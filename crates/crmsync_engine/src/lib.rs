//! # CRM Contact Sync Engine
//!
//! Keeps a user's contacts consistent between a local personal-information
//! store and a CRM backend.
//!
//! This crate provides:
//! - Sync state store linking local items to remote records
//! - Full reconciliation pass over the CRM's paged listing
//! - Incremental handling of local add, change and remove notifications
//! - Push projection of local items into CRM field lists
//! - A periodic scheduler and an event pump
//! - In-memory adapters for hosts and tests
//!
//! ## Architecture
//!
//! Two paths run against the same [`SyncStateStore`]:
//! 1. The reconciliation pass is remote-authoritative. It creates and
//!    refreshes local items from remote records, deletes local items whose
//!    remote record vanished, and pushes local items the CRM never saw.
//! 2. The incremental path is local-authoritative. It pushes user edits,
//!    telling them apart from the engine's own saves by content and by
//!    wall-clock windows.
//!
//! ## Key Invariants
//!
//! - At most one sync state per local item
//! - Non-empty remote ids are unique across sync states
//! - The two metadata properties on each local item are the only durable
//!   state; everything else is rebuilt at startup
//! - Sensitive items never leave the local side

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod contact;
mod deletion;
mod engine;
mod error;
mod events;
mod local;
mod memory;
mod push;
mod reconcile;
mod remote;
mod scheduler;
mod state;
mod timestamp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EchoWindows, EntityConfig, SyncConfig};
pub use contact::{ContactFields, FieldList, NameValue, RemoteContact, RemoteEntry, CONTACT_FIELDS};
pub use engine::{EnginePhase, SyncEngine, SyncStats};
pub use error::{SyncError, SyncResult};
pub use events::EventOutcome;
pub use local::{
    LocalContact, LocalEvent, LocalItemId, LocalStore, Sensitivity, SyncMetadata,
    SYNCED_MODIFIED_DATE_PROPERTY, SYNCED_REMOTE_ID_PROPERTY,
};
pub use memory::{MemoryLocalStore, MemoryRemote, RemoteRecord};
pub use push::{PushOutcome, PushSkip};
pub use reconcile::ReconcileReport;
pub use remote::{AccessOperation, EntryListPage, ListQuery, RemoteAccess};
pub use scheduler::{EventPump, SyncScheduler};
pub use state::{SyncState, SyncStateStore};
pub use timestamp::{format_sync_timestamp, parse_sync_timestamp, SYNC_TIMESTAMP_FORMAT};
