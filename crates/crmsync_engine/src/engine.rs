//! The sync engine: shared state for the reconciliation and notification
//! paths.

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::contact::ContactFields;
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalStore, SyncMetadata};
use crate::remote::RemoteAccess;
use crate::state::SyncStateStore;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// What the engine is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// No pass has run yet.
    Idle,
    /// A reconciliation pass is in progress.
    Reconciling,
    /// The last pass completed.
    Synced,
    /// The last pass failed.
    Error,
}

impl EnginePhase {
    /// Returns true if a new pass may start.
    pub fn can_start_pass(&self) -> bool {
        !matches!(self, EnginePhase::Reconciling)
    }
}

/// Counters accumulated across passes and pushes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Reconciliation passes completed.
    pub passes_completed: u64,
    /// Remote records examined.
    pub records_pulled: u64,
    /// Local items created from remote records.
    pub items_created: u64,
    /// Local items overwritten from remote records.
    pub items_updated: u64,
    /// Local items deleted because their remote record vanished.
    pub items_deleted: u64,
    /// Successful pushes.
    pub pushes: u64,
    /// Rejected pushes.
    pub push_failures: u64,
    /// Records or items skipped because of an error.
    pub record_errors: u64,
    /// Completion time of the last pass.
    pub last_pass_time: Option<Instant>,
    /// Last fatal pass error.
    pub last_error: Option<String>,
}

/// Keeps one entity type consistent between a local store and the CRM.
///
/// The engine is driven from two sides: a scheduler calls
/// [`SyncEngine::reconcile`] periodically, and the local store's
/// notifications are fed to [`SyncEngine::handle_event`]. Both paths may
/// run at the same time; they share state only through the
/// [`SyncStateStore`].
pub struct SyncEngine<R: RemoteAccess, L: LocalStore> {
    pub(crate) config: SyncConfig,
    pub(crate) remote: R,
    pub(crate) local: L,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) states: SyncStateStore,
    phase: RwLock<EnginePhase>,
    pub(crate) stats: RwLock<SyncStats>,
    cancelled: AtomicBool,
    started: AtomicBool,
    current_view: AtomicBool,
    user_id: RwLock<Option<String>>,
}

impl<R: RemoteAccess, L: LocalStore> SyncEngine<R, L> {
    /// Creates an engine using the system clock.
    pub fn new(config: SyncConfig, remote: R, local: L) -> Self {
        Self::with_clock(config, remote, local, Arc::new(SystemClock))
    }

    /// Creates an engine with an explicit time source.
    pub fn with_clock(config: SyncConfig, remote: R, local: L, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            remote,
            local,
            clock,
            states: SyncStateStore::new(),
            phase: RwLock::new(EnginePhase::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            current_view: AtomicBool::new(true),
            user_id: RwLock::new(None),
        }
    }

    /// Rebuilds sync state from the metadata on every local item.
    ///
    /// Returns the number of items loaded. Calling it again discards the
    /// in-memory state and reloads it.
    ///
    /// An item carrying a remote id that an earlier item already holds is
    /// a copy. Its metadata is cleared so it syncs as a new contact.
    pub fn start(&self) -> SyncResult<usize> {
        let items = self.local.list_items()?;
        let loaded = items.len();
        let demoted = self.states.rebuild(&items);
        for mut item in items
            .into_iter()
            .filter(|item| demoted.contains(&item.id))
        {
            item.metadata = SyncMetadata::default();
            if let Err(err) = self.local.save_item(&item) {
                warn!(local_id = %item.id, error = %err, "cannot reset metadata of copied item");
            }
        }
        self.started.store(true, Ordering::SeqCst);
        info!(
            module = %self.config.entity.module,
            items = loaded,
            "loaded sync state from local store"
        );
        Ok(loaded)
    }

    pub(crate) fn ensure_started(&self) -> SyncResult<()> {
        if !self.started.load(Ordering::SeqCst) {
            self.start()?;
        }
        Ok(())
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The remote adapter.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// The local store adapter.
    pub fn local(&self) -> &L {
        &self.local
    }

    /// The sync state table.
    pub fn states(&self) -> &SyncStateStore {
        &self.states
    }

    /// Gets the current phase.
    pub fn phase(&self) -> EnginePhase {
        *self.phase.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Tells the engine whether the host is showing this entity type.
    pub fn set_current_view(&self, active: bool) {
        self.current_view.store(active, Ordering::SeqCst);
    }

    pub(crate) fn view_active(&self) -> bool {
        !self.config.require_current_view || self.current_view.load(Ordering::SeqCst)
    }

    /// Requests cancellation of the running pass.
    ///
    /// The flag stays set, so later passes also stop at their first page,
    /// until [`SyncEngine::reset_cancel`] is called.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn check_cancelled(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Moves to `Reconciling`, refusing if a pass is already running.
    pub(crate) fn begin_pass(&self) -> SyncResult<()> {
        let mut phase = self.phase.write();
        if !phase.can_start_pass() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *phase),
                to: "Reconciling".into(),
            });
        }
        *phase = EnginePhase::Reconciling;
        Ok(())
    }

    pub(crate) fn finish_pass(&self) {
        *self.phase.write() = EnginePhase::Synced;
        let mut stats = self.stats.write();
        stats.passes_completed += 1;
        stats.last_pass_time = Some(Instant::now());
        stats.last_error = None;
    }

    /// Handles a fatal pass error by updating phase and stats.
    pub(crate) fn fail_pass(&self, err: &SyncError) {
        *self.phase.write() = EnginePhase::Error;
        self.stats.write().last_error = Some(err.to_string());
        error!(module = %self.config.entity.module, error = %err, "reconciliation pass aborted");
    }

    /// The CRM user id, fetched once and cached.
    pub(crate) fn user_id(&self) -> SyncResult<String> {
        if let Some(id) = self.user_id.read().as_ref() {
            return Ok(id.clone());
        }
        let id = self.remote.current_user_id()?;
        *self.user_id.write() = Some(id.clone());
        Ok(id)
    }
}

/// Fingerprint of a contact's mapped fields.
///
/// The engine records it whenever local and remote agree, so that a save
/// which leaves the mapped fields untouched can be recognized as an echo.
pub(crate) fn content_digest(fields: &ContactFields) -> u64 {
    let mut hasher = DefaultHasher::new();
    fields.hash(&mut hasher);
    hasher.finish()
}
