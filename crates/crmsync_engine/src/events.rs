//! Incremental handling of local store notifications.

use crate::clock::elapsed_secs;
use crate::engine::{content_digest, SyncEngine};
use crate::local::{LocalContact, LocalEvent, LocalItemId, LocalStore};
use crate::push::PushOutcome;
use crate::remote::RemoteAccess;
use crate::state::SyncState;
use std::time::Duration;
use tracing::{debug, warn};

/// What the engine did with one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// The item was pushed; carries the remote id.
    Pushed(String),
    /// Sync state was recorded without pushing.
    Recorded,
    /// The notification was taken as an echo of the engine's own write.
    Suppressed,
    /// Nothing to do: unknown or sensitive item, inactive view, or sync
    /// disabled.
    Ignored,
    /// The push or a store access failed. The next pass retries.
    Failed,
    /// The deletion sweep ran and dropped this many sync states.
    Removed(usize),
}

impl<R: RemoteAccess, L: LocalStore> SyncEngine<R, L> {
    /// Reacts to one local store notification.
    ///
    /// Never fails; errors are logged and reported as
    /// [`EventOutcome::Failed`].
    pub fn handle_event(&self, event: &LocalEvent) -> EventOutcome {
        if let Err(err) = self.ensure_started() {
            warn!(error = %err, "cannot load sync state");
            return EventOutcome::Failed;
        }
        match event {
            LocalEvent::Added(id) => self.on_item_added(id),
            LocalEvent::Changed(id) => self.on_item_changed(id),
            LocalEvent::Removed => self.on_item_removed(),
        }
    }

    fn on_item_added(&self, id: &LocalItemId) -> EventOutcome {
        if !self.view_active() {
            return EventOutcome::Ignored;
        }
        let Some(item) = self.read_item(id) else {
            return EventOutcome::Failed;
        };
        let Some(item) = item else {
            return EventOutcome::Ignored;
        };

        let existing = self.states.lookup_by_local_id(id);
        if existing.as_ref().is_some_and(|state| is_echo(state, &item)) {
            debug!(local_id = %id, "add notification for an item already in sync");
            return EventOutcome::Suppressed;
        }

        if !item.sensitivity.is_normal() {
            let mut state = SyncState::unsynced(id.clone());
            state.last_synced = Some(self.clock.now());
            state.sensitivity = item.sensitivity;
            return match self.states.insert(state) {
                Ok(_) => EventOutcome::Recorded,
                Err(err) => {
                    warn!(local_id = %id, error = %err, "cannot record sync state");
                    EventOutcome::Failed
                }
            };
        }

        // An item written by the pass already carries its remote id; push
        // it as an update so no duplicate is created.
        let remote_id = item
            .metadata
            .remote_id()
            .map(str::to_owned)
            .or_else(|| existing.filter(SyncState::has_remote).map(|s| s.remote_entry_id));
        self.push_for_event(&item, remote_id.as_deref())
    }

    fn on_item_changed(&self, id: &LocalItemId) -> EventOutcome {
        let Some(state) = self.states.lookup_by_local_id(id) else {
            warn!(local_id = %id, "change notification for an item without sync state");
            return EventOutcome::Ignored;
        };
        let Some(item) = self.read_item(id) else {
            return EventOutcome::Failed;
        };
        let Some(item) = item else {
            return EventOutcome::Ignored;
        };

        if is_echo(&state, &item) {
            debug!(local_id = %id, "change notification matches last synced content");
            return EventOutcome::Suppressed;
        }

        let now = self.clock.now();
        let windows = self.config.echo;
        let normal = item.sensitivity.is_normal();
        let view_active = self.view_active();
        let should_push = self.states.update(id, |state| {
            let elapsed = state.last_synced.map(|at| elapsed_secs(at, now));
            let exceeds = |window: Duration| elapsed.is_none_or(|secs| secs > window.as_secs());

            state.sensitivity = item.sensitivity;
            if exceeds(windows.settle) {
                state.update_pending = 0;
            }
            if exceeds(windows.debounce) && state.update_pending == 0 {
                state.last_synced = Some(now);
                state.update_pending += 1;
            }
            if state.update_pending == 1 && normal && view_active {
                state.update_pending += 1;
                true
            } else {
                false
            }
        });

        match should_push {
            Some(true) => {
                let remote_id = item
                    .metadata
                    .remote_id()
                    .map(str::to_owned)
                    .or_else(|| state.has_remote().then(|| state.remote_entry_id.clone()));
                self.push_for_event(&item, remote_id.as_deref())
            }
            Some(false) if normal && view_active => {
                debug!(local_id = %id, "change inside echo window, not pushing");
                EventOutcome::Suppressed
            }
            _ => EventOutcome::Ignored,
        }
    }

    fn on_item_removed(&self) -> EventOutcome {
        match self.remove_deleted_items(true) {
            Ok(removed) => EventOutcome::Removed(removed),
            Err(err) => {
                warn!(error = %err, "deletion sweep failed");
                EventOutcome::Failed
            }
        }
    }

    /// `None` if the store failed, `Some(None)` if the item is gone.
    fn read_item(&self, id: &LocalItemId) -> Option<Option<LocalContact>> {
        match self.local.get_item(id) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(local_id = %id, error = %err, "cannot read local item");
                None
            }
        }
    }

    fn push_for_event(&self, item: &LocalContact, remote_id: Option<&str>) -> EventOutcome {
        match self.push(item, remote_id) {
            Ok(PushOutcome::Pushed { remote_id }) => EventOutcome::Pushed(remote_id),
            Ok(PushOutcome::Skipped(_)) => EventOutcome::Ignored,
            Err(_) => EventOutcome::Failed,
        }
    }
}

/// True when the item's mapped fields and sensitivity are what the engine
/// last wrote or read.
fn is_echo(state: &SyncState, item: &LocalContact) -> bool {
    state.has_remote()
        && state.sensitivity == item.sensitivity
        && state.content_digest == Some(content_digest(&item.fields))
}
