//! Cleanup after local deletions.

use crate::contact::FieldList;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::local::{LocalItemId, LocalStore};
use crate::remote::RemoteAccess;
use crate::state::SyncState;
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl<R: RemoteAccess, L: LocalStore> SyncEngine<R, L> {
    /// Drops the sync state of every local item that no longer exists.
    ///
    /// When the entity type propagates local deletions, the remote
    /// counterpart is marked deleted first; if that call fails the state is
    /// kept so a later sweep retries. With `check_sensitivity`, only items
    /// last seen as normal are deleted remotely.
    ///
    /// Returns the number of states dropped.
    pub fn remove_deleted_items(&self, check_sensitivity: bool) -> SyncResult<usize> {
        let present: HashSet<LocalItemId> = self
            .local
            .list_items()?
            .into_iter()
            .map(|item| item.id)
            .collect();

        let mut removed = 0;
        for state in self.states.snapshot_all() {
            if present.contains(&state.local_id) {
                continue;
            }
            if self.propagates_deletion(&state, check_sensitivity) {
                if let Err(err) = self.delete_remote(&state) {
                    warn!(
                        local_id = %state.local_id,
                        remote_id = %state.remote_entry_id,
                        error = %err,
                        "cannot delete remote record"
                    );
                    continue;
                }
            }
            self.states.remove(&state.local_id);
            removed += 1;
            debug!(local_id = %state.local_id, "dropped sync state of deleted item");
        }
        Ok(removed)
    }

    fn propagates_deletion(&self, state: &SyncState, check_sensitivity: bool) -> bool {
        let entity = &self.config.entity;
        entity.propagates_local_deletions
            && entity.sync_enabled
            && state.has_remote()
            && (!check_sensitivity || state.sensitivity.is_normal())
    }

    fn delete_remote(&self, state: &SyncState) -> SyncResult<()> {
        let mut fields = FieldList::new();
        fields.push("id", state.remote_entry_id.as_str());
        fields.push("deleted", "1");
        self.remote
            .create_or_update(&self.config.entity.module, &fields)?;
        info!(
            local_id = %state.local_id,
            remote_id = %state.remote_entry_id,
            "deleted remote record"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{EntityConfig, SyncConfig};
    use crate::contact::ContactFields;
    use crate::engine::SyncEngine;
    use crate::local::Sensitivity;
    use crate::memory::{MemoryLocalStore, MemoryRemote};

    fn engine(propagate: bool) -> SyncEngine<MemoryRemote, MemoryLocalStore> {
        let entity = EntityConfig::contacts().with_local_deletion_propagation(propagate);
        let engine = SyncEngine::new(
            SyncConfig::new(entity),
            MemoryRemote::new("user-1"),
            MemoryLocalStore::new(),
        );
        engine.start().unwrap();
        engine
    }

    fn pushed_item(
        engine: &SyncEngine<MemoryRemote, MemoryLocalStore>,
        last_name: &str,
    ) -> (crate::local::LocalItemId, String) {
        let fields = ContactFields {
            last_name: last_name.into(),
            ..Default::default()
        };
        let item = engine.local().insert(fields, Sensitivity::Normal);
        let outcome = engine.push(&item, None).unwrap();
        let crate::push::PushOutcome::Pushed { remote_id } = outcome else {
            panic!("expected a push");
        };
        (item.id, remote_id)
    }

    #[test]
    fn contacts_do_not_propagate() {
        let engine = engine(false);
        let (id, remote_id) = pushed_item(&engine, "Kay");
        engine.local().remove(&id);

        assert_eq!(engine.remove_deleted_items(true).unwrap(), 1);
        assert!(engine.states().is_empty());
        assert!(!engine.remote().get(&remote_id).unwrap().deleted);
    }

    #[test]
    fn propagating_entity_marks_remote_deleted() {
        let engine = engine(true);
        let (gone, gone_remote) = pushed_item(&engine, "Kay");
        let (_kept, kept_remote) = pushed_item(&engine, "Goldberg");
        engine.local().remove(&gone);

        assert_eq!(engine.remove_deleted_items(true).unwrap(), 1);
        assert!(engine.remote().get(&gone_remote).unwrap().deleted);
        assert!(!engine.remote().get(&kept_remote).unwrap().deleted);
        assert_eq!(engine.states().len(), 1);
    }

    #[test]
    fn sensitive_items_are_not_deleted_remotely() {
        let engine = engine(true);
        let (id, remote_id) = pushed_item(&engine, "Kay");
        engine.states().update(&id, |state| {
            state.sensitivity = Sensitivity::Private;
        });
        engine.local().remove(&id);

        assert_eq!(engine.remove_deleted_items(true).unwrap(), 1);
        assert!(!engine.remote().get(&remote_id).unwrap().deleted);
    }

    #[test]
    fn failed_remote_delete_keeps_state() {
        let engine = engine(true);
        let (id, _) = pushed_item(&engine, "Kay");
        engine.local().remove(&id);
        engine.remote().set_fail_pushes(true);

        assert_eq!(engine.remove_deleted_items(true).unwrap(), 0);
        assert_eq!(engine.states().len(), 1);

        engine.remote().set_fail_pushes(false);
        assert_eq!(engine.remove_deleted_items(true).unwrap(), 1);
    }
}
