//! Pushing local items to the remote side.

use crate::engine::{content_digest, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalContact, LocalStore, SyncMetadata};
use crate::remote::RemoteAccess;
use crate::state::SyncState;
use crate::timestamp::format_sync_timestamp;
use tracing::{debug, error, info, warn};

/// Why a push was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushSkip {
    /// Syncing is administratively disabled for the entity type.
    SyncDisabled,
    /// The item is not of normal sensitivity.
    NotNormal,
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The remote side accepted the item under this id.
    Pushed {
        /// Remote identity returned by the create or update.
        remote_id: String,
    },
    /// The item was not sent.
    Skipped(PushSkip),
}

impl<R: RemoteAccess, L: LocalStore> SyncEngine<R, L> {
    /// Sends `item` to the remote side.
    ///
    /// With a non-empty `remote_id` the remote record is updated, otherwise
    /// a record owned by the current user is created. On success the
    /// item's metadata is rewritten and its sync state upserted. On failure
    /// nothing local changes; the failure is logged and counted here.
    pub fn push(&self, item: &LocalContact, remote_id: Option<&str>) -> SyncResult<PushOutcome> {
        if !self.config.entity.sync_enabled {
            debug!(local_id = %item.id, "sync disabled, not pushing");
            return Ok(PushOutcome::Skipped(PushSkip::SyncDisabled));
        }
        if !item.sensitivity.is_normal() {
            debug!(local_id = %item.id, sensitivity = ?item.sensitivity, "not pushing sensitive item");
            return Ok(PushOutcome::Skipped(PushSkip::NotNormal));
        }

        let target = remote_id.filter(|id| !id.is_empty());
        match self.send_item(item, target) {
            Ok(remote_id) => {
                self.stats.write().pushes += 1;
                info!(
                    local_id = %item.id,
                    remote_id = %remote_id,
                    update = target.is_some(),
                    "pushed local item"
                );
                Ok(PushOutcome::Pushed { remote_id })
            }
            Err(err) => {
                self.stats.write().push_failures += 1;
                error!(local_id = %item.id, error = %err, "push failed");
                Err(err)
            }
        }
    }

    fn send_item(&self, item: &LocalContact, target: Option<&str>) -> SyncResult<String> {
        let mut fields = item.fields.to_field_list();
        match target {
            Some(id) => fields.push("id", id),
            None => fields.push("assigned_user_id", self.user_id()?),
        }

        let module = &self.config.entity.module;
        let remote_id = self
            .remote
            .create_or_update(module, &fields)
            .map_err(|err| SyncError::PushFailed {
                local_id: item.id.to_string(),
                message: err.to_string(),
            })?;

        let now = self.clock.now();
        let mut saved = item.clone();
        saved.metadata = SyncMetadata::synced(format_sync_timestamp(now), &remote_id);

        // The state is anchored before saving so the save's own change
        // notification lands inside the debounce window. A failed save puts
        // the previous state back.
        let digest = content_digest(&saved.fields);
        let sensitivity = saved.sensitivity;
        let previous = self.states.update(&saved.id, |state| {
            let previous = state.clone();
            state.remote_entry_id = remote_id.clone();
            state.last_synced = Some(now);
            state.sensitivity = sensitivity;
            state.content_digest = Some(digest);
            previous
        });
        if previous.is_none() {
            let mut state = SyncState::synced(saved.id.clone(), &remote_id, now);
            state.sensitivity = sensitivity;
            state.content_digest = Some(digest);
            if let Err(err) = self.states.insert(state) {
                warn!(local_id = %saved.id, error = %err, "cannot record sync state");
            }
        }

        if let Err(err) = self.local.save_item(&saved) {
            match previous {
                Some(previous) => {
                    self.states.update(&saved.id, |state| *state = previous);
                }
                None => {
                    self.states.remove(&saved.id);
                }
            }
            return Err(err);
        }
        Ok(remote_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EntityConfig, SyncConfig};
    use crate::contact::ContactFields;
    use crate::local::Sensitivity;
    use crate::memory::{MemoryLocalStore, MemoryRemote};

    fn engine(config: SyncConfig) -> SyncEngine<MemoryRemote, MemoryLocalStore> {
        SyncEngine::new(config, MemoryRemote::new("user-1"), MemoryLocalStore::new())
    }

    fn fields() -> ContactFields {
        ContactFields {
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
            email1: "grace@example.com".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_appends_owner_last() {
        let engine = engine(SyncConfig::default());
        let item = engine.local().insert(fields(), Sensitivity::Normal);

        let outcome = engine.push(&item, None).unwrap();
        let PushOutcome::Pushed { remote_id } = outcome else {
            panic!("expected a push");
        };

        let sent = engine.remote().pushed_field_lists().pop().unwrap();
        let names: Vec<_> = sent.iter().map(|nv| nv.name.as_str()).collect();
        assert_eq!(names.len(), 18);
        assert_eq!(names[0], "email1");
        assert_eq!(names[17], "assigned_user_id");
        assert_eq!(sent.get("assigned_user_id"), Some("user-1"));

        let stored = engine.local().get_item(&item.id).unwrap().unwrap();
        assert_eq!(stored.metadata.remote_id(), Some(remote_id.as_str()));
        assert!(stored.metadata.has_synced_timestamp());

        let state = engine.states().lookup_by_local_id(&item.id).unwrap();
        assert_eq!(state.remote_entry_id, remote_id);
        assert!(state.last_synced.is_some());
        assert_eq!(engine.stats().pushes, 1);
    }

    #[test]
    fn update_uses_given_id() {
        let engine = engine(SyncConfig::default());
        let item = engine.local().insert(fields(), Sensitivity::Normal);
        let PushOutcome::Pushed { remote_id } = engine.push(&item, None).unwrap() else {
            panic!("expected a push");
        };

        let outcome = engine.push(&item, Some(&remote_id)).unwrap();
        assert_eq!(outcome, PushOutcome::Pushed { remote_id: remote_id.clone() });
        let sent = engine.remote().pushed_field_lists().pop().unwrap();
        assert_eq!(sent.get("id"), Some(remote_id.as_str()));
        assert_eq!(sent.get("assigned_user_id"), None);
        assert_eq!(engine.remote().records().len(), 1);
    }

    #[test]
    fn guards_skip_without_remote_call() {
        let disabled = engine(SyncConfig::new(
            EntityConfig::contacts().with_sync_enabled(false),
        ));
        let item = disabled.local().insert(fields(), Sensitivity::Normal);
        assert_eq!(
            disabled.push(&item, None).unwrap(),
            PushOutcome::Skipped(PushSkip::SyncDisabled)
        );
        assert_eq!(disabled.remote().push_calls(), 0);

        let enabled = engine(SyncConfig::default());
        let private = enabled.local().insert(fields(), Sensitivity::Private);
        assert_eq!(
            enabled.push(&private, None).unwrap(),
            PushOutcome::Skipped(PushSkip::NotNormal)
        );
        assert_eq!(enabled.remote().push_calls(), 0);
    }

    #[test]
    fn failure_leaves_item_untouched() {
        let engine = engine(SyncConfig::default());
        let item = engine.local().insert(fields(), Sensitivity::Normal);
        let saves = engine.local().save_count(&item.id);
        engine.remote().set_fail_pushes(true);

        let err = engine.push(&item, None).unwrap_err();
        assert!(matches!(err, SyncError::PushFailed { .. }));
        assert_eq!(engine.local().save_count(&item.id), saves);
        assert!(engine.states().lookup_by_local_id(&item.id).is_none());
        assert_eq!(engine.stats().push_failures, 1);
    }

    #[test]
    fn failed_save_rolls_back_state() {
        let engine = engine(SyncConfig::default());
        let item = engine.local().insert(fields(), Sensitivity::Normal);
        let PushOutcome::Pushed { remote_id } = engine.push(&item, None).unwrap() else {
            panic!("expected a push");
        };
        let synced = engine.states().lookup_by_local_id(&item.id).unwrap();

        let fresh = engine.local().insert(fields(), Sensitivity::Normal);
        engine.local().set_fail_saves(true);

        assert!(engine.push(&fresh, None).is_err());
        assert!(engine.states().lookup_by_local_id(&fresh.id).is_none());

        let stored = engine.local().get_item(&item.id).unwrap().unwrap();
        assert!(engine.push(&stored, Some(&remote_id)).is_err());
        assert_eq!(engine.states().lookup_by_local_id(&item.id), Some(synced));
        assert_eq!(
            engine.local().get_item(&item.id).unwrap().unwrap().metadata,
            stored.metadata
        );

        assert_eq!(engine.stats().pushes, 1);
        assert_eq!(engine.stats().push_failures, 2);
    }
}
