//! The full reconciliation pass.
//!
//! A pass pages through every remote record owned by the current user,
//! creates or refreshes the matching local items, and then looks at the
//! local items no remote record matched. Those that were synced before
//! are treated as remote deletions; those that never were are pushed.
//!
//! The pass is remote-authoritative: any difference between the remote
//! `date_modified` and the one stored on the local item, in either
//! direction, overwrites the local item. It is not transactional; work
//! committed before a failure stands and the next pass picks up the rest.

use crate::contact::{RemoteContact, RemoteEntry};
use crate::engine::{content_digest, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::local::{LocalContact, LocalItemId, LocalStore, SyncMetadata};
use crate::push::PushOutcome;
use crate::remote::{AccessOperation, ListQuery, RemoteAccess};
use crate::state::SyncState;
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Listing pages fetched.
    pub pages: u32,
    /// Remote records examined.
    pub records_seen: u64,
    /// Local items created from remote records.
    pub created: u64,
    /// Local items overwritten from remote records.
    pub updated: u64,
    /// Matched local items whose remote record had not changed.
    pub unchanged: u64,
    /// Unmatched remote records without the sync opt-in.
    pub skipped_opt_out: u64,
    /// Records or items skipped because of an error.
    pub record_errors: u64,
    /// Local items deleted because their remote record vanished.
    pub deleted: u64,
    /// Local-only items pushed to the remote side.
    pub pushed: u64,
    /// Local-only items whose push failed.
    pub push_failures: u64,
    /// Whether some deletions were held back because the pass could not
    /// confirm the remote record was gone.
    pub deletions_deferred: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

enum RecordOutcome {
    Created(LocalItemId),
    Updated(LocalItemId),
    Unchanged(LocalItemId),
    OptedOut,
}

/// Bookkeeping for one pass.
struct PassLedger {
    untouched: HashMap<LocalItemId, SyncState>,
    /// Every remote id listed in this pass, processed or not.
    listed: HashSet<String>,
    /// Set when a record failed before its id could be read.
    unidentified_failure: bool,
}

impl PassLedger {
    fn confirms_absent(&self, remote_id: Option<&str>) -> bool {
        !self.unidentified_failure && remote_id.is_none_or(|id| !self.listed.contains(id))
    }
}

impl<R: RemoteAccess, L: LocalStore> SyncEngine<R, L> {
    /// Runs one full reconciliation pass.
    ///
    /// Fails without side effects if the CRM denies export. Errors in
    /// individual records are logged and counted; any other error aborts
    /// the pass.
    pub fn reconcile(&self) -> SyncResult<ReconcileReport> {
        let start = Instant::now();
        self.begin_pass()?;

        let mut report = ReconcileReport::default();
        let result = self.run_pass(&mut report);
        report.duration = start.elapsed();

        {
            let mut stats = self.stats.write();
            stats.records_pulled += report.records_seen;
            stats.items_created += report.created;
            stats.items_updated += report.updated;
            stats.items_deleted += report.deleted;
            stats.record_errors += report.record_errors;
        }

        match result {
            Ok(()) => {
                self.finish_pass();
                info!(
                    module = %self.config.entity.module,
                    pages = report.pages,
                    records = report.records_seen,
                    created = report.created,
                    updated = report.updated,
                    deleted = report.deleted,
                    pushed = report.pushed,
                    errors = report.record_errors,
                    "reconciliation pass completed"
                );
                Ok(report)
            }
            Err(err) => {
                self.fail_pass(&err);
                Err(err)
            }
        }
    }

    fn run_pass(&self, report: &mut ReconcileReport) -> SyncResult<()> {
        self.ensure_started()?;

        let module = self.config.entity.module.clone();
        if !self.remote.check_access(&module, AccessOperation::Export)? {
            warn!(module = %module, "CRM denied export access");
            return Err(SyncError::PermissionDenied {
                module,
                operation: AccessOperation::Export.to_string(),
            });
        }
        let user_id = self.user_id()?;

        let mut ledger = PassLedger {
            untouched: self
                .states
                .snapshot_all()
                .into_iter()
                .map(|state| (state.local_id.clone(), state))
                .collect(),
            listed: HashSet::new(),
            unidentified_failure: false,
        };

        let mut offset = 0;
        loop {
            self.check_cancelled()?;

            let query = ListQuery {
                module: module.clone(),
                assigned_user_id: user_id.clone(),
                offset,
                page_size: self.config.page_size,
                order_by: self.config.order_by.clone(),
            };
            let page = self.remote.list_records(&query)?;
            report.pages += 1;
            debug!(
                offset,
                next_offset = page.next_offset,
                records = page.entries.len(),
                "fetched listing page"
            );

            for entry in &page.entries {
                report.records_seen += 1;
                self.take_entry(entry, &mut ledger, report)?;
            }

            // A cursor that does not move forward ends the listing.
            if page.next_offset <= offset {
                break;
            }
            offset = page.next_offset;
        }

        self.sweep_untouched(&ledger, report);
        Ok(())
    }

    fn take_entry(
        &self,
        entry: &RemoteEntry,
        ledger: &mut PassLedger,
        report: &mut ReconcileReport,
    ) -> SyncResult<()> {
        let id_hint = entry.id_hint();
        match &id_hint {
            Some(id) => {
                ledger.listed.insert(id.clone());
            }
            None => ledger.unidentified_failure = true,
        }

        match self.apply_remote_entry(entry) {
            Ok(RecordOutcome::Created(local_id)) => {
                report.created += 1;
                ledger.untouched.remove(&local_id);
            }
            Ok(RecordOutcome::Updated(local_id)) => {
                report.updated += 1;
                ledger.untouched.remove(&local_id);
            }
            Ok(RecordOutcome::Unchanged(local_id)) => {
                report.unchanged += 1;
                ledger.untouched.remove(&local_id);
            }
            Ok(RecordOutcome::OptedOut) => report.skipped_opt_out += 1,
            Err(err) if err.is_record_level() => {
                report.record_errors += 1;
                warn!(
                    remote_id = id_hint.as_deref().unwrap_or("<unknown>"),
                    error = %err,
                    "skipping remote record"
                );
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn apply_remote_entry(&self, entry: &RemoteEntry) -> SyncResult<RecordOutcome> {
        let contact = entry.parse()?;
        let modified = contact.modified_at().map_err(|_| {
            SyncError::malformed(
                Some(&contact.id),
                format!("unparseable date_modified {:?}", contact.date_modified),
            )
        })?;

        if let Some(state) = self.states.lookup_by_remote_id(&contact.id) {
            match self.local.get_item(&state.local_id)? {
                Some(item) => return self.refresh_local_item(item, &contact, modified),
                None => {
                    warn!(
                        remote_id = %contact.id,
                        local_id = %state.local_id,
                        "local item behind sync state is gone"
                    );
                    self.states.remove(&state.local_id);
                }
            }
        }

        if !contact.sync_contact {
            debug!(remote_id = %contact.id, "remote record not opted in to sync");
            return Ok(RecordOutcome::OptedOut);
        }
        self.create_local_item(&contact, modified)
    }

    fn create_local_item(
        &self,
        contact: &RemoteContact,
        modified: NaiveDateTime,
    ) -> SyncResult<RecordOutcome> {
        let metadata = SyncMetadata::synced(&contact.date_modified, &contact.id);
        let item = self.local.create_item(contact.fields.clone(), metadata)?;

        let mut state = SyncState::synced(item.id.clone(), &contact.id, modified);
        state.sensitivity = item.sensitivity;
        state.content_digest = Some(content_digest(&item.fields));
        self.states.insert(state)?;

        debug!(
            remote_id = %contact.id,
            local_id = %item.id,
            name = %item.fields.full_name(),
            "created local item from remote record"
        );
        Ok(RecordOutcome::Created(item.id))
    }

    fn refresh_local_item(
        &self,
        mut item: LocalContact,
        contact: &RemoteContact,
        modified: NaiveDateTime,
    ) -> SyncResult<RecordOutcome> {
        // Compare against the persisted property, not the cache, so that
        // edits to the property made outside the engine are honored.
        let changed =
            item.metadata.synced_modified_date.as_deref() != Some(contact.date_modified.as_str());

        let sensitivity = item.sensitivity;
        if !changed {
            let agrees = item.fields == contact.fields;
            self.states.update(&item.id, |state| {
                state.last_synced = Some(modified);
                state.sensitivity = sensitivity;
                if agrees {
                    state.content_digest = Some(content_digest(&contact.fields));
                }
            });
            return Ok(RecordOutcome::Unchanged(item.id));
        }

        item.fields = contact.fields.clone();
        item.metadata = SyncMetadata::synced(&contact.date_modified, &contact.id);

        // The state is refreshed before saving so the save's own change
        // notification is recognized as an echo.
        let digest = content_digest(&item.fields);
        let previous = self.states.update(&item.id, |state| {
            let previous = (state.last_synced, state.content_digest);
            state.last_synced = Some(modified);
            state.sensitivity = sensitivity;
            state.content_digest = Some(digest);
            previous
        });
        if let Err(err) = self.local.save_item(&item) {
            if let Some((last_synced, digest_before)) = previous {
                self.states.update(&item.id, |state| {
                    state.last_synced = last_synced;
                    state.content_digest = digest_before;
                });
            }
            return Err(err);
        }
        debug!(
            remote_id = %contact.id,
            local_id = %item.id,
            "updated local item from remote record"
        );
        Ok(RecordOutcome::Updated(item.id))
    }

    /// Deletes synced items the remote side no longer lists and pushes
    /// items the remote side has never seen.
    ///
    /// Decisions come from the snapshot taken when the pass began. An item
    /// whose sync state or remote id changed since then, for example
    /// because a notification pushed it, is left for the next pass.
    fn sweep_untouched(&self, ledger: &PassLedger, report: &mut ReconcileReport) {
        for state in ledger.untouched.values() {
            let item = match self.local.get_item(&state.local_id) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    self.states.remove(&state.local_id);
                    continue;
                }
                Err(err) => {
                    report.record_errors += 1;
                    warn!(local_id = %state.local_id, error = %err, "cannot read local item");
                    continue;
                }
            };
            if !item.sensitivity.is_normal() {
                continue;
            }
            if !self.unchanged_since_snapshot(state, &item) {
                debug!(local_id = %item.id, "item changed during the pass, leaving it for the next one");
                continue;
            }

            let synced_before = state.has_remote()
                && (state.last_synced.is_some() || item.metadata.has_synced_timestamp());
            if synced_before {
                let remote_id = state.remote_entry_id.as_str();
                if !ledger.confirms_absent(Some(remote_id)) {
                    report.deletions_deferred = true;
                    debug!(
                        local_id = %item.id,
                        remote_id,
                        "remote record not confirmed absent, keeping local item"
                    );
                    continue;
                }
                match self.local.delete_item(&item.id) {
                    Ok(()) => {
                        self.states.remove(&item.id);
                        report.deleted += 1;
                        info!(
                            local_id = %item.id,
                            remote_id,
                            "deleted local item removed on the remote side"
                        );
                    }
                    Err(err) => {
                        report.record_errors += 1;
                        warn!(local_id = %item.id, error = %err, "cannot delete local item");
                    }
                }
            } else {
                match self.push(&item, None) {
                    Ok(PushOutcome::Pushed { .. }) => report.pushed += 1,
                    Ok(PushOutcome::Skipped(_)) => {}
                    Err(_) => report.push_failures += 1,
                }
            }
        }
    }

    /// True if neither the live sync state nor the item's remote id moved
    /// away from the snapshot `state`.
    fn unchanged_since_snapshot(&self, state: &SyncState, item: &LocalContact) -> bool {
        let live_matches = self
            .states
            .lookup_by_local_id(&state.local_id)
            .is_some_and(|live| {
                live.remote_entry_id == state.remote_entry_id
                    && live.last_synced == state.last_synced
            });
        live_matches && item.metadata.remote_id().unwrap_or_default() == state.remote_entry_id
    }
}
