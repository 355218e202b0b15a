//! Integration tests for the reconciliation pass and the incremental path.

use chrono::{NaiveDate, NaiveDateTime};
use crmsync_engine::{
    AccessOperation, ContactFields, EntityConfig, EntryListPage, EventOutcome, FieldList,
    ListQuery, LocalEvent, LocalStore, ManualClock, MemoryLocalStore, MemoryRemote, RemoteAccess,
    RemoteContact, RemoteEntry, Sensitivity, SyncConfig, SyncEngine, SyncError, SyncMetadata,
    SyncResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A remote serving fixed pages keyed by request offset.
#[derive(Default)]
struct ScriptedRemote {
    pages: Mutex<HashMap<u32, EntryListPage>>,
    requests: Mutex<Vec<ListQuery>>,
    pushes: Mutex<Vec<FieldList>>,
}

impl ScriptedRemote {
    fn set_page(&self, offset: u32, entries: Vec<RemoteEntry>, next_offset: u32) {
        self.pages
            .lock()
            .unwrap()
            .insert(offset, EntryListPage::new(entries, next_offset));
    }

    fn clear(&self) {
        self.pages.lock().unwrap().clear();
    }

    fn offsets_requested(&self) -> Vec<u32> {
        self.requests.lock().unwrap().iter().map(|q| q.offset).collect()
    }
}

impl RemoteAccess for ScriptedRemote {
    fn check_access(&self, _module: &str, _operation: AccessOperation) -> SyncResult<bool> {
        Ok(true)
    }

    fn list_records(&self, query: &ListQuery) -> SyncResult<EntryListPage> {
        self.requests.lock().unwrap().push(query.clone());
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(&query.offset)
            .cloned()
            .unwrap_or_default())
    }

    fn create_or_update(&self, _module: &str, fields: &FieldList) -> SyncResult<String> {
        let mut pushes = self.pushes.lock().unwrap();
        pushes.push(fields.clone());
        Ok(fields
            .get("id")
            .map(str::to_owned)
            .unwrap_or_else(|| format!("new-{}", pushes.len())))
    }

    fn current_user_id(&self) -> SyncResult<String> {
        Ok("user-1".into())
    }
}

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 3)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
}

fn fields(first: &str, last: &str) -> ContactFields {
    ContactFields {
        first_name: first.into(),
        last_name: last.into(),
        email1: format!("{}@example.com", first.to_lowercase()),
        phone_work: "+1 555 0100".into(),
        primary_address_city: "Boston".into(),
        ..Default::default()
    }
}

fn contact(id: &str, last: &str, sync: bool) -> RemoteContact {
    RemoteContact {
        id: id.into(),
        date_modified: "2024-06-01 08:30:00".into(),
        sync_contact: sync,
        fields: fields("Test", last),
    }
}

fn entry(id: &str, last: &str) -> RemoteEntry {
    RemoteEntry::from_contact(&contact(id, last, true))
}

struct Setup {
    clock: Arc<ManualClock>,
    engine: SyncEngine<MemoryRemote, MemoryLocalStore>,
}

fn setup(config: SyncConfig) -> Setup {
    let clock = Arc::new(ManualClock::new(epoch()));
    let engine = SyncEngine::with_clock(
        config,
        MemoryRemote::with_clock("user-1", clock.clone()),
        MemoryLocalStore::new(),
        clock.clone(),
    );
    Setup { clock, engine }
}

fn scripted(remote: ScriptedRemote) -> SyncEngine<ScriptedRemote, MemoryLocalStore> {
    SyncEngine::new(SyncConfig::default(), remote, MemoryLocalStore::new())
}

#[test]
fn opted_in_records_become_local_items() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Babbage", true));
    s.engine.remote().insert_record(contact("r-2", "Lovelace", true));
    s.engine.remote().insert_record(contact("r-3", "Menabrea", false));
    s.engine
        .remote()
        .insert_record_for("someone-else", contact("r-4", "Other", true));

    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.created, 2);
    assert_eq!(report.skipped_opt_out, 1);

    let items = s.engine.local().items();
    assert_eq!(items.len(), 2);
    for item in items {
        let remote_id = item.metadata.remote_id().unwrap();
        let remote = s.engine.remote().get(remote_id).unwrap();
        assert_eq!(item.fields, remote.contact.fields);
        assert_eq!(
            item.metadata,
            SyncMetadata::synced(remote.contact.date_modified.clone(), remote_id)
        );
    }
}

#[test]
fn second_pass_makes_no_local_writes() {
    let s = setup(SyncConfig::default());
    for (id, name) in [("r-1", "Hamming"), ("r-2", "Floyd"), ("r-3", "Perlis")] {
        s.engine.remote().insert_record(contact(id, name, true));
    }
    s.engine.reconcile().unwrap();
    let saves = s.engine.local().total_saves();

    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.created + report.updated + report.deleted, 0);
    assert_eq!(report.unchanged, 3);
    assert_eq!(s.engine.local().total_saves(), saves);
    assert_eq!(s.engine.remote().push_calls(), 0);
}

#[test]
fn pushed_item_is_matched_not_duplicated() {
    let s = setup(SyncConfig::default());
    s.engine
        .local()
        .insert(fields("Barbara", "Liskov"), Sensitivity::Normal);

    let first = s.engine.reconcile().unwrap();
    assert_eq!(first.pushed, 1);
    assert_eq!(s.engine.remote().records().len(), 1);

    s.clock.advance(Duration::from_secs(60));
    let second = s.engine.reconcile().unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.pushed, 0);
    assert_eq!(s.engine.local().items().len(), 1);
    assert_eq!(s.engine.remote().records().len(), 1);

    let saves = s.engine.local().total_saves();
    s.engine.reconcile().unwrap();
    assert_eq!(s.engine.local().total_saves(), saves);
}

#[test]
fn own_save_does_not_trigger_second_push() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Dijkstra", true));
    s.engine.reconcile().unwrap();
    let id = s.engine.local().items()[0].id.clone();
    let events = s.engine.local().subscribe();

    s.clock.advance(Duration::from_secs(30));
    s.engine
        .local()
        .edit(&id, |item| item.fields.title = "Professor".into())
        .unwrap();

    let mut outcomes = Vec::new();
    while let Ok(event) = events.try_recv() {
        outcomes.push(s.engine.handle_event(&event));
    }
    assert_eq!(
        outcomes,
        vec![EventOutcome::Pushed("r-1".into()), EventOutcome::Suppressed]
    );
    assert_eq!(s.engine.remote().push_calls(), 1);
    assert_eq!(s.engine.remote().get("r-1").unwrap().contact.fields.title, "Professor");

    // A further edit within the debounce window is held back too.
    s.clock.advance(Duration::from_secs(1));
    s.engine
        .local()
        .edit(&id, |item| item.fields.department = "Computing".into())
        .unwrap();
    while let Ok(event) = events.try_recv() {
        assert_eq!(s.engine.handle_event(&event), EventOutcome::Suppressed);
    }
    assert_eq!(s.engine.remote().push_calls(), 1);
}

#[test]
fn remote_deletion_removes_synced_item_once() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Kahan", true));
    s.engine.remote().insert_record(contact("r-2", "Wilkinson", true));
    s.engine.reconcile().unwrap();

    assert!(s.engine.remote().remove_record("r-1"));
    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.deleted, 1);
    assert!(!report.deletions_deferred);

    let remaining = s.engine.local().items();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].metadata.remote_id(), Some("r-2"));
    assert!(s.engine.states().lookup_by_remote_id("r-1").is_none());

    assert_eq!(s.engine.reconcile().unwrap().deleted, 0);
    assert_eq!(s.engine.stats().items_deleted, 1);
}

#[test]
fn never_synced_item_is_pushed_not_deleted() {
    let s = setup(SyncConfig::default());
    let item = s
        .engine
        .local()
        .insert(fields("Edsger", "Orphan"), Sensitivity::Normal);
    // Remote id without a timestamp: the record it names is gone.
    s.engine
        .local()
        .edit(&item.id, |item| {
            item.metadata.synced_remote_id = Some("vanished".into());
        })
        .unwrap();

    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(report.pushed, 1);

    let stored = s.engine.local().get_item(&item.id).unwrap().unwrap();
    let remote_id = stored.metadata.remote_id().unwrap();
    assert_ne!(remote_id, "vanished");
    assert!(s.engine.remote().get(remote_id).is_some());
}

#[test]
fn sensitive_items_stay_local() {
    let s = setup(SyncConfig::default());
    let item = s
        .engine
        .local()
        .insert(fields("Private", "Person"), Sensitivity::Private);

    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.deleted, 0);
    assert!(s.engine.local().get_item(&item.id).unwrap().is_some());
    assert_eq!(s.engine.remote().push_calls(), 0);
}

#[test]
fn two_page_listing_creates_both_records() {
    let remote = ScriptedRemote::default();
    remote.set_page(0, vec![entry("A", "Alpha"), entry("B", "Beta")], 2);
    remote.set_page(2, vec![], 0);
    let engine = scripted(remote);

    let report = engine.reconcile().unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.created, 2);
    assert_eq!(engine.remote().offsets_requested(), vec![0, 2]);
    assert_eq!(engine.local().items().len(), 2);
    assert!(engine.states().lookup_by_remote_id("A").is_some());
    assert!(engine.states().lookup_by_remote_id("B").is_some());
}

#[test]
fn stuck_cursor_ends_the_listing() {
    let remote = ScriptedRemote::default();
    remote.set_page(0, vec![entry("A", "Alpha"), entry("B", "Beta")], 2);
    remote.set_page(2, vec![entry("C", "Gamma")], 2);
    let engine = scripted(remote);

    let report = engine.reconcile().unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.created, 3);
    assert_eq!(engine.remote().offsets_requested(), vec![0, 2]);
}

#[test]
fn listing_requests_carry_owner_and_order() {
    let remote = ScriptedRemote::default();
    let engine = SyncEngine::new(
        SyncConfig::default().with_page_size(50),
        remote,
        MemoryLocalStore::new(),
    );
    engine.reconcile().unwrap();

    let requests = engine.remote().requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].module, "Contacts");
    assert_eq!(requests[0].page_size, 50);
    assert_eq!(requests[0].order_by, "date_entered DESC");
    assert_eq!(
        requests[0].filter_expression(),
        "contacts.assigned_user_id = 'user-1'"
    );
}

#[test]
fn permission_denied_aborts_without_mutation() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Denied", true));
    s.engine
        .local()
        .insert(fields("Local", "Only"), Sensitivity::Normal);
    s.engine.remote().deny(AccessOperation::Export);

    let err = s.engine.reconcile().unwrap_err();
    assert!(matches!(err, SyncError::PermissionDenied { ref operation, .. } if operation == "export"));
    assert_eq!(s.engine.local().items().len(), 1);
    assert_eq!(s.engine.remote().push_calls(), 0);
    assert_eq!(s.engine.remote().list_calls(), 0);

    s.engine.remote().allow(AccessOperation::Export);
    assert_eq!(s.engine.reconcile().unwrap().created, 1);
}

#[test]
fn listing_failure_aborts_pass_and_keeps_items() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Kept", true));
    s.engine.reconcile().unwrap();

    s.engine.remote().set_fail_listing(true);
    let err = s.engine.reconcile().unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(s.engine.local().items().len(), 1);
    assert!(s.engine.stats().last_error.is_some());
}

#[test]
fn failed_record_is_not_mistaken_for_a_deletion() {
    let remote = ScriptedRemote::default();
    remote.set_page(0, vec![entry("A", "Alpha"), entry("B", "Beta")], 0);
    let engine = scripted(remote);
    engine.reconcile().unwrap();
    assert_eq!(engine.local().items().len(), 2);

    // A is listed but unreadable; B is gone.
    let mut broken = contact("A", "Alpha", true);
    broken.date_modified = "yesterday-ish".into();
    engine.remote().clear();
    engine
        .remote()
        .set_page(0, vec![RemoteEntry::from_contact(&broken)], 0);

    let report = engine.reconcile().unwrap();
    assert_eq!(report.record_errors, 1);
    assert_eq!(report.deleted, 1);
    assert!(report.deletions_deferred);
    let left: Vec<_> = engine
        .local()
        .items()
        .into_iter()
        .filter_map(|item| item.metadata.remote_id().map(str::to_owned))
        .collect();
    assert_eq!(left, vec!["A".to_owned()]);
}

#[test]
fn unidentifiable_record_defers_all_deletions() {
    let remote = ScriptedRemote::default();
    remote.set_page(0, vec![entry("A", "Alpha")], 0);
    let engine = scripted(remote);
    engine.reconcile().unwrap();

    engine.remote().clear();
    engine.remote().set_page(
        0,
        vec![RemoteEntry::new(serde_json::json!({
            "name_value_list": { "last_name": { "name": "last_name", "value": "No Id" } }
        }))],
        0,
    );
    let report = engine.reconcile().unwrap();
    assert_eq!(report.record_errors, 1);
    assert_eq!(report.deleted, 0);
    assert!(report.deletions_deferred);
    assert_eq!(engine.local().items().len(), 1);

    engine.remote().clear();
    assert_eq!(engine.reconcile().unwrap().deleted, 1);
}

#[test]
fn local_deletion_propagates_only_when_enabled() {
    for propagate in [false, true] {
        let entity = EntityConfig::contacts().with_local_deletion_propagation(propagate);
        let s = setup(SyncConfig::new(entity));
        s.engine.remote().insert_record(contact("r-1", "Doomed", true));
        s.engine.reconcile().unwrap();

        let id = s.engine.local().items()[0].id.clone();
        assert!(s.engine.local().remove(&id));
        assert_eq!(
            s.engine.handle_event(&LocalEvent::Removed),
            EventOutcome::Removed(1)
        );

        let remote = s.engine.remote().get("r-1").unwrap();
        assert_eq!(remote.deleted, propagate);
        assert!(s.engine.states().is_empty());
    }
}

#[test]
fn restart_rebuilds_state_from_metadata() {
    let s = setup(SyncConfig::default());
    s.engine.remote().insert_record(contact("r-1", "Persistent", true));
    s.engine
        .local()
        .insert(fields("Local", "First"), Sensitivity::Normal);
    s.engine.reconcile().unwrap();
    let records = s.engine.remote().records();
    let items = s.engine.local().items();

    let restarted = SyncEngine::new(
        SyncConfig::default(),
        MemoryRemote::from_records("user-1", records),
        MemoryLocalStore::from_items(items),
    );
    assert_eq!(restarted.start().unwrap(), 2);
    assert!(restarted.states().lookup_by_remote_id("r-1").is_some());

    let report = restarted.reconcile().unwrap();
    assert_eq!(report.created, 0);
    assert_eq!(report.pushed, 0);
    assert_eq!(report.deleted, 0);
    assert_eq!(restarted.local().items().len(), 2);
    assert_eq!(restarted.remote().records().len(), 2);
}

#[test]
fn disabled_sync_still_pulls() {
    let entity = EntityConfig::contacts().with_sync_enabled(false);
    let s = setup(SyncConfig::new(entity));
    s.engine.remote().insert_record(contact("r-1", "Pulled", true));
    s.engine
        .local()
        .insert(fields("Never", "Pushed"), Sensitivity::Normal);

    let report = s.engine.reconcile().unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.pushed, 0);
    assert_eq!(s.engine.remote().push_calls(), 0);
}
