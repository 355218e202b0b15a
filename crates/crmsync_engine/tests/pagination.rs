//! Property tests for listing termination.

use crmsync_engine::{
    AccessOperation, ContactFields, EntryListPage, FieldList, ListQuery, MemoryLocalStore,
    MemoryRemote, RemoteAccess, RemoteContact, RemoteEntry, SyncConfig, SyncEngine, SyncResult,
};
use proptest::prelude::*;
use std::sync::Mutex;

/// Answers the n-th listing call with one record and the n-th scripted
/// cursor, whatever offset was asked for.
struct CursorScript {
    cursors: Vec<u32>,
    calls: Mutex<u32>,
}

impl RemoteAccess for CursorScript {
    fn check_access(&self, _module: &str, _operation: AccessOperation) -> SyncResult<bool> {
        Ok(true)
    }

    fn list_records(&self, _query: &ListQuery) -> SyncResult<EntryListPage> {
        let mut calls = self.calls.lock().unwrap();
        let n = *calls as usize;
        *calls += 1;
        let record = RemoteContact {
            id: format!("r-{n}"),
            date_modified: "2024-01-01 00:00:00".into(),
            sync_contact: true,
            fields: ContactFields::default(),
        };
        let next = self.cursors.get(n).copied().unwrap_or(0);
        Ok(EntryListPage::new(vec![RemoteEntry::from_contact(&record)], next))
    }

    fn create_or_update(&self, _module: &str, _fields: &FieldList) -> SyncResult<String> {
        Ok("unused".into())
    }

    fn current_user_id(&self) -> SyncResult<String> {
        Ok("user-1".into())
    }
}

/// Pages a pass should fetch for a cursor script.
fn expected_pages(cursors: &[u32]) -> u32 {
    let mut offset = 0;
    let mut pages = 0;
    loop {
        let next = cursors.get(pages as usize).copied().unwrap_or(0);
        pages += 1;
        if next <= offset {
            return pages;
        }
        offset = next;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pass_terminates_on_any_cursor_sequence(cursors in prop::collection::vec(0u32..40, 0..16)) {
        let engine = SyncEngine::new(
            SyncConfig::default(),
            CursorScript { cursors: cursors.clone(), calls: Mutex::new(0) },
            MemoryLocalStore::new(),
        );

        let report = engine.reconcile().unwrap();
        let pages = expected_pages(&cursors);
        prop_assert_eq!(report.pages, pages);
        prop_assert_eq!(report.created, u64::from(pages));
        prop_assert!(pages as usize <= cursors.len() + 1);
    }

    #[test]
    fn every_opted_in_record_is_pulled(count in 0usize..30, page_size in 1u32..8) {
        let remote = MemoryRemote::new("user-1");
        for n in 0..count {
            remote.insert_record(RemoteContact {
                id: format!("r-{n}"),
                date_modified: String::new(),
                sync_contact: true,
                fields: ContactFields {
                    last_name: format!("Person {n}"),
                    ..Default::default()
                },
            });
        }
        let engine = SyncEngine::new(
            SyncConfig::default().with_page_size(page_size),
            remote,
            MemoryLocalStore::new(),
        );

        let report = engine.reconcile().unwrap();
        let full_pages = (count as u32).div_ceil(page_size);
        prop_assert_eq!(report.created, count as u64);
        prop_assert_eq!(report.pages, full_pages + 1);
        prop_assert_eq!(engine.local().items().len(), count);
    }
}
