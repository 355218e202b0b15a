//! Remote access abstraction.
//!
//! The CRM transport (request construction, sessions, retries, timeouts)
//! lives behind [`RemoteAccess`]. The engine only needs paged listing,
//! create-or-update, an access check and the current user's id.

use crate::contact::{FieldList, RemoteEntry};
use crate::error::SyncResult;
use std::fmt;

/// Operation whose permission is checked before a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessOperation {
    /// Reading records out of the CRM.
    Export,
    /// Writing records into the CRM.
    Import,
}

impl fmt::Display for AccessOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessOperation::Export => f.write_str("export"),
            AccessOperation::Import => f.write_str("import"),
        }
    }
}

/// One page request of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Remote module name.
    pub module: String,
    /// Only records assigned to this user are listed.
    pub assigned_user_id: String,
    /// Offset cursor.
    pub offset: u32,
    /// Maximum records per page.
    pub page_size: u32,
    /// Ordering clause.
    pub order_by: String,
}

impl ListQuery {
    /// The ownership filter in the CRM's query syntax.
    pub fn filter_expression(&self) -> String {
        format!(
            "{}.assigned_user_id = '{}'",
            self.module.to_lowercase(),
            self.assigned_user_id.replace('\'', "''")
        )
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryListPage {
    /// Raw records on this page.
    pub entries: Vec<RemoteEntry>,
    /// Offset of the next page. Zero, or the request's own offset, means
    /// there are no more pages.
    pub next_offset: u32,
}

impl EntryListPage {
    /// Creates a page.
    pub fn new(entries: Vec<RemoteEntry>, next_offset: u32) -> Self {
        Self {
            entries,
            next_offset,
        }
    }
}

/// Access to the CRM.
pub trait RemoteAccess: Send + Sync {
    /// Returns whether the current user may perform `operation` on `module`.
    fn check_access(&self, module: &str, operation: AccessOperation) -> SyncResult<bool>;

    /// Lists one page of records.
    fn list_records(&self, query: &ListQuery) -> SyncResult<EntryListPage>;

    /// Creates or updates a record and returns its remote id.
    ///
    /// The list carries `id` for an update or `assigned_user_id` for a
    /// create.
    fn create_or_update(&self, module: &str, fields: &FieldList) -> SyncResult<String>;

    /// The id of the authenticated CRM user.
    fn current_user_id(&self) -> SyncResult<String>;
}
