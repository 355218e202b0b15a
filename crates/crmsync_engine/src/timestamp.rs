//! The `yyyy-MM-dd HH:mm:ss` timestamps stored in item metadata.

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, NaiveDateTime};

/// Format of `SyncedModifiedDate` and of the CRM's `date_modified`.
pub const SYNC_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a metadata timestamp.
///
/// The exact format is tried first; RFC 3339 and `T`-separated values
/// written by other tools are accepted as a fallback.
pub fn parse_sync_timestamp(value: &str) -> SyncResult<NaiveDateTime> {
    let value = value.trim();
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, SYNC_TIMESTAMP_FORMAT) {
        return Ok(parsed);
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.naive_utc());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map_err(|_| SyncError::Timestamp(value.to_owned()))
}

/// Formats a timestamp for metadata.
pub fn format_sync_timestamp(value: NaiveDateTime) -> String {
    value.format(SYNC_TIMESTAMP_FORMAT).to_string()
}
