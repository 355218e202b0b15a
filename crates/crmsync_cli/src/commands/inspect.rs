//! Inspect command implementation.

use crate::snapshot;
use crmsync_engine::{
    format_sync_timestamp, MemoryRemote, Sensitivity, SyncConfig, SyncEngine, SyncState,
};
use serde::Serialize;
use std::path::Path;

/// Sync state rebuilt from a local snapshot.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Snapshot path.
    pub path: String,
    /// Number of items.
    pub item_count: usize,
    /// Items matched to a remote record.
    pub synced_count: usize,
    /// Items never pushed or matched.
    pub unsynced_count: usize,
    /// Items that never leave the local side.
    pub sensitive_count: usize,
    /// Per-item state (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ItemState>>,
}

/// State of a single item.
#[derive(Debug, Serialize)]
pub struct ItemState {
    /// Local identity.
    pub local_id: String,
    /// Remote identity, empty if unsynced.
    pub remote_id: String,
    /// Last synchronized timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced: Option<String>,
    /// Item visibility.
    pub sensitivity: Sensitivity,
}

impl From<SyncState> for ItemState {
    fn from(state: SyncState) -> Self {
        Self {
            local_id: state.local_id.to_string(),
            remote_id: state.remote_entry_id,
            last_synced: state.last_synced.map(format_sync_timestamp),
            sensitivity: state.sensitivity,
        }
    }
}

/// Rebuilds sync state from the snapshot at `path`.
pub fn inspect(path: &Path, show_items: bool) -> Result<InspectResult, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No local snapshot found at {:?}", path).into());
    }
    let local = snapshot::load_local(path)?;

    // Rebuilding state only touches the local side.
    let engine = SyncEngine::new(
        SyncConfig::default(),
        MemoryRemote::new(""),
        local.into_store(),
    );
    let item_count = engine.start()?;

    let mut states = engine.states().snapshot_all();
    states.sort_by(|a, b| a.local_id.cmp(&b.local_id));

    let synced_count = states.iter().filter(|s| s.has_remote()).count();
    let sensitive_count = states
        .iter()
        .filter(|s| !s.sensitivity.is_normal())
        .count();

    Ok(InspectResult {
        path: path.display().to_string(),
        item_count,
        synced_count,
        unsynced_count: item_count - synced_count,
        sensitive_count,
        items: show_items.then(|| states.into_iter().map(ItemState::from).collect()),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, show_items: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, show_items)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Local Snapshot Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Items:");
    println!("  Total:      {}", result.item_count);
    println!("  Synced:     {}", result.synced_count);
    println!("  Unsynced:   {}", result.unsynced_count);
    println!("  Sensitive:  {}", result.sensitive_count);

    if let Some(items) = &result.items {
        println!();
        println!("State:");
        for item in items {
            println!(
                "  [{}] remote={} synced={} {:?}",
                item.local_id,
                if item.remote_id.is_empty() { "-" } else { item.remote_id.as_str() },
                item.last_synced.as_deref().unwrap_or("-"),
                item.sensitivity
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn counts_synced_and_sensitive_items() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        let local = json!({
            "items": [
                {
                    "id": "a",
                    "fields": { "last_name": "Synced" },
                    "metadata": {
                        "SyncedModifiedDate": "2024-02-01 10:00:00",
                        "SyncedRemoteId": "r-1"
                    }
                },
                { "id": "b", "fields": { "last_name": "Fresh" } },
                { "id": "c", "sensitivity": "private" }
            ]
        });
        fs::write(&path, local.to_string()).unwrap();

        let result = inspect(&path, true).unwrap();
        assert_eq!(result.item_count, 3);
        assert_eq!(result.synced_count, 1);
        assert_eq!(result.unsynced_count, 2);
        assert_eq!(result.sensitive_count, 1);

        let items = result.items.unwrap();
        assert_eq!(items[0].local_id, "a");
        assert_eq!(items[0].remote_id, "r-1");
        assert_eq!(items[0].last_synced.as_deref(), Some("2024-02-01 10:00:00"));
        assert_eq!(items[2].sensitivity, Sensitivity::Private);
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(inspect(&dir.path().join("absent.json"), false).is_err());
    }
}
