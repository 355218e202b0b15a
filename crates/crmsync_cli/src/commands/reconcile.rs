//! Reconcile command implementation.

use crate::snapshot::{self, LocalSnapshot, RemoteSnapshot};
use crmsync_engine::{EntityConfig, ReconcileReport, SyncConfig, SyncEngine};
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Options for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Overrides the user recorded in the remote snapshot.
    pub user: Option<String>,
    /// Listing page size.
    pub page_size: u32,
    /// Leaves both snapshot files untouched.
    pub dry_run: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            user: None,
            page_size: 20,
            dry_run: false,
        }
    }
}

/// Summary printed after a run.
#[derive(Debug, Serialize)]
pub struct ReconcileSummary {
    /// Listing pages fetched.
    pub pages: u32,
    /// Remote records examined.
    pub records_seen: u64,
    /// Local items created.
    pub created: u64,
    /// Local items overwritten.
    pub updated: u64,
    /// Local items left alone.
    pub unchanged: u64,
    /// Records without the sync opt-in.
    pub skipped_opt_out: u64,
    /// Local items deleted.
    pub deleted: u64,
    /// Local items pushed.
    pub pushed: u64,
    /// Pushes that failed.
    pub push_failures: u64,
    /// Records or items skipped because of an error.
    pub record_errors: u64,
    /// Whether deletions were held back.
    pub deletions_deferred: bool,
    /// Local items after the run.
    pub local_items: usize,
    /// Remote records after the run, deleted ones included.
    pub remote_records: usize,
    /// Pass duration in milliseconds.
    pub duration_ms: u128,
}

impl ReconcileSummary {
    fn new(report: &ReconcileReport, local_items: usize, remote_records: usize) -> Self {
        Self {
            pages: report.pages,
            records_seen: report.records_seen,
            created: report.created,
            updated: report.updated,
            unchanged: report.unchanged,
            skipped_opt_out: report.skipped_opt_out,
            deleted: report.deleted,
            pushed: report.pushed,
            push_failures: report.push_failures,
            record_errors: report.record_errors,
            deletions_deferred: report.deletions_deferred,
            local_items,
            remote_records,
            duration_ms: report.duration.as_millis(),
        }
    }
}

/// Runs one pass over the two snapshots and writes them back.
pub fn reconcile(
    remote_path: &Path,
    local_path: &Path,
    options: &ReconcileOptions,
) -> Result<ReconcileSummary, Box<dyn std::error::Error>> {
    let remote_snapshot = snapshot::load_remote(remote_path)?;
    if remote_snapshot.user_id.is_empty() && options.user.is_none() {
        return Err("remote snapshot has no user_id; pass --user".into());
    }
    let local_snapshot = snapshot::load_local(local_path)?;

    // A snapshot carries only items that still exist, so there are no
    // local deletions to propagate.
    let config = SyncConfig::new(EntityConfig::contacts())
        .with_page_size(options.page_size)
        .with_require_current_view(false);
    let engine = SyncEngine::new(
        config,
        remote_snapshot.into_remote(options.user.as_deref()),
        local_snapshot.into_store(),
    );

    let loaded = engine.start()?;
    info!(items = loaded, "loaded local snapshot");
    let report = engine.reconcile()?;

    let local = LocalSnapshot::from_store(engine.local());
    let remote = RemoteSnapshot::from_remote(engine.remote());
    let summary = ReconcileSummary::new(&report, local.items.len(), remote.records.len());

    if options.dry_run {
        info!("dry run, snapshots not written");
    } else {
        snapshot::save(local_path, &local)?;
        snapshot::save(remote_path, &remote)?;
    }
    Ok(summary)
}

/// Runs the reconcile command.
pub fn run(
    remote_path: &Path,
    local_path: &Path,
    options: &ReconcileOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = reconcile(remote_path, local_path, options)?;
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => print_text_output(&summary, options.dry_run),
    }
    Ok(())
}

fn print_text_output(summary: &ReconcileSummary, dry_run: bool) {
    println!("Reconciliation{}", if dry_run { " (dry run)" } else { "" });
    println!("==============");
    println!();
    println!("Listing:");
    println!("  Pages:           {}", summary.pages);
    println!("  Records seen:    {}", summary.records_seen);
    println!("  Not opted in:    {}", summary.skipped_opt_out);
    println!("  Record errors:   {}", summary.record_errors);
    println!();
    println!("Local items:");
    println!("  Created:         {}", summary.created);
    println!("  Updated:         {}", summary.updated);
    println!("  Unchanged:       {}", summary.unchanged);
    println!("  Deleted:         {}", summary.deleted);
    if summary.deletions_deferred {
        println!("  (some deletions deferred to the next pass)");
    }
    println!();
    println!("Pushes:");
    println!("  Pushed:          {}", summary.pushed);
    println!("  Failed:          {}", summary.push_failures);
    println!();
    println!(
        "{} local items, {} remote records, {} ms",
        summary.local_items, summary.remote_records, summary.duration_ms
    );
}
