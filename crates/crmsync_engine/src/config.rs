//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// The synchronized entity type and its capabilities.
    pub entity: EntityConfig,
    /// Number of remote records requested per page.
    pub page_size: u32,
    /// Ordering clause sent with each listing request.
    pub order_by: String,
    /// Echo-suppression windows for the incremental path.
    pub echo: EchoWindows,
    /// Interval for the periodic reconciliation pass.
    pub sync_interval: Option<Duration>,
    /// Whether incremental pushes require the host's current view to match
    /// the entity type.
    pub require_current_view: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given entity type.
    pub fn new(entity: EntityConfig) -> Self {
        Self {
            entity,
            page_size: 20,
            order_by: "date_entered DESC".into(),
            echo: EchoWindows::default(),
            sync_interval: None,
            require_current_view: true,
        }
    }

    /// Sets the listing page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the listing order clause.
    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }

    /// Sets the echo-suppression windows.
    pub fn with_echo_windows(mut self, echo: EchoWindows) -> Self {
        self.echo = echo;
        self
    }

    /// Sets the interval for automatic reconciliation.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets whether the current-view gate applies.
    pub fn with_require_current_view(mut self, require: bool) -> Self {
        self.require_current_view = require;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(EntityConfig::contacts())
    }
}

/// Per-entity-type capabilities.
///
/// Variants between entity types are expressed here as data rather than
/// as code branches in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityConfig {
    /// Remote module name, e.g. `Contacts`.
    pub module: String,
    /// Administrative switch for pushing local items to the remote side.
    pub sync_enabled: bool,
    /// Whether deleting a local item deletes its remote counterpart.
    pub propagates_local_deletions: bool,
}

impl EntityConfig {
    /// Creates an entity configuration with syncing enabled and local
    /// deletions not propagated.
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            sync_enabled: true,
            propagates_local_deletions: false,
        }
    }

    /// The contact entity type.
    pub fn contacts() -> Self {
        Self::new("Contacts")
    }

    /// Sets the administrative sync switch.
    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    /// Sets whether local deletions are pushed to the remote side.
    pub fn with_local_deletion_propagation(mut self, propagate: bool) -> Self {
        self.propagates_local_deletions = propagate;
        self
    }
}

/// Wall-clock windows used to tell the engine's own saves apart from user
/// edits.
///
/// This is a heuristic. It assumes the local store delivers the change
/// notification for a program-initiated save within `debounce`. Elapsed
/// time is compared in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoWindows {
    /// Edits closer than this to the last sync are not pushed.
    pub debounce: Duration,
    /// After this long an item is considered settled and the pending
    /// counter is cleared.
    pub settle: Duration,
}

impl EchoWindows {
    /// Creates a window pair.
    pub fn new(debounce: Duration, settle: Duration) -> Self {
        Self { debounce, settle }
    }
}

impl Default for EchoWindows {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(5))
    }
}
