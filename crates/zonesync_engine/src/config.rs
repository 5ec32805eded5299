//! Configuration for the sync engine.

use zonesync_protocol::ZoneId;

/// Zone the engine provisions and syncs when nothing else is configured.
pub const DEFAULT_ZONE_NAME: &str = "Todos";

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Zone created in the private database during setup.
    pub default_zone: ZoneId,
    /// Subscription ID for private database change notifications.
    pub private_subscription_id: String,
    /// Subscription ID for shared database change notifications.
    pub shared_subscription_id: String,
    /// Upper bound on zones fetched concurrently within one sync.
    pub max_concurrent_zones: usize,
    /// Whether setup creates the default zone.
    pub provision_default_zone: bool,
}

impl SyncConfig {
    /// Creates a configuration for the given default zone.
    pub fn new(default_zone: ZoneId) -> Self {
        Self {
            default_zone,
            private_subscription_id: "private-changes".into(),
            shared_subscription_id: "share-changes".into(),
            max_concurrent_zones: 4,
            provision_default_zone: true,
        }
    }

    /// Sets the subscription IDs used during setup.
    pub fn with_subscription_ids(
        mut self,
        private: impl Into<String>,
        shared: impl Into<String>,
    ) -> Self {
        self.private_subscription_id = private.into();
        self.shared_subscription_id = shared.into();
        self
    }

    /// Sets the zone fan-out limit. Values below 1 are raised to 1.
    pub fn with_max_concurrent_zones(mut self, limit: usize) -> Self {
        self.max_concurrent_zones = limit.max(1);
        self
    }

    /// Enables or disables default zone creation during setup.
    pub fn with_default_zone_provisioning(mut self, enabled: bool) -> Self {
        self.provision_default_zone = enabled;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(ZoneId::owned(DEFAULT_ZONE_NAME))
    }
}
