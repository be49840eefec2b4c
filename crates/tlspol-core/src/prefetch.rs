//! Proactive cache refresh
//!
//! A single background loop scans the cache for entries whose backend TTL
//! dropped into the prefetch window, re-runs the resolver for the stored
//! domain and rewrites the entry. Temporary failures are written back with
//! the TTL floor so the window closes and the read path hits fresh cache
//! again instead of recomputing on every query.

use crate::cache::{CacheEntry, PolicyCache};
use crate::policy::resolver::PolicyResolver;
use crate::policy::Verdict;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Sweep cadence; well below the prefetch margin so no refreshable entry
/// can fall off the backend between two sweeps
pub const PREFETCH_INTERVAL: Duration = Duration::from_secs(30);

/// Background refresher for near-expired cache entries
pub struct Prefetcher {
    cache: PolicyCache,
    resolver: Arc<PolicyResolver>,
}

impl Prefetcher {
    pub fn new(cache: PolicyCache, resolver: Arc<PolicyResolver>) -> Self {
        Self { cache, resolver }
    }

    /// Run the sweep loop forever
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(PREFETCH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {}
                Ok(count) => debug!("prefetched {count} policies"),
                Err(e) => warn!("prefetch sweep failed: {e}"),
            }
        }
    }

    /// Refresh every entry currently inside the prefetch window
    pub async fn sweep(&self) -> tlspol_common::Result<usize> {
        let due = self.cache.expiring().await?;
        let count = due.len();
        for entry in due {
            self.refresh(entry).await;
        }
        Ok(count)
    }

    async fn refresh(&self, entry: CacheEntry) {
        let resolution = self.resolver.resolve(&entry.domain).await;

        if resolution.verdict == Verdict::Temp {
            debug!(
                "prefetch for {:?} failed temporarily, caching the failure",
                entry.domain
            );
        } else {
            info!(
                "prefetched policy for {:?}: {:?} (ttl {}s)",
                entry.domain,
                resolution.verdict.directive(),
                resolution.ttl
            );
        }

        let fresh = CacheEntry::from_resolution(&entry.domain, &resolution);
        if let Err(e) = self.cache.store_entry(&fresh).await {
            warn!("could not rewrite cache entry for {:?}: {e}", entry.domain);
        }
    }
}
