//! TTL-scoped verdict cache
//!
//! Verdicts are stored under `TLSPOL-<base32(sha256(domain))>` as small JSON
//! records. The backend expiry runs [`PREFETCH_MARGIN`] seconds past the
//! logical TTL (minus a random smear) so the prefetcher can still see an
//! entry after readers stop trusting it. A schema tag under
//! `TLSPOL-schema` guards the entry format; entries are regenerable, so a
//! mismatch wipes and refills instead of migrating.

pub mod redis;

#[cfg(test)]
pub(crate) mod memory;

use crate::policy::resolver::Resolution;
use crate::policy::Verdict;
use async_trait::async_trait;
use data_encoding::BASE32_NOPAD;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tlspol_common::{Error, Result};
use tracing::{info, warn};

/// Prefix shared by every cache key, the schema tag included
pub const CACHE_KEY_PREFIX: &str = "TLSPOL-";

/// Key holding the entry-format tag
pub const SCHEMA_KEY: &str = "TLSPOL-schema";

/// Compiled-in entry-format tag; bump on incompatible changes
pub const DB_SCHEMA: &str = "1";

/// Seconds of backend lifetime past the logical TTL; also the lead window
/// in which the read path recomputes instead of serving a near-expired hit
pub const PREFETCH_MARGIN: u32 = 300;

/// Upper bound of the random expiry smear
const EXPIRY_JITTER: u32 = 60;

/// Derive the cache key for a domain
pub fn cache_key(domain: &str) -> String {
    let hash = Sha256::digest(domain.to_ascii_lowercase().as_bytes());
    format!("{CACHE_KEY_PREFIX}{}", BASE32_NOPAD.encode(&hash))
}

/// Backend expiry for a logical TTL: `ttl + margin − jitter`, jitter
/// uniform in `[0, 60)` to decorrelate herd expiry
pub fn backend_ttl(logical_ttl: u32) -> u64 {
    let jitter = rand::thread_rng().gen_range(0..EXPIRY_JITTER);
    logical_ttl as u64 + PREFETCH_MARGIN as u64 - jitter as u64
}

/// One cached verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Queried domain, case-folded
    #[serde(rename = "d")]
    pub domain: String,
    /// Directive string; empty for "no policy", `TEMP` for failures
    #[serde(rename = "r")]
    pub result: String,
    /// TLSRPT fragment, empty when absent
    #[serde(rename = "p", default)]
    pub report: String,
    /// Logical TTL the verdict was stored with
    #[serde(rename = "t")]
    pub ttl: u32,
}

impl CacheEntry {
    pub fn from_resolution(domain: &str, resolution: &Resolution) -> Self {
        Self {
            domain: domain.to_string(),
            result: resolution.verdict.directive().to_string(),
            report: resolution.report.clone().unwrap_or_default(),
            ttl: resolution.ttl,
        }
    }

    pub fn verdict(&self) -> Verdict {
        Verdict::from_directive(&self.result)
    }
}

/// Outcome of a cache read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Entry still inside its logical TTL; `remaining` is what is left of it
    Hit { entry: CacheEntry, remaining: u32 },
    /// Nothing usable; the caller resolves afresh
    Miss,
}

/// Narrow TTL-aware key/value interface over the cache backend
///
/// `ttl` returns `None` for missing keys and keys without expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn ttl(&self, key: &str) -> Result<Option<u64>>;
}

/// Verdict cache over an arbitrary [`KvStore`]
#[derive(Clone)]
pub struct PolicyCache {
    store: Arc<dyn KvStore>,
}

impl PolicyCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Read the cached verdict for a domain
    ///
    /// Entries inside the prefetch window are reported as a miss: the
    /// prefetcher normally refreshed them already, and the read path must
    /// not serve a nearly expired answer.
    pub async fn lookup(&self, domain: &str) -> Result<CacheLookup> {
        let key = cache_key(domain);

        let Some(raw) = self.store.get(&key).await? else {
            return Ok(CacheLookup::Miss);
        };
        let Some(backend_remaining) = self.store.ttl(&key).await? else {
            return Ok(CacheLookup::Miss);
        };
        if backend_remaining <= PREFETCH_MARGIN as u64 {
            return Ok(CacheLookup::Miss);
        }

        let entry: CacheEntry = serde_json::from_str(&raw)
            .map_err(|e| Error::Cache(format!("undecodable cache entry for {key}: {e}")))?;

        Ok(CacheLookup::Hit {
            entry,
            remaining: (backend_remaining - PREFETCH_MARGIN as u64) as u32,
        })
    }

    /// Write a verdict with the jittered backend expiry
    pub async fn store_entry(&self, entry: &CacheEntry) -> Result<()> {
        let key = cache_key(&entry.domain);
        let value = serde_json::to_string(entry)
            .map_err(|e| Error::Cache(format!("unencodable cache entry: {e}")))?;
        self.store
            .set(
                &key,
                &value,
                Some(Duration::from_secs(backend_ttl(entry.ttl))),
            )
            .await
    }

    /// Delete every `TLSPOL-*` key and rewrite the schema tag
    pub async fn purge(&self) -> Result<usize> {
        let keys = self.store.list(CACHE_KEY_PREFIX).await?;
        let mut purged = 0;
        for key in &keys {
            self.store.delete(key).await?;
            purged += 1;
        }
        self.store.set(SCHEMA_KEY, DB_SCHEMA, None).await?;
        Ok(purged)
    }

    /// Wipe the cache when the stored schema tag does not match
    pub async fn ensure_schema(&self) -> Result<()> {
        let current = self.store.get(SCHEMA_KEY).await?;
        if current.as_deref() != Some(DB_SCHEMA) {
            info!(
                "cache schema {:?} != {:?}, purging",
                current.as_deref().unwrap_or(""),
                DB_SCHEMA
            );
            self.purge().await?;
        }
        Ok(())
    }

    /// Entries whose backend TTL has fallen into the refresh window
    pub async fn expiring(&self) -> Result<Vec<CacheEntry>> {
        let mut due = Vec::new();
        for key in self.store.list(CACHE_KEY_PREFIX).await? {
            if key == SCHEMA_KEY {
                continue;
            }
            let Some(remaining) = self.store.ttl(&key).await? else {
                continue;
            };
            if remaining > PREFETCH_MARGIN as u64 {
                continue;
            }
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) => due.push(entry),
                Err(e) => warn!("dropping undecodable cache entry {key}: {e}"),
            }
        }
        Ok(due)
    }
}
