//! In-memory [`KvStore`] used by the test suite
//!
//! [`KvStore`]: super::KvStore

use super::KvStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tlspol_common::Result;

#[derive(Default)]
pub(crate) struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryStore {
    fn prune(entries: &mut HashMap<String, (String, Option<Instant>)>) {
        let now = Instant::now();
        entries.retain(|_, (_, expiry)| expiry.map_or(true, |at| at > now));
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> Result<()> {
        let expiry = expire.map(|d| Instant::now() + d);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), expiry));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);
        Ok(entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut entries = self.entries.lock().unwrap();
        Self::prune(&mut entries);
        let now = Instant::now();
        Ok(entries.get(key).and_then(|(_, expiry)| {
            expiry.map(|at| at.saturating_duration_since(now).as_secs())
        }))
    }
}
