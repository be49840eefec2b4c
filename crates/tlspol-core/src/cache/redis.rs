//! Redis/Valkey implementation of the cache store

use super::KvStore;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tlspol_common::config::RedisConfig;
use tlspol_common::{Error, Result};

/// [`KvStore`] over a Redis-compatible backend
///
/// The connection manager multiplexes one connection and reconnects on
/// failure; clones share it.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify the backend is reachable
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let url = if config.password.is_empty() {
            format!("redis://{}/{}", config.address, config.db)
        } else {
            format!("redis://:{}@{}/{}", config.password, config.address, config.db)
        };

        let client = redis::Client::open(url)
            .map_err(|e| Error::Cache(format!("invalid Redis address: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Cache(format!("could not connect to Redis: {e}")))?;

        Ok(Self { conn })
    }
}

fn cache_err(e: redis::RedisError) -> Error {
    Error::Cache(e.to_string())
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(cache_err)
    }

    async fn set(&self, key: &str, value: &str, expire: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match expire {
            Some(expire) => conn
                .set_ex::<_, _, ()>(key, value, expire.as_secs().max(1))
                .await
                .map_err(cache_err),
            None => conn.set::<_, _, ()>(key, value).await.map_err(cache_err),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(cache_err)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(format!("{prefix}*")).await.map_err(cache_err)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await.map_err(cache_err)?;
        // -1 is "no expiry", -2 "no such key"
        Ok(if ttl >= 0 { Some(ttl as u64) } else { None })
    }
}
