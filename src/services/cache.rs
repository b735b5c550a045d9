//! Schema cache client
//!
//! Thin redis wrapper with JSON serialization. Any redis failure flips the
//! client into fallback mode: an in-process map serves all subsequent
//! traffic and cache errors are never surfaced to callers.

use crate::config::RedisConfig;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

pub struct CacheClient {
    cfg: RedisConfig,
    conn: Mutex<Option<MultiplexedConnection>>,
    fallback: Mutex<HashMap<String, Value>>,
    unavailable: AtomicBool,
}

impl CacheClient {
    pub fn new(cfg: RedisConfig) -> Self {
        Self {
            cfg,
            conn: Mutex::new(None),
            fallback: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn get_json(&self, key: &str) -> Option<Value> {
        if self.unavailable.load(Ordering::Relaxed) {
            return self.fallback.lock().await.get(key).cloned();
        }
        let mut conn = match self.ensure().await {
            Ok(conn) => conn,
            Err(e) => {
                self.mark_unavailable("connect", &e);
                return self.fallback.lock().await.get(key).cloned();
            },
        };
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(payload)) => serde_json::from_str(&payload).ok(),
            Ok(None) => None,
            Err(e) => {
                self.mark_unavailable("get", &e);
                self.fallback.lock().await.get(key).cloned()
            },
        }
    }

    pub async fn set_json(&self, key: &str, value: Value, ttl_seconds: u64) {
        if self.unavailable.load(Ordering::Relaxed) {
            self.fallback.lock().await.insert(key.to_string(), value);
            return;
        }
        let payload = value.to_string();
        let mut conn = match self.ensure().await {
            Ok(conn) => conn,
            Err(e) => {
                self.mark_unavailable("connect", &e);
                self.fallback.lock().await.insert(key.to_string(), value);
                return;
            },
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await {
            self.mark_unavailable("set", &e);
            self.fallback.lock().await.insert(key.to_string(), value);
        }
    }

    async fn ensure(&self) -> redis::RedisResult<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let client = redis::Client::open(self.cfg.url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn mark_unavailable(&self, op: &str, err: &redis::RedisError) {
        if !self.unavailable.swap(true, Ordering::Relaxed) {
            tracing::warn!("Redis {} failed, switching to in-memory cache: {}", op, err);
        }
    }
}
