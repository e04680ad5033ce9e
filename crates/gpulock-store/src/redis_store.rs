//! Redis-backed lock store

use async_trait::async_trait;
use gpulock_core::{GpulockError, GpulockResult};
use redis::aio::MultiplexedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::traits::LockStore;

/// Deletes KEYS[1] only while it still holds ARGV[1]
const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Lock store talking to one Redis server
///
/// The connection is opened by `connect` and shared afterwards. The quorum
/// client connects outside the per-store timeout, so only the commands
/// themselves are bounded by it.
pub struct RedisStore {
    url: String,
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    unlock_script: redis::Script,
}

impl RedisStore {
    /// Create a store for `url` (`redis://host:port` or `redis+unix:///path`)
    pub fn open(url: &str) -> GpulockResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GpulockError::Config(format!("Invalid store '{}': {}", url, e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
            connection: OnceCell::new(),
            unlock_script: redis::Script::new(COMPARE_AND_DELETE),
        })
    }

    async fn connection(&self) -> GpulockResult<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                debug!(store = %self.url, "Connecting to lock store");
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| store_error(&self.url, e))
            })
            .await?;
        Ok(conn.clone())
    }
}

fn store_error(url: &str, err: redis::RedisError) -> GpulockError {
    GpulockError::Store(format!("{}: {}", url, err))
}

#[async_trait]
impl LockStore for RedisStore {
    async fn connect(&self) -> GpulockResult<()> {
        self.connection().await.map(|_| ())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> GpulockResult<bool> {
        let mut conn = self.connection().await?;
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error(&self.url, e))?;

        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> GpulockResult<bool> {
        let mut conn = self.connection().await?;

        let deleted: i64 = self
            .unlock_script
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| store_error(&self.url, e))?;

        Ok(deleted > 0)
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// Open one store per configured endpoint
pub fn open_stores(urls: &[String]) -> GpulockResult<Vec<Arc<dyn LockStore>>> {
    urls.iter()
        .map(|url| RedisStore::open(url).map(|s| Arc::new(s) as Arc<dyn LockStore>))
        .collect()
}
