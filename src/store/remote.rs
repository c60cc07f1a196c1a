use super::{KvStore, RetryPolicy};
use anyhow::Context;
use redis::{
    aio::{ConnectionManager, ConnectionManagerConfig},
    AsyncCommands, Client, RedisError, RedisResult,
};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A process-wide redis handle. The connection is established on first use and shared by every
/// caller afterwards; [`KvStore::shutdown`] drops it.
pub struct RedisStore {
    client: Client,
    retry: RetryPolicy,
    conn: Mutex<Option<ConnectionManager>>,
}

fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// The command never reached the server. Only these failures may resend a non-idempotent command.
fn was_not_sent(err: &RedisError) -> bool {
    err.is_connection_refusal()
}

fn seconds(ttl: Duration) -> u64 {
    // EX 0 is rejected by redis
    ttl.as_secs().max(1)
}

impl RedisStore {
    /// Parse the connection url. No connection is made here.
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url).with_context(|| "fail to parse redis connection url")?;
        Ok(Self {
            client,
            retry: RetryPolicy::default(),
            conn: Mutex::new(None),
        })
    }

    pub fn with_retry(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    async fn connection(&self) -> anyhow::Result<ConnectionManager> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        // Reconnects after a dropped connection are left to our own retry loop.
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(CONNECT_TIMEOUT);

        let conn = self
            .retry
            .run("connect", is_connection_error, || {
                self.client.get_connection_manager_with_config(config.clone())
            })
            .await
            .with_context(|| {
                format!(
                    "fail to connect to redis after {} attempts",
                    self.retry.max_attempts
                )
            })?;

        tracing::info!("[Store] connected to redis");
        slot.replace(conn.clone());
        Ok(conn)
    }

    async fn exec<T, F, Fut>(&self, what: &str, op: F) -> anyhow::Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        self.exec_with(what, is_connection_error, op).await
    }

    async fn exec_with<T, F, Fut>(
        &self,
        what: &str,
        retryable: fn(&RedisError) -> bool,
        op: F,
    ) -> anyhow::Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let conn = self.connection().await?;
        self.retry
            .run(what, retryable, || op(conn.clone()))
            .await
            .with_context(|| format!("fail to make {what} request to redis"))
    }
}

#[async_trait::async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.exec("GET", move |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        self.exec("MGET", move |mut conn| async move {
            conn.mget::<_, Vec<Option<String>>>(keys).await
        })
        .await
    }

    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        // a dropped connection or a timeout may hide an INCR the server already applied
        self.exec_with("INCR", was_not_sent, move |mut conn| async move {
            conn.incr::<_, _, i64>(key, 1).await
        })
        .await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let reply: redis::Value = self
            .exec("SET NX EX", move |mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(seconds(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        // nil reply means the key already existed
        Ok(!matches!(reply, redis::Value::Nil))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.exec("SETEX", move |mut conn| async move {
            conn.set_ex::<_, _, ()>(key, value, seconds(ttl)).await
        })
        .await
    }

    async fn shutdown(&self) {
        if self.conn.lock().await.take().is_some() {
            tracing::info!("[Store] redis connection released");
        }
    }
}
