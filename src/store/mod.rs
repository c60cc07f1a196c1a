//! Key-value store used by the view counter and the star cache.
//!
//! Two implementations exist: [`RedisStore`] for production and [`MemoryStore`] for local
//! development and tests. Both give the same guarantees for [`KvStore::set_nx_ex`], which is
//! the only primitive the visitor deduplication relies on.

mod memory;
mod remote;
mod retry;

use std::time::Duration;

pub use memory::MemoryStore;
pub use remote::RedisStore;
pub use retry::RetryPolicy;

#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Read the raw value of `key`, `None` if the key does not exist or has expired.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Batched [`KvStore::get`]. The result has the same length and order as `keys`.
    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>>;

    /// Atomically increment the integer at `key` by one and return the new value. A missing key
    /// counts as zero. Implementations must not resend the command once it may have reached the
    /// server, so N successful calls move the value by exactly N.
    async fn incr(&self, key: &str) -> anyhow::Result<i64>;

    /// Write `value` to `key` with the given expiry, but only when the key does not exist.
    /// Return `true` if the key was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool>;

    /// Unconditionally write `value` to `key` with the given expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    /// Release the underlying connection. Later calls may reconnect.
    async fn shutdown(&self) {}
}

/// Parse an integer stored by [`KvStore::incr`] or [`KvStore::set_ex`]. Garbage reads as `None`.
pub(crate) fn parse_int(key: &str, raw: Option<String>) -> Option<i64> {
    let raw = raw?;
    match raw.trim().parse::<i64>() {
        Ok(n) => Some(n),
        Err(err) => {
            tracing::warn!("value of `{key}` is not an integer ({raw:?}): {err}");
            None
        }
    }
}

#[test]
fn parse_stored_integers() {
    assert_eq!(parse_int("k", Some("42".to_string())), Some(42));
    assert_eq!(parse_int("k", Some(" 7 ".to_string())), Some(7));
    assert_eq!(parse_int("k", Some("seven".to_string())), None);
    assert_eq!(parse_int("k", None), None);
}
