//! Page view counting per project.
//!
//! A view is registered with [`ViewCounter::try_increment_view`]. When a visitor identifier is
//! given, the visitor is only counted once per project inside [`DEDUP_WINDOW`]: a marker key is
//! created with `SET NX EX` and only the request that creates it increments the counter.

use crate::store::{parse_int, KvStore};
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEDUP_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

fn count_key(slug: &str) -> String {
    format!("pageviews:projects:{slug}")
}

fn dedup_key(visitor_digest: &str, slug: &str) -> String {
    format!("deduplicate:{visitor_digest}:{slug}")
}

#[derive(Clone)]
pub struct ViewCounter {
    store: Arc<dyn KvStore>,
    salt: String,
}

impl ViewCounter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            salt: String::new(),
        }
    }

    /// Prefix every visitor identifier with `salt` before hashing it.
    pub fn with_salt(self, salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            ..self
        }
    }

    /// Hex encoded SHA-256 of the salted visitor identifier. The raw identifier never reaches the
    /// store.
    pub fn visitor_digest(&self, visitor: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(visitor.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub async fn get_count(&self, slug: &str) -> anyhow::Result<u64> {
        let key = count_key(slug);
        let raw = self
            .store
            .get(&key)
            .await
            .with_context(|| format!("fail to read view count of `{slug}`"))?;
        Ok(to_count(parse_int(&key, raw)))
    }

    /// Read the counts of all `slugs` in one round trip. Unset projects read as zero.
    pub async fn get_counts<S: AsRef<str>>(&self, slugs: &[S]) -> anyhow::Result<HashMap<String, u64>> {
        if slugs.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = slugs.iter().map(|s| count_key(s.as_ref())).collect();
        let values = self
            .store
            .mget(&keys)
            .await
            .with_context(|| format!("fail to read view counts of {} projects", slugs.len()))?;

        Ok(slugs
            .iter()
            .zip(keys.iter().zip(values))
            .map(|(slug, (key, raw))| (slug.as_ref().to_string(), to_count(parse_int(key, raw))))
            .collect())
    }

    /// Register one view of `slug` and return the count afterwards.
    ///
    /// With a `visitor`, the count only moves if this visitor has not been seen for this project
    /// within the last 24 hours; otherwise the current count is returned untouched. If the marker
    /// is written but the increment then fails, the visitor's window is spent without a view
    /// being counted.
    pub async fn try_increment_view(&self, slug: &str, visitor: Option<&str>) -> anyhow::Result<u64> {
        if let Some(visitor) = visitor {
            let marker = dedup_key(&self.visitor_digest(visitor), slug);
            let first_seen = self
                .store
                .set_nx_ex(&marker, "1", DEDUP_WINDOW)
                .await
                .with_context(|| format!("fail to write dedup marker for `{slug}`"))?;

            if !first_seen {
                tracing::debug!("[Views] duplicate view of `{slug}` ignored");
                return self.get_count(slug).await;
            }
        }

        let count = self
            .store
            .incr(&count_key(slug))
            .await
            .with_context(|| format!("fail to increment view count of `{slug}`"))?;
        Ok(to_count(Some(count)))
    }
}

fn to_count(n: Option<i64>) -> u64 {
    n.and_then(|n| u64::try_from(n).ok()).unwrap_or(0)
}
