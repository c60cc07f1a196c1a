use super::KvStore;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Expired entries are swept at most this often, on the next write.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Entries {
    map: HashMap<String, Entry>,
    last_sweep: Option<Instant>,
}

impl Entries {
    /// Drop everything that has expired, unless a sweep ran recently.
    fn sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|at| now.duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }

        let before = self.map.len();
        self.map.retain(|_, entry| entry.is_live(now));
        self.last_sweep = Some(now);

        let evicted = before - self.map.len();
        if evicted > 0 {
            tracing::debug!("[Store] evicted {evicted} expired keys from memory");
        }
    }
}

/// In-process store. Every operation runs under one lock, which makes `set_nx_ex` and `incr`
/// atomic the same way they are on redis. Expiry follows the tokio clock, so tests can pause
/// and advance time.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Entries>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock is poisoned"))
    }

    fn read(entries: &HashMap<String, Entry>, key: &str, now: Instant) -> Option<String> {
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        if entries.map.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.map.remove(key);
            return Ok(None);
        }
        Ok(Self::read(&entries.map, key, now))
    }

    async fn mget(&self, keys: &[String]) -> anyhow::Result<Vec<Option<String>>> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| Self::read(&entries.map, key, now))
            .collect())
    }

    async fn incr(&self, key: &str) -> anyhow::Result<i64> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.sweep(now);

        let (current, expires_at) = match entries.map.get(key).filter(|e| e.is_live(now)) {
            Some(entry) => {
                let n = entry.value.parse::<i64>().map_err(|_| {
                    anyhow::anyhow!("value of `{key}` is not an integer or out of range")
                })?;
                (n, entry.expires_at)
            }
            None => (0, None),
        };

        let next = current + 1;
        entries.map.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.sweep(now);

        if entries.map.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }

        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        entries.sweep(now);

        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }
}
