use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Process-scoped keyed store with a fixed TTL and lazy eviction.
///
/// Owned by the server state and passed by capability to handlers. Two
/// instances exist: probed origin headers (`<url>#Headers`) and per-URL work
/// pools (`<url>#Workpool`).
#[derive(Debug)]
pub struct TtlStore<V> {
    ttl: Duration,
    inner: Mutex<HashMap<String, Entry<V>>>,
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V: Clone> TtlStore<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut map = self.inner.lock();
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let now = Instant::now();
        let mut map = self.inner.lock();
        map.retain(|_, entry| entry.expires_at > now);
        map.insert(
            key.into(),
            Entry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }
        let value = make();
        self.insert(key, value.clone());
        value
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.lock();
        map.retain(|_, entry| entry.expires_at > now);
        map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
