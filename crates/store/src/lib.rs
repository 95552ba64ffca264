//! Defaultable store: the last-value cache contract, an in-RAM backend, and
//! the fail-open call helpers the resolver and recorder go through.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use defaultable_core::RawValue;
use metrics::counter;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// TTL-capable key-value cache for remembered values.
pub trait LastValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<RawValue>>;
    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()>;
}

impl<T: LastValueStore + ?Sized> LastValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<RawValue>> { (**self).get(key) }
    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()> { (**self).put(key, value, ttl) }
}

impl<T: LastValueStore + ?Sized> LastValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<RawValue>> { (**self).get(key) }
    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()> { (**self).put(key, value, ttl) }
}

impl<T: LastValueStore + ?Sized> LastValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<RawValue>> { (**self).get(key) }
    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()> { (**self).put(key, value, ttl) }
}

/// Read a remembered value; backend errors count as a miss.
pub fn fetch_or_miss<S: LastValueStore + ?Sized>(store: &S, key: &str) -> Option<RawValue> {
    match store.get(key) {
        Ok(Some(v)) => {
            counter!("lastvalue_get_total", 1u64, "outcome" => "hit");
            Some(v)
        }
        Ok(None) => {
            counter!("lastvalue_get_total", 1u64, "outcome" => "miss");
            None
        }
        Err(e) => {
            counter!("lastvalue_get_total", 1u64, "outcome" => "error");
            warn!(key = %key, error = %e, "last value lookup failed; treating as miss");
            None
        }
    }
}

/// Remember a value; backend errors are logged and dropped. Returns whether the write landed.
pub fn put_or_log<S: LastValueStore + ?Sized>(store: &S, key: &str, value: &RawValue, ttl: Duration) -> bool {
    match store.put(key, value, ttl) {
        Ok(()) => {
            counter!("lastvalue_put_total", 1u64);
            true
        }
        Err(e) => {
            counter!("lastvalue_put_errors_total", 1u64);
            warn!(key = %key, error = %e, "failed to remember last value");
            false
        }
    }
}

/// Live entries at which `put` first sweeps expired ones; doubles as the map grows.
const PRUNE_FLOOR: usize = 64;

/// In-process store. Expired entries read as a miss and are dropped on that read;
/// `put` sweeps the rest once the map outgrows its last swept size.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    map: FxHashMap<String, (RawValue, Option<Instant>)>,
    prune_at: usize,
}

impl Entries {
    fn purge(&mut self, now: Instant) -> usize {
        let before = self.map.len();
        self.map.retain(|_, (_, expires)| live(*expires, now));
        self.prune_at = (self.map.len() * 2).max(PRUNE_FLOOR);
        before - self.map.len()
    }
}

/// `None` means the TTL ran past what `Instant` can represent: never expires.
fn live(expires: Option<Instant>, now: Instant) -> bool {
    expires.map_or(true, |at| at > now)
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Entries held, expired ones included until they are read or swept.
    pub fn len(&self) -> usize { self.entries().map.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn purge_expired(&self) -> usize {
        let purged = self.entries().purge(Instant::now());
        if purged > 0 { debug!(purged, "purged expired last values"); }
        purged
    }

    /// Ignores poisoning; each mutation is one insert, remove or retain.
    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LastValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<RawValue>> {
        let mut entries = self.entries();
        let Some((value, expires)) = entries.map.get(key) else { return Ok(None) };
        if live(*expires, Instant::now()) {
            return Ok(Some(value.clone()));
        }
        entries.map.remove(key);
        Ok(None)
    }

    fn put(&self, key: &str, value: &RawValue, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries();
        if entries.map.len() >= entries.prune_at.max(PRUNE_FLOOR) {
            let purged = entries.purge(now);
            if purged > 0 { debug!(purged, "swept expired last values"); }
        }
        entries.map.insert(key.to_string(), (value.clone(), now.checked_add(ttl)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct Broken;

    impl LastValueStore for Broken {
        fn get(&self, _key: &str) -> Result<Option<RawValue>> { Err(anyhow!("connection reset")) }
        fn put(&self, _key: &str, _value: &RawValue, _ttl: Duration) -> Result<()> { Err(anyhow!("timed out")) }
    }

    #[test]
    fn put_then_get() {
        let s = MemoryStore::new();
        s.put("k", &RawValue::scalar(5), Duration::from_secs(60)).unwrap();
        assert_eq!(s.get("k").unwrap(), Some(RawValue::scalar(5)));
        assert_eq!(s.get("other").unwrap(), None);
    }

    #[test]
    fn later_put_overwrites() {
        let s = MemoryStore::new();
        s.put("k", &RawValue::scalar(1), Duration::from_secs(60)).unwrap();
        s.put("k", &RawValue::scalar(2), Duration::from_secs(60)).unwrap();
        assert_eq!(s.get("k").unwrap(), Some(RawValue::scalar(2)));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let s = MemoryStore::new();
        s.put("k", &RawValue::scalar(1), Duration::ZERO).unwrap();
        assert_eq!(s.get("k").unwrap(), None);
        assert_eq!(s.purge_expired(), 1);
        assert!(s.is_empty());
    }

    #[test]
    fn expired_entry_is_dropped_when_read() {
        let s = MemoryStore::new();
        s.put("old", &RawValue::scalar(1), Duration::ZERO).unwrap();
        s.put("new", &RawValue::scalar(2), Duration::from_secs(60)).unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get("old").unwrap(), None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("new").unwrap(), Some(RawValue::scalar(2)));
    }

    #[test]
    fn put_sweeps_expired_entries_once_grown() {
        let s = MemoryStore::new();
        for i in 0..PRUNE_FLOOR {
            s.put(&format!("stale{}", i), &RawValue::scalar(i as i64), Duration::ZERO).unwrap();
        }
        assert_eq!(s.len(), PRUNE_FLOOR);
        s.put("fresh", &RawValue::scalar("x"), Duration::from_secs(60)).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("fresh").unwrap(), Some(RawValue::scalar("x")));
    }

    #[test]
    fn oversized_ttl_never_expires() {
        let s = MemoryStore::new();
        s.put("k", &RawValue::scalar(1), Duration::MAX).unwrap();
        s.put("j", &RawValue::scalar(2), Duration::from_secs(u64::MAX)).unwrap();
        assert_eq!(s.get("k").unwrap(), Some(RawValue::scalar(1)));
        assert_eq!(s.get("j").unwrap(), Some(RawValue::scalar(2)));
        assert_eq!(s.purge_expired(), 0);
    }

    #[test]
    fn poisoned_lock_keeps_serving() {
        let s = Arc::new(MemoryStore::new());
        s.put("k", &RawValue::scalar(1), Duration::from_secs(60)).unwrap();
        let held = Arc::clone(&s);
        let _ = std::thread::spawn(move || {
            let _guard = held.inner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();
        assert!(s.inner.is_poisoned());
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("k").unwrap(), Some(RawValue::scalar(1)));
    }

    #[test]
    fn helpers_fail_open() {
        assert_eq!(fetch_or_miss(&Broken, "k"), None);
        assert!(!put_or_log(&Broken, "k", &RawValue::Null, Duration::from_secs(1)));

        let s = Arc::new(MemoryStore::new());
        assert!(put_or_log(&s, "k", &RawValue::scalar("x"), Duration::from_secs(60)));
        assert_eq!(fetch_or_miss(&s, "k"), Some(RawValue::scalar("x")));
    }
}
