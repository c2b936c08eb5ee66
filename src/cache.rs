// Short-lived cache for read responses (slot listings).
//
// Entries are keyed "{service}:{operation}" and expire after a TTL. Writes to
// a service invalidate every cached read for it by key prefix and bump the
// service's generation, so a read that was in flight across the write can
// tell its response is stale and skip storing it.

use std::{
    collections::{BTreeMap, HashSet},
    time::Duration,
};

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub size_bytes: usize,
    pub items_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub invalidated_count: usize,
}

// Key for a cached read
pub fn cache_key(service: &str, operation: &str) -> String {
    format!("{}:{}", service, operation)
}

// Deadline for entries stored at `now`; saturates instead of overflowing
pub(crate) fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| far_future(now))
}

fn far_future(now: Instant) -> Instant {
    // roughly 30 years, as tokio does for its own "never" deadline
    now + Duration::from_secs(86400 * 365 * 30)
}

pub fn calculate_item_size(key: &str, data: &[u8]) -> usize {
    key.len() + data.len() + std::mem::size_of::<Instant>()
}

struct CacheEntry {
    value: Bytes,
    expires_at: Instant,
}

pub struct ResponseCache {
    store: DashMap<String, CacheEntry>,
    default_ttl: Duration,
    stats: RwLock<CacheStats>,
    // deadline -> keys stored with that deadline; kept in step with `store`
    // under the store's shard lock
    expiry_index: RwLock<BTreeMap<Instant, HashSet<String>>>,
    // service -> number of invalidations so far
    generations: DashMap<String, u64>,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            store: DashMap::new(),
            default_ttl,
            stats: RwLock::new(CacheStats::default()),
            expiry_index: RwLock::new(BTreeMap::new()),
            generations: DashMap::new(),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    // Cached value if present and not yet expired
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let lookup = self
            .store
            .get(key)
            .map(|entry| (entry.value.clone(), entry.expires_at));

        match lookup {
            Some((value, expires_at)) if expires_at > now => {
                self.stats.write().hit_count += 1;
                debug!(key, "cache hit");
                Some(value)
            }
            Some(_) => {
                self.remove_expired(key, now);
                self.purge_expired();
                self.stats.write().miss_count += 1;
                debug!(key, "cache entry expired");
                None
            }
            None => {
                self.stats.write().miss_count += 1;
                debug!(key, "cache miss");
                None
            }
        }
    }

    // Store a value; `None` uses the cache's default TTL
    pub fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        self.purge_expired();

        let expires_at = deadline_after(Instant::now(), ttl.unwrap_or(self.default_ttl));
        let size = calculate_item_size(key, &value);

        let entry = CacheEntry { value, expires_at };

        // stats and index move while the shard lock is held so a concurrent
        // removal can never be applied before the insert it removes
        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let old = occupied.insert(entry);
                self.unindex(key, old.expires_at);
                self.index(key, expires_at);
                let mut stats = self.stats.write();
                Self::forget(&mut stats, key, &old);
                stats.items_count += 1;
                stats.size_bytes += size;
            }
            Entry::Vacant(vacant) => {
                let _stored = vacant.insert(entry);
                self.index(key, expires_at);
                let mut stats = self.stats.write();
                stats.items_count += 1;
                stats.size_bytes += size;
            }
        }
    }

    // Invalidations of `service` seen so far
    pub fn generation(&self, service: &str) -> u64 {
        self.generations.get(service).map(|g| *g).unwrap_or(0)
    }

    /// Stores a read of `service` only if the service has not been
    /// invalidated since `generation` was taken. Returns whether it stored.
    pub fn put_if_current(
        &self,
        service: &str,
        generation: u64,
        key: &str,
        value: Bytes,
    ) -> bool {
        // held across the put; `invalidate_service` needs it to bump
        let current = self.generations.entry(service.to_string()).or_insert(0);
        if *current != generation {
            debug!(key, "service changed while reading, response not cached");
            return false;
        }

        self.put(key, value, None);
        true
    }

    // Drop every entry whose key starts with `prefix`; returns how many went
    pub fn invalidate(&self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .store
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().to_string())
            .collect();

        let mut removed = 0;
        for key in keys {
            let removed_entry = self.store.remove_if(&key, |k, entry| {
                self.unindex(k, entry.expires_at);
                true
            });
            if let Some((k, v)) = removed_entry {
                let mut stats = self.stats.write();
                stats.invalidated_count += 1;
                Self::forget(&mut stats, &k, &v);
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(prefix, removed, "invalidated cached reads");
        }
        removed
    }

    // Every cached read of a service lists all of its slots, so a change to
    // any one slot makes all of them stale
    pub fn invalidate_service(&self, service: &str) -> usize {
        let mut generation = self.generations.entry(service.to_string()).or_insert(0);
        *generation += 1;
        self.invalidate(&format!("{}:", service))
    }

    // Remove everything whose deadline has passed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;

        loop {
            let due = {
                let mut index = self.expiry_index.write();
                match index.first_key_value() {
                    Some((deadline, _)) if *deadline <= now => index.pop_first(),
                    _ => None,
                }
            };

            let Some((_, keys)) = due else {
                break;
            };

            for key in keys {
                if self.remove_expired(&key, now) {
                    purged += 1;
                }
            }
        }

        purged
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    fn remove_expired(&self, key: &str, now: Instant) -> bool {
        let removed = self.store.remove_if(key, |k, entry| {
            let due = entry.expires_at <= now;
            if due {
                self.unindex(k, entry.expires_at);
            }
            due
        });

        match removed {
            Some((k, v)) => {
                let mut stats = self.stats.write();
                stats.expired_count += 1;
                Self::forget(&mut stats, &k, &v);
                true
            }
            None => false,
        }
    }

    fn index(&self, key: &str, expires_at: Instant) {
        self.expiry_index
            .write()
            .entry(expires_at)
            .or_default()
            .insert(key.to_string());
    }

    fn unindex(&self, key: &str, expires_at: Instant) {
        let mut index = self.expiry_index.write();
        if let Some(keys) = index.get_mut(&expires_at) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(&expires_at);
            }
        }
    }

    fn forget(stats: &mut CacheStats, key: &str, entry: &CacheEntry) {
        stats.items_count = stats.items_count.saturating_sub(1);
        stats.size_bytes = stats
            .size_bytes
            .saturating_sub(calculate_item_size(key, &entry.value));
    }
}
