use std::{num::NonZeroUsize, time::Duration};

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::BalancerError;

/// Fixed-width key derived from the raw video identifier
pub type CacheKey = u64;

/// Hash a video identifier into its cache key.
///
/// Collisions are tolerated: a collided lookup can only return a stale but
/// plausible URL.
pub fn cache_key(video: &str) -> CacheKey {
    seahash::hash(video.as_bytes())
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Raw identifier the entry was stored under, used to find its access counter
    pub video: String,
    pub url: String,
    pub inserted_at: Instant,
    /// `inserted_at + ttl`, pushed forward by retention extension
    pub expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

struct CacheState {
    /// Inner lock only serializes LRU bookkeeping between concurrent readers
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    access_counts: DashMap<String, u64>,
}

/// In-process store of redirect decisions with TTL expiry and LRU eviction.
///
/// Lookups and inserts share the outer lock; [`sweep`](Self::sweep) takes it
/// exclusively. Expiry is checked on every read, so the sweep only reclaims
/// memory and is never needed for correctness.
pub struct UrlCache {
    state: RwLock<CacheState>,
    ttl: Duration,
    frequent_access_threshold: u64,
}

impl UrlCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);
    pub const DEFAULT_MAX_ENTRIES: usize = 5000;
    pub const DEFAULT_FREQUENT_ACCESS_THRESHOLD: u64 = 100;

    pub fn new(ttl: Duration, max_entries: usize) -> Result<Self, BalancerError> {
        let capacity = NonZeroUsize::new(max_entries).ok_or(BalancerError::InvalidCacheCapacity)?;

        Ok(Self {
            state: RwLock::new(CacheState {
                entries: Mutex::new(LruCache::new(capacity)),
                access_counts: DashMap::new(),
            }),
            ttl,
            frequent_access_threshold: Self::DEFAULT_FREQUENT_ACCESS_THRESHOLD,
        })
    }

    pub fn with_frequent_access_threshold(mut self, threshold: u64) -> Self {
        self.frequent_access_threshold = threshold;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fetch the cached URL for `video`, if present and not expired.
    ///
    /// A valid hit bumps the identifier's access counter; past the frequency
    /// threshold the entry's expiry moves to one full TTL from now.
    pub fn lookup(&self, video: &str) -> Option<String> {
        let key = cache_key(video);
        let now = Instant::now();

        let state = self.state.read();
        let mut entries = state.entries.lock();

        if entries.peek(&key)?.is_expired(now) {
            return None;
        }
        let entry = entries.get_mut(&key)?;

        let count = {
            let mut count = state.access_counts.entry(video.to_owned()).or_insert(0);
            *count += 1;
            *count
        };
        if count > self.frequent_access_threshold {
            entry.expires_at = now + self.ttl;
        }

        Some(entry.url.clone())
    }

    /// Store `url` for `video`. Returns the entry evicted to make room, if any.
    pub fn insert(&self, video: &str, url: impl Into<String>) -> Option<CacheEntry> {
        let key = cache_key(video);
        let now = Instant::now();
        let entry = CacheEntry {
            video: video.to_owned(),
            url: url.into(),
            inserted_at: now,
            expires_at: now + self.ttl,
        };

        let state = self.state.read();
        let displaced = state.entries.lock().push(key, entry);

        match displaced {
            Some((displaced_key, evicted)) if displaced_key != key => {
                state.access_counts.remove(&evicted.video);
                Some(evicted)
            }
            _ => None,
        }
    }

    /// Remove every expired entry together with its access counter.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();

        let mut guard = self.state.write();
        let CacheState {
            entries,
            access_counts,
        } = &mut *guard;
        let entries = entries.get_mut();

        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            if let Some(entry) = entries.pop(key) {
                access_counts.remove(&entry.video);
            }
        }

        expired.len()
    }

    /// Number of entries physically held, expired or not
    pub fn len(&self) -> usize {
        self.state.read().entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Valid hits recorded for `video` since its counter was last cleared
    pub fn access_count(&self, video: &str) -> u64 {
        self.state
            .read()
            .access_counts
            .get(video)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Effective expiry of the entry stored for `video`, without touching LRU order
    pub fn expires_at(&self, video: &str) -> Option<Instant> {
        let key = cache_key(video);
        self.state
            .read()
            .entries
            .lock()
            .peek(&key)
            .map(|entry| entry.expires_at)
    }
}
