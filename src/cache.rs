//! Tiered TTL cache for aggregated signal series
//!
//! Cache access is best-effort: a failing cache never fails the request,
//! callers log and proceed to the upstream fetch. The TTL tier follows the
//! timeframe width, so coarse series stay resident longer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::errors::Result;
use crate::timeframe::SeriesPoint;

/// TTL for custom timeframes without a dedicated tier.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// TTL tier per timeframe width.
pub fn ttl_for_minutes(minutes: u32) -> Duration {
    let seconds = match minutes {
        1 => 60,
        5 => 300,
        15 => 900,
        30 => 1800,
        60 => 3600,
        240 => 14_400,
        1440 => 86_400,
        _ => return DEFAULT_TTL,
    };
    Duration::from_secs(seconds)
}

/// One cached payload keyed by request fingerprint.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub payload: Vec<SeriesPoint>,
    pub produced_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(fingerprint: impl Into<String>, payload: Vec<SeriesPoint>, ttl: Duration) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            payload,
            produced_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.produced_at.elapsed() < self.ttl
    }
}

/// Best-effort cache contract. The in-memory implementation cannot fail,
/// but external backends can; callers must treat errors as misses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>>;
    async fn put(&self, entry: CacheEntry) -> Result<()>;
}

/// In-memory TTL cache with capacity-bounded oldest-first eviction.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Drop expired entries. Called by the background maintenance task.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh());
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted expired cache entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.produced_at)
            .map(|entry| entry.key().clone());
        match oldest {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl SignalCache for MemoryCache {
    async fn get(&self, fingerprint: &str) -> Result<Option<CacheEntry>> {
        let hit = self
            .entries
            .get(fingerprint)
            .map(|entry| (entry.is_fresh(), entry.clone()));
        match hit {
            Some((true, entry)) => Ok(Some(entry)),
            Some((false, _)) => {
                self.entries.remove(fingerprint);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        while self.entries.len() >= self.max_entries {
            if !self.evict_oldest() {
                break;
            }
        }
        self.entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn point(value: f64) -> SeriesPoint {
        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), value);
        SeriesPoint {
            timestamp: Utc::now(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let cache = MemoryCache::new(10);
        cache
            .put(CacheEntry::new("fp-1", vec![point(1.0)], Duration::from_secs(60)))
            .await
            .unwrap();

        let hit = cache.get("fp-1").await.unwrap().expect("entry expected");
        assert_eq!(hit.payload.len(), 1);
        assert!(cache.get("fp-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = MemoryCache::new(10);
        cache
            .put(CacheEntry::new("fp", vec![point(1.0)], Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cache.get("fp").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = MemoryCache::new(2);
        for key in ["a", "b", "c"] {
            cache
                .put(CacheEntry::new(key, vec![point(1.0)], Duration::from_secs(60)))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.unwrap().is_none(), "oldest should be evicted");
        assert!(cache.get("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_expired_sweeps() {
        let cache = MemoryCache::new(10);
        cache
            .put(CacheEntry::new("short", vec![point(1.0)], Duration::from_millis(5)))
            .await
            .unwrap();
        cache
            .put(CacheEntry::new("long", vec![point(2.0)], Duration::from_secs(60)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_tiers() {
        assert_eq!(ttl_for_minutes(1), Duration::from_secs(60));
        assert_eq!(ttl_for_minutes(240), Duration::from_secs(14_400));
        assert_eq!(ttl_for_minutes(1440), Duration::from_secs(86_400));
        assert_eq!(ttl_for_minutes(7), DEFAULT_TTL);
    }
}
