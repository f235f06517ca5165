/// Lock-free statistics caching for whole-band statistics

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Whole-band statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
}

impl BandStatistics {
    pub fn new(min: f64, max: f64, mean: f64, stddev: f64) -> Self {
        Self { min, max, mean, stddev }
    }

    /// Computes population statistics, skipping NaN and `no_data` samples.
    ///
    /// Returns `None` when no valid sample remains.
    pub fn from_samples<I>(samples: I, no_data: Option<f64>) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0u64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;

        for value in samples {
            if value.is_nan() || no_data == Some(value) {
                continue;
            }
            count += 1;
            min = min.min(value);
            max = max.max(value);
            sum += value;
            sum_sq += value * value;
        }

        if count == 0 {
            return None;
        }

        let n = count as f64;
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Some(Self::new(min, max, mean, variance.sqrt()))
    }
}

/// Cache key: source file, band, and the no-data override applied (if any)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    filename: PathBuf,
    band: usize,
    ignore: Option<u64>,
}

impl StatsKey {
    pub fn new(filename: impl AsRef<Path>, band: usize, ignore: Option<f64>) -> Self {
        Self {
            filename: filename.as_ref().to_path_buf(),
            band,
            ignore: ignore.map(f64::to_bits),
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn band(&self) -> usize {
        self.band
    }

    pub fn ignore(&self) -> Option<f64> {
        self.ignore.map(f64::from_bits)
    }
}

/// Per-job cache of whole-band statistics.
///
/// Safe to share between worker threads. Cloning yields another handle to
/// the same entries. There is no eviction; the cache lives as long as the job.
pub struct StatisticsCache {
    stats: Arc<DashMap<StatsKey, BandStatistics>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl StatisticsCache {
    /// Creates an empty cache
    pub fn new() -> Self {
        Self {
            stats: Arc::new(DashMap::new()),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the cached statistics for `key`, if any
    pub fn get(&self, key: &StatsKey) -> Option<BandStatistics> {
        match self.stats.get(key) {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(*entry.value())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores statistics, replacing any previous value for `key`
    pub fn put(&self, key: StatsKey, stats: BandStatistics) {
        self.stats.insert(key, stats);
    }

    /// Returns the cached value or computes and inserts it.
    ///
    /// `compute` runs without holding any lock, so racing callers may both
    /// compute. The first insert to complete wins and its value is returned
    /// to every caller.
    pub fn get_or_insert_with<F, E>(&self, key: StatsKey, compute: F) -> Result<BandStatistics, E>
    where
        F: FnOnce(&StatsKey) -> Result<BandStatistics, E>,
    {
        if let Some(stats) = self.get(&key) {
            return Ok(stats);
        }

        let computed = compute(&key)?;
        let entry = self.stats.entry(key).or_insert(computed);
        Ok(*entry.value())
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.stats.len()
    }

    /// Returns whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Drops every entry
    pub fn clear(&self) {
        self.stats.clear();
    }

    /// Returns cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.stats.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl Clone for StatisticsCache {
    fn clone(&self) -> Self {
        Self {
            stats: Arc::clone(&self.stats),
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
        }
    }
}

impl Default for StatisticsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache usage counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached keys
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn sample() -> BandStatistics {
        BandStatistics::new(0.0, 99.0, 49.5, 28.866)
    }

    #[test]
    fn test_get_after_put() {
        let cache = StatisticsCache::new();
        let key = StatsKey::new("ramp1.raw", 1, None);

        assert_eq!(cache.get(&key), None);
        cache.put(key.clone(), sample());
        assert_eq!(cache.get(&key), Some(sample()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = StatisticsCache::new();
        let key = StatsKey::new("a.raw", 1, None);
        cache.put(key.clone(), sample());
        let replacement = BandStatistics::new(1.0, 2.0, 1.5, 0.5);
        cache.put(key.clone(), replacement);
        assert_eq!(cache.get(&key), Some(replacement));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_keys_distinguish_band_and_ignore() {
        let cache = StatisticsCache::new();
        cache.put(StatsKey::new("a.raw", 1, None), sample());

        assert!(cache.get(&StatsKey::new("a.raw", 2, None)).is_none());
        assert!(cache.get(&StatsKey::new("a.raw", 1, Some(0.0))).is_none());
        assert!(cache.get(&StatsKey::new("b.raw", 1, None)).is_none());
        assert_eq!(StatsKey::new("a.raw", 1, Some(-9999.0)).ignore(), Some(-9999.0));
    }

    #[test]
    fn test_get_or_insert_computes_once() {
        let cache = StatisticsCache::new();
        let calls = AtomicUsize::new(0);
        let key = StatsKey::new("a.raw", 1, Some(0.0));

        for _ in 0..3 {
            let stats = cache
                .get_or_insert_with(key.clone(), |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(sample())
                })
                .unwrap();
            assert_eq!(stats, sample());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let counters = cache.stats();
        assert_eq!(counters.hits, 2);
        assert_eq!(counters.misses, 1);
    }

    #[test]
    fn test_get_or_insert_first_writer_wins() {
        let cache = StatisticsCache::new();
        let key = StatsKey::new("a.raw", 1, None);
        let first = sample();
        cache.stats.insert(key.clone(), first);

        // a racing computation that lost still observes the stored value
        let entry = cache.stats.entry(key.clone()).or_insert(BandStatistics::new(5.0, 5.0, 5.0, 0.0));
        assert_eq!(*entry.value(), first);
    }

    #[test]
    fn test_compute_error_not_cached() {
        let cache = StatisticsCache::new();
        let key = StatsKey::new("a.raw", 1, None);
        let result: Result<BandStatistics, &str> = cache.get_or_insert_with(key.clone(), |_| Err("boom"));
        assert_eq!(result, Err("boom"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_concurrent_access() {
        use std::thread;

        let cache = StatisticsCache::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache_clone = cache.clone();
                thread::spawn(move || {
                    for band in 1..=20 {
                        let key = StatsKey::new(format!("f{}.raw", i % 2), band, None);
                        let stats = cache_clone
                            .get_or_insert_with(key, |k| {
                                Ok::<_, ()>(BandStatistics::new(0.0, k.band() as f64, 1.0, 0.0))
                            })
                            .unwrap();
                        assert_eq!(stats.max, band as f64);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 40);
    }

    #[test]
    fn test_from_samples() {
        let stats = BandStatistics::from_samples(vec![1.0, 2.0, 3.0, 4.0, -1.0], Some(-1.0)).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert!((stats.stddev - 1.118033988749895).abs() < 1e-12);

        assert!(BandStatistics::from_samples(vec![f64::NAN, 7.0], None).is_some());
        assert!(BandStatistics::from_samples(vec![7.0, 7.0], Some(7.0)).is_none());
    }

    #[test]
    fn test_cache_clear() {
        let cache = StatisticsCache::new();
        cache.put(StatsKey::new("a.raw", 1, None), sample());
        cache.clear();
        assert!(cache.is_empty());
    }
}
