//! Conversion result caching with TTL and bulk age-based eviction.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;
use pricedesk_common::{constants, normalize_amount, Clock, Currency, SystemClock, Timestamp};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};

/// Lookup key for a cached conversion.
///
/// The amount is normalized on construction so that floating noise in the
/// caller's amount does not fragment the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversionKey {
    amount: Decimal,
    from: Currency,
    to: Currency,
}

impl ConversionKey {
    /// Create a key, normalizing the amount.
    pub fn new(amount: Decimal, from: Currency, to: Currency) -> Self {
        Self {
            amount: normalize_amount(amount),
            from,
            to,
        }
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn from(&self) -> &Currency {
        &self.from
    }

    pub fn to(&self) -> &Currency {
        &self.to
    }
}

impl fmt::Display for ConversionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.amount, self.from, self.to)
    }
}

/// A stored conversion result. Immutable once stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedConversion {
    pub converted_amount: Decimal,
    pub effective_rate: Decimal,
    pub recorded_at: Timestamp,
}

/// Configuration for the conversion cache.
#[derive(Debug, Clone)]
pub struct ConversionCacheConfig {
    /// Age after which an entry is treated as absent.
    pub ttl: Duration,
    /// Maximum number of entries.
    pub max_entries: usize,
    /// Share of entries dropped, oldest first, when the cache is full.
    pub eviction_fraction: f64,
    /// Interval of the background expired-entry sweep.
    pub sweep_interval: Duration,
}

impl Default for ConversionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::conversion_ttl(),
            max_entries: 1000,
            eviction_fraction: 0.2,
            sweep_interval: constants::cache_sweep_interval(),
        }
    }
}

impl ConversionCacheConfig {
    /// Validate configuration.
    pub fn validate(&self) -> FxResult<()> {
        if self.max_entries == 0 {
            return Err(FxError::InvalidConfig(
                "cache max_entries must be at least 1".to_string(),
            ));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(FxError::InvalidConfig(format!(
                "cache eviction_fraction must be in (0, 1], got {}",
                self.eviction_fraction
            )));
        }
        if self.ttl <= Duration::zero() {
            return Err(FxError::InvalidConfig("cache ttl must be positive".to_string()));
        }
        Ok(())
    }

    /// Number of entries to drop from a full cache holding `len` entries.
    ///
    /// Always at least one, and always enough to bring the cache below
    /// `max_entries` so the following insert fits.
    fn eviction_count(&self, len: usize) -> usize {
        let by_fraction = (len as f64 * self.eviction_fraction).floor() as usize;
        let to_fit = (len + 1).saturating_sub(self.max_entries);
        by_fraction.max(to_fit).max(1).min(len)
    }
}

/// Bounded, time-limited memoization of conversion results.
///
/// All mutation of the entry map happens under one lock, so the
/// capacity check, eviction and insert in [`ConversionCache::set`] form a
/// single critical section.
pub struct ConversionCache {
    entries: Mutex<HashMap<ConversionKey, CachedConversion>>,
    hits: AtomicU64,
    misses: AtomicU64,
    clock: Arc<dyn Clock>,
    config: ConversionCacheConfig,
}

impl ConversionCache {
    /// Create a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(ConversionCacheConfig::default())
    }

    /// Create a new cache with custom configuration.
    pub fn with_config(config: ConversionCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new cache reading time from `clock`.
    pub fn with_clock(config: ConversionCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ConversionCacheConfig {
        &self.config
    }

    /// Look up a conversion. Expired entries are removed and reported absent.
    ///
    /// Does not touch the hit/miss counters.
    pub fn get(&self, key: &ConversionKey) -> Option<CachedConversion> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let entry = entries.get(key)?;
        if !self.is_expired(entry, now) {
            debug!(key = %key, "Conversion cache hit");
            return Some(entry.clone());
        }

        debug!(key = %key, "Conversion cache entry expired");
        entries.remove(key);
        None
    }

    /// Store a conversion, replacing any entry for the same key.
    ///
    /// When the key is new and the cache is full, a fraction of the current
    /// size is dropped. Expired entries go first and count toward that
    /// fraction; the oldest live entries make up the rest.
    pub fn set(&self, key: ConversionKey, converted_amount: Decimal, rate: Decimal) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            if let Err(e) = self.make_room(&mut entries, now) {
                warn!(key = %key, error = %e, "Dropping conversion, cache has no room");
                return;
            }
        }

        entries.insert(
            key,
            CachedConversion {
                converted_amount,
                effective_rate: rate,
                recorded_at: now,
            },
        );
    }

    /// Count a lookup that was served from the cache.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a lookup that was not served from the cache.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove every entry. Hit/miss counters are cumulative usage statistics
    /// and are left untouched; see [`ConversionCache::reset_counters`].
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Zero the hit/miss counters.
    pub fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired conversions");
        }
        removed
    }

    /// Get the number of entries in cache, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);

        CacheStats {
            size: entries.len(),
            hits,
            misses,
            hit_rate: hit_rate(hits, misses),
            oldest_entry: entries.values().map(|e| e.recorded_at).min(),
            newest_entry: entries.values().map(|e| e.recorded_at).max(),
        }
    }

    fn is_expired(&self, entry: &CachedConversion, now: Timestamp) -> bool {
        now - entry.recorded_at > self.config.ttl
    }

    fn make_room(
        &self,
        entries: &mut HashMap<ConversionKey, CachedConversion>,
        now: Timestamp,
    ) -> FxResult<()> {
        let count = self.config.eviction_count(entries.len());
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        let expired = before - entries.len();

        let remaining = count.saturating_sub(expired);
        if remaining > 0 {
            let mut by_age: Vec<(ConversionKey, Timestamp)> = entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.recorded_at))
                .collect();
            by_age.sort_by_key(|(_, recorded_at)| *recorded_at);

            for (key, _) in by_age.into_iter().take(remaining) {
                entries.remove(&key);
            }
        }
        debug!(expired, evicted = remaining, size = entries.len(), "Made room in conversion cache");

        if entries.len() >= self.config.max_entries {
            return Err(FxError::CacheCapacityExceeded {
                capacity: self.config.max_entries,
            });
        }
        Ok(())
    }
}

impl Default for ConversionCache {
    fn default() -> Self {
        Self::new()
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let attempts = hits + misses;
    if attempts == 0 {
        0.0
    } else {
        hits as f64 / attempts as f64
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 when nothing was recorded.
    pub hit_rate: f64,
    pub oldest_entry: Option<Timestamp>,
    pub newest_entry: Option<Timestamp>,
}
