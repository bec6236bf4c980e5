//! Engine configuration.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use pricedesk_common::Currency;
use tracing::warn;

use crate::cache::ConversionCacheConfig;
use crate::converter::ConverterConfig;
use crate::error::{FxError, FxResult};
use crate::freshness::FreshnessConfig;
use crate::sync::SyncConfig;
use crate::upstream::RateServiceConfig;

pub const DEFAULT_PROBE_ADDR: &str = "cdn.jsdelivr.net:443";

/// Connectivity probe configuration.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// `host:port` that must accept a TCP connection for the engine to count as online.
    pub addr: String,
    pub timeout: StdDuration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_PROBE_ADDR.to_string(),
            timeout: StdDuration::from_secs(3),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default)]
pub struct FxConfig {
    pub cache: ConversionCacheConfig,
    pub converter: ConverterConfig,
    pub freshness: FreshnessConfig,
    pub sync: SyncConfig,
    pub rate_service: RateServiceConfig,
    pub probe: ProbeConfig,
}

impl FxConfig {
    /// Load configuration from `PRICEDESK_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<i64, _>(&lookup, "PRICEDESK_CACHE_TTL_SECS") {
            config.cache.ttl = Duration::seconds(secs);
        }
        if let Some(max) = parse_var(&lookup, "PRICEDESK_CACHE_MAX_ENTRIES") {
            config.cache.max_entries = max;
        }
        if let Some(fraction) = parse_var(&lookup, "PRICEDESK_CACHE_EVICTION_FRACTION") {
            config.cache.eviction_fraction = fraction;
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "PRICEDESK_CACHE_SWEEP_SECS") {
            config.cache.sweep_interval = Duration::seconds(secs);
        }

        if let Some(size) = parse_var(&lookup, "PRICEDESK_PRELOAD_BATCH_SIZE") {
            config.converter.preload_batch_size = size;
        }
        if let Some(ms) = parse_var::<i64, _>(&lookup, "PRICEDESK_PRELOAD_PAUSE_MS") {
            config.converter.preload_batch_pause = Duration::milliseconds(ms);
        }

        if let Some(secs) = parse_var::<i64, _>(&lookup, "PRICEDESK_FRESHNESS_CHECK_SECS") {
            config.freshness.check_interval = Duration::seconds(secs);
        }
        if let Some(hours) = parse_var::<i64, _>(&lookup, "PRICEDESK_STALE_THRESHOLD_HOURS") {
            config.freshness.stale_threshold = Duration::hours(hours);
        }

        if let Some(code) = lookup("PRICEDESK_BASE_CURRENCY") {
            config.sync.base = Currency::new(code);
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "PRICEDESK_REFRESH_INTERVAL_SECS") {
            config.sync.refresh_interval = Duration::seconds(secs);
        }

        if let Some(url) = lookup("PRICEDESK_FEED_URL") {
            config.rate_service.primary_url = url;
        }
        if let Some(url) = lookup("PRICEDESK_FALLBACK_FEED_URL") {
            config.rate_service.fallback_url = url;
        }
        if let Some(secs) = parse_var(&lookup, "PRICEDESK_HTTP_TIMEOUT_SECS") {
            config.rate_service.http_timeout = StdDuration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<i64, _>(&lookup, "PRICEDESK_RATE_CACHE_SECS") {
            config.rate_service.cache_timeout = Duration::seconds(secs);
        }

        if let Some(addr) = lookup("PRICEDESK_PROBE_ADDR") {
            config.probe.addr = addr;
        }
        if let Some(secs) = parse_var(&lookup, "PRICEDESK_PROBE_TIMEOUT_SECS") {
            config.probe.timeout = StdDuration::from_secs(secs);
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> FxResult<()> {
        self.cache.validate()?;
        self.converter.validate()?;
        self.freshness.validate()?;
        self.sync.validate()?;
        self.rate_service.validate()?;

        if self.probe.addr.is_empty() {
            return Err(FxError::InvalidConfig("probe address cannot be empty".to_string()));
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = FxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_entries, 1000);
        assert_eq!(config.sync.base, Currency::brl());
        assert_eq!(config.freshness.stale_threshold, Duration::hours(24));
    }

    #[test]
    fn test_overrides() {
        let config = FxConfig::from_lookup(lookup(&[
            ("PRICEDESK_CACHE_TTL_SECS", "60"),
            ("PRICEDESK_CACHE_MAX_ENTRIES", "50"),
            ("PRICEDESK_BASE_CURRENCY", "usd"),
            ("PRICEDESK_FEED_URL", "http://localhost:8000"),
            ("PRICEDESK_PRELOAD_PAUSE_MS", "250"),
        ]));

        assert_eq!(config.cache.ttl, Duration::seconds(60));
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.sync.base, Currency::usd());
        assert_eq!(config.rate_service.primary_url, "http://localhost:8000");
        assert_eq!(config.converter.preload_batch_pause, Duration::milliseconds(250));
    }

    #[test]
    fn test_unparsable_values_keep_defaults() {
        let config = FxConfig::from_lookup(lookup(&[("PRICEDESK_CACHE_MAX_ENTRIES", "lots")]));
        assert_eq!(config.cache.max_entries, 1000);
    }

    #[test]
    fn test_invalid_config() {
        let config = FxConfig::from_lookup(lookup(&[("PRICEDESK_CACHE_MAX_ENTRIES", "0")]));
        assert!(config.validate().is_err());

        let mut config = FxConfig::default();
        config.probe.addr.clear();
        assert!(config.validate().is_err());
    }
}
