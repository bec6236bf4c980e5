//! Keeps the currency directory in step with the conversion backend.

use std::sync::Arc;

use chrono::Duration;
use pricedesk_common::{constants, Clock, Currency};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::backend::ConversionBackend;
use crate::cache::ConversionCache;
use crate::directory::CurrencyDirectory;
use crate::error::{FxError, FxResult};
use crate::freshness::FreshnessMonitor;

/// Configuration for rate synchronization.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Currency whose rate table is loaded into the directory.
    pub base: Currency,
    /// Age after which the directory's rates are reloaded.
    pub refresh_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base: Currency::base(),
            refresh_interval: constants::rate_refresh_interval(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> FxResult<()> {
        if self.refresh_interval <= Duration::zero() {
            return Err(FxError::InvalidConfig(
                "sync refresh_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What a synchronization run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub currencies_added: usize,
    pub rates_updated: usize,
}

pub struct RateSynchronizer {
    backend: Arc<dyn ConversionBackend>,
    directory: Arc<CurrencyDirectory>,
    cache: Arc<ConversionCache>,
    monitor: Arc<FreshnessMonitor>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
}

impl RateSynchronizer {
    pub fn new(
        backend: Arc<dyn ConversionBackend>,
        directory: Arc<CurrencyDirectory>,
        cache: Arc<ConversionCache>,
        monitor: Arc<FreshnessMonitor>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Self {
        Self {
            backend,
            directory,
            cache,
            monitor,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// True when some known currency still lacks an approximate rate.
    pub fn needs_initial_load(&self) -> bool {
        self.directory.rate_table().len() < self.directory.len()
    }

    /// True when rates were never loaded or are older than the refresh interval.
    pub fn is_due(&self) -> bool {
        match self.monitor.last_update() {
            None => true,
            Some(at) => self.clock.elapsed_since(at) >= self.config.refresh_interval,
        }
    }

    /// Initial load. Seeded data counts as current until something proves
    /// otherwise, so the last-update time starts at now.
    pub async fn startup(&self) -> FxResult<Option<SyncReport>> {
        if self.monitor.last_update().is_none() {
            self.monitor.mark_updated(self.clock.now());
        }
        if !self.needs_initial_load() {
            return Ok(None);
        }
        self.refresh().await.map(Some)
    }

    /// Reload only when the current rates are due.
    pub async fn refresh_if_stale(&self) -> FxResult<Option<SyncReport>> {
        if !self.is_due() {
            return Ok(None);
        }
        self.refresh().await.map(Some)
    }

    /// Drop upstream and local caches, then reload.
    #[instrument(skip(self))]
    pub async fn force_refresh(&self) -> FxResult<SyncReport> {
        if let Err(e) = self.backend.invalidate_upstream_cache().await {
            warn!(error = %e, "Failed to invalidate upstream cache");
        }
        self.cache.clear();
        self.refresh().await
    }

    /// Pull supported currencies and the base rate table into the directory.
    #[instrument(skip(self), fields(backend = self.backend.name(), base = %self.config.base))]
    pub async fn refresh(&self) -> FxResult<SyncReport> {
        self.monitor.begin_refresh();
        let result = self.pull().await;
        self.monitor.finish_refresh(result.is_ok());

        match &result {
            Ok(report) => info!(
                added = report.currencies_added,
                updated = report.rates_updated,
                "Exchange rates synchronized"
            ),
            Err(e) => warn!(
                error = %e,
                retryable = e.is_retryable(),
                "Exchange rate synchronization failed"
            ),
        }
        result
    }

    async fn pull(&self) -> FxResult<SyncReport> {
        let mut report = SyncReport::default();

        match self.backend.fetch_supported_currencies().await {
            Ok(infos) => report.currencies_added = self.directory.merge_supported(&infos),
            Err(e) => warn!(error = %e, "Failed to load supported currencies"),
        }

        let snapshot = self.backend.fetch_rates_for_base(&self.config.base).await?;
        report.rates_updated = self.directory.apply_rates(&snapshot.rates);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::freshness::{Freshness, FreshnessConfig, StaticConnectivity};
    use pricedesk_common::ManualClock;
    use rust_decimal_macros::dec;

    struct Fixture {
        backend: Arc<MockBackend>,
        directory: Arc<CurrencyDirectory>,
        cache: Arc<ConversionCache>,
        monitor: Arc<FreshnessMonitor>,
        clock: Arc<ManualClock>,
        sync: RateSynchronizer,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::starting_now());
        let backend = Arc::new(
            MockBackend::new()
                .with_rate("USD", dec!(0.19))
                .with_rate("EUR", dec!(0.17))
                .with_rate("GBP", dec!(0.15)),
        );
        let directory = Arc::new(CurrencyDirectory::with_defaults());
        let cache = Arc::new(ConversionCache::with_clock(Default::default(), clock.clone()));
        let monitor = Arc::new(FreshnessMonitor::new(
            FreshnessConfig::default(),
            directory.clone(),
            Arc::new(StaticConnectivity::default()),
            clock.clone(),
        ));
        let sync = RateSynchronizer::new(
            backend.clone(),
            directory.clone(),
            cache.clone(),
            monitor.clone(),
            clock.clone(),
            SyncConfig::default(),
        );

        Fixture {
            backend,
            directory,
            cache,
            monitor,
            clock,
            sync,
        }
    }

    #[tokio::test]
    async fn test_startup_loads_rates() {
        let f = fixture();
        assert!(f.sync.needs_initial_load());

        let report = f.sync.startup().await.unwrap().unwrap();

        assert_eq!(report.rates_updated, 3);
        assert_eq!(f.directory.approximate_rate(&Currency::usd()), Some(dec!(0.19)));
        assert_eq!(f.directory.approximate_rate(&Currency::gbp()), Some(dec!(0.15)));
        assert!(f.monitor.last_update().is_some());
        assert!(!f.monitor.is_loading());
    }

    #[tokio::test]
    async fn test_failed_startup_keeps_seed_data() {
        let f = fixture();
        f.backend.set_failing(true);

        assert!(f.sync.startup().await.is_err());

        assert_eq!(f.directory.approximate_rate(&Currency::usd()), Some(dec!(0.2)));
        assert!(f.monitor.last_update().is_some());
        assert!(!f.monitor.is_loading());
        assert_eq!(f.monitor.evaluate().await, Freshness::Current);
    }

    #[tokio::test]
    async fn test_refresh_if_stale() {
        let f = fixture();
        f.sync.refresh().await.unwrap();

        assert!(f.sync.refresh_if_stale().await.unwrap().is_none());

        f.clock.advance(Duration::minutes(30));
        assert!(f.sync.refresh_if_stale().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_last_update() {
        let f = fixture();
        f.sync.refresh().await.unwrap();
        let first = f.monitor.last_update();

        f.clock.advance(Duration::hours(1));
        f.backend.set_failing(true);
        assert!(f.sync.refresh().await.is_err());

        assert_eq!(f.monitor.last_update(), first);
    }

    #[tokio::test]
    async fn test_force_refresh_clears_caches() {
        let f = fixture();
        f.cache.set(
            crate::cache::ConversionKey::new(dec!(1), Currency::brl(), Currency::usd()),
            dec!(0.2),
            dec!(0.2),
        );

        f.sync.force_refresh().await.unwrap();

        assert!(f.cache.is_empty());
        assert_eq!(f.backend.invalidations(), 1);
        assert_eq!(f.directory.approximate_rate(&Currency::usd()), Some(dec!(0.19)));
    }

    #[test]
    fn test_config_validation() {
        assert!(SyncConfig::default().validate().is_ok());

        let config = SyncConfig {
            refresh_interval: Duration::zero(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
