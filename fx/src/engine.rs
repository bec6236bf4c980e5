//! Price engine wiring the directory, cache, converter, synchronizer and
//! freshness monitor together.

use std::sync::Arc;

use pricedesk_common::{Clock, Currency, DurationExt, SystemClock, Timestamp};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::backend::ConversionBackend;
use crate::cache::{CacheStats, ConversionCache};
use crate::config::FxConfig;
use crate::conversion::{Conversion, PreloadReport};
use crate::converter::CurrencyConverter;
use crate::directory::CurrencyDirectory;
use crate::error::FxResult;
use crate::freshness::{ConnectivityProbe, Freshness, FreshnessMonitor, TcpConnectivityProbe};
use crate::sync::{RateSynchronizer, SyncReport};
use crate::upstream::{HttpRateFeed, RateService};

/// The main price engine.
pub struct PriceEngine {
    backend: Arc<dyn ConversionBackend>,
    directory: Arc<CurrencyDirectory>,
    cache: Arc<ConversionCache>,
    converter: Arc<CurrencyConverter>,
    monitor: Arc<FreshnessMonitor>,
    sync: Arc<RateSynchronizer>,
    clock: Arc<dyn Clock>,
    config: FxConfig,
}

impl PriceEngine {
    /// Create an engine over the given backend and connectivity probe.
    pub fn new(
        config: FxConfig,
        backend: Arc<dyn ConversionBackend>,
        probe: Arc<dyn ConnectivityProbe>,
        clock: Arc<dyn Clock>,
    ) -> FxResult<Self> {
        config.validate()?;

        let directory = Arc::new(CurrencyDirectory::with_defaults());
        let cache = Arc::new(ConversionCache::with_clock(config.cache.clone(), clock.clone()));
        let converter = Arc::new(CurrencyConverter::new(
            backend.clone(),
            cache.clone(),
            directory.clone(),
            clock.clone(),
            config.converter.clone(),
        ));
        let monitor = Arc::new(FreshnessMonitor::new(
            config.freshness.clone(),
            directory.clone(),
            probe,
            clock.clone(),
        ));
        let sync = Arc::new(RateSynchronizer::new(
            backend.clone(),
            directory.clone(),
            cache.clone(),
            monitor.clone(),
            clock.clone(),
            config.sync.clone(),
        ));

        Ok(Self {
            backend,
            directory,
            cache,
            converter,
            monitor,
            sync,
            clock,
            config,
        })
    }

    /// Create an engine backed by the public rate feed, probing
    /// connectivity over TCP.
    pub fn with_upstream(config: FxConfig) -> FxResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let feed = Arc::new(HttpRateFeed::from_config(&config.rate_service)?);
        let backend = Arc::new(RateService::new(feed, config.rate_service.clone(), clock.clone()));
        let probe = Arc::new(TcpConnectivityProbe::new(
            config.probe.addr.clone(),
            config.probe.timeout,
        ));
        Self::new(config, backend, probe, clock)
    }

    pub fn config(&self) -> &FxConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn ConversionBackend> {
        &self.backend
    }

    pub fn directory(&self) -> &Arc<CurrencyDirectory> {
        &self.directory
    }

    pub fn cache(&self) -> &Arc<ConversionCache> {
        &self.cache
    }

    pub fn converter(&self) -> &Arc<CurrencyConverter> {
        &self.converter
    }

    pub fn monitor(&self) -> &Arc<FreshnessMonitor> {
        &self.monitor
    }

    pub fn synchronizer(&self) -> &Arc<RateSynchronizer> {
        &self.sync
    }

    /// Load rates and publish the first freshness status. A failed load
    /// leaves the engine running on its seeded approximate rates.
    pub async fn start(&self) -> Freshness {
        info!(
            backend = self.backend.name(),
            currencies = self.directory.len(),
            "Starting price engine"
        );

        if let Err(e) = self.sync.startup().await {
            warn!(error = %e, "Initial rate load failed, using approximate rates");
        }
        self.monitor.evaluate().await
    }

    /// Convert an amount, never failing.
    pub async fn convert(&self, amount: Decimal, from: &Currency, to: &Currency) -> Conversion {
        self.converter.convert_detailed(amount, from, to).await
    }

    /// Warm the cache for the given amounts across every supported currency.
    pub async fn preload(&self, amounts: &[Decimal]) -> PreloadReport {
        let currencies: Vec<Currency> = self
            .directory
            .supported()
            .into_iter()
            .map(|c| c.code)
            .collect();
        self.converter.preload(amounts, &currencies).await
    }

    /// Drop every cache and reload rates from upstream.
    pub async fn refresh(&self) -> FxResult<SyncReport> {
        let report = self.sync.force_refresh().await;
        self.monitor.evaluate().await;
        report
    }

    /// Spawn the cache sweeper, the freshness monitor and the periodic
    /// rate refresh. All stop once `shutdown` flips to true.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(sweep_loop(self.cache.clone(), shutdown.clone())),
            tokio::spawn(self.monitor.clone().run(shutdown.clone())),
            tokio::spawn(refresh_loop(
                self.sync.clone(),
                self.config.freshness.check_interval.as_std(),
                shutdown,
            )),
        ]
    }

    /// Get engine statistics.
    pub fn stats(&self) -> PriceEngineStats {
        PriceEngineStats {
            cache: self.cache.stats(),
            freshness: self.monitor.current(),
            loading: self.monitor.is_loading(),
            last_update: self.monitor.last_update(),
            last_update_age: self.monitor.last_update_age(),
            currencies: self.directory.len(),
            checked_at: self.clock.now(),
        }
    }
}

async fn sweep_loop(cache: Arc<ConversionCache>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(cache.config().sweep_interval.as_std());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Swept expired conversions");
                }
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    debug!("Cache sweeper stopping");
                    return;
                }
            }
        }
    }
}

async fn refresh_loop(
    sync: Arc<RateSynchronizer>,
    every: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already loaded.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Failures are logged by the synchronizer.
                let _ = sync.refresh_if_stale().await;
            }
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    debug!("Rate refresher stopping");
                    return;
                }
            }
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Serialize)]
pub struct PriceEngineStats {
    pub cache: CacheStats,
    pub freshness: Freshness,
    pub loading: bool,
    pub last_update: Option<Timestamp>,
    pub last_update_age: String,
    pub currencies: usize,
    pub checked_at: Timestamp,
}
