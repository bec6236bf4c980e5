//! Data freshness and connectivity status.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use pricedesk_common::{constants, Clock, DurationExt, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::directory::CurrencyDirectory;
use crate::error::{FxError, FxResult};

/// User-facing freshness of exchange-rate data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Data is recent, or a refresh is underway.
    Current,
    /// No network connectivity.
    Offline,
    /// Data is missing or older than the stale threshold.
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Current => "current",
            Freshness::Offline => "offline",
            Freshness::Stale => "stale",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the freshness status is derived from, apart from the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessInputs {
    pub online: bool,
    pub loading: bool,
    /// At least one non-base rate is known.
    pub has_valid_data: bool,
    /// The base currency is known with its identity rate.
    pub has_baseline_data: bool,
    /// Time of the last successful rate update.
    pub last_update: Option<Timestamp>,
}

/// Classify freshness. Rules apply in order; the first match wins.
///
/// Age is counted in whole elapsed hours, so data is stale only once a full
/// hour past `stale_after` has gone by.
pub fn derive_freshness(inputs: &FreshnessInputs, now: Timestamp, stale_after: Duration) -> Freshness {
    if !inputs.online {
        return Freshness::Offline;
    }
    if inputs.loading {
        return Freshness::Current;
    }
    if !inputs.has_valid_data && !inputs.has_baseline_data {
        return Freshness::Stale;
    }

    match inputs.last_update {
        None if inputs.has_baseline_data => Freshness::Current,
        None => Freshness::Stale,
        Some(at) if (now - at).num_hours() > stale_after.num_hours() => Freshness::Stale,
        Some(_) => Freshness::Current,
    }
}

/// Short relative age of the last update: `just now`, `12min`, `5h`, `3d`
/// or `never`.
pub fn describe_age(last_update: Option<Timestamp>, now: Timestamp) -> String {
    let Some(at) = last_update else {
        return "never".to_string();
    };

    let minutes = (now - at).num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return format!("{minutes}min");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    format!("{}d", hours / 24)
}

/// Tells whether the network is reachable.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Connectivity flag set by the host.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ConnectivityProbe for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Reports online when a TCP connection to `addr` succeeds in time.
#[derive(Debug, Clone)]
pub struct TcpConnectivityProbe {
    addr: String,
    timeout: StdDuration,
}

impl TcpConnectivityProbe {
    pub fn new(addr: impl Into<String>, timeout: StdDuration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ConnectivityProbe for TcpConnectivityProbe {
    async fn is_online(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, "Connectivity probe timed out");
                false
            }
        }
    }
}

/// Configuration for the freshness monitor.
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    /// How often the status is re-derived without an input change.
    pub check_interval: Duration,
    /// Age after which data is stale.
    pub stale_threshold: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            check_interval: constants::freshness_check_interval(),
            stale_threshold: constants::stale_threshold(),
        }
    }
}

impl FreshnessConfig {
    pub fn validate(&self) -> FxResult<()> {
        if self.check_interval <= Duration::zero() {
            return Err(FxError::InvalidConfig(
                "freshness check_interval must be positive".to_string(),
            ));
        }
        if self.stale_threshold <= Duration::zero() {
            return Err(FxError::InvalidConfig(
                "freshness stale_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tracks the inputs of [`derive_freshness`] and publishes the status.
pub struct FreshnessMonitor {
    config: FreshnessConfig,
    directory: Arc<CurrencyDirectory>,
    probe: Arc<dyn ConnectivityProbe>,
    clock: Arc<dyn Clock>,
    loading: AtomicBool,
    last_update: RwLock<Option<Timestamp>>,
    changed: Notify,
    status: watch::Sender<Freshness>,
}

impl FreshnessMonitor {
    pub fn new(
        config: FreshnessConfig,
        directory: Arc<CurrencyDirectory>,
        probe: Arc<dyn ConnectivityProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(Freshness::Current);
        Self {
            config,
            directory,
            probe,
            clock,
            loading: AtomicBool::new(false),
            last_update: RwLock::new(None),
            changed: Notify::new(),
            status,
        }
    }

    /// A refresh has started.
    pub fn begin_refresh(&self) {
        self.loading.store(true, Ordering::SeqCst);
        self.changed.notify_one();
    }

    /// A refresh has ended; a successful one moves the last-update time.
    pub fn finish_refresh(&self, success: bool) {
        if success {
            *self.last_update.write() = Some(self.clock.now());
        }
        self.loading.store(false, Ordering::SeqCst);
        self.changed.notify_one();
    }

    /// Record a successful update that happened at `at`.
    pub fn mark_updated(&self, at: Timestamp) {
        *self.last_update.write() = Some(at);
        self.changed.notify_one();
    }

    /// Signal that some input changed outside the monitor's knowledge.
    pub fn notify_changed(&self) {
        self.changed.notify_one();
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn last_update(&self) -> Option<Timestamp> {
        *self.last_update.read()
    }

    /// Human-readable age of the last update.
    pub fn last_update_age(&self) -> String {
        describe_age(self.last_update(), self.clock.now())
    }

    /// Sample all inputs now.
    pub async fn inputs(&self) -> FreshnessInputs {
        FreshnessInputs {
            online: self.probe.is_online().await,
            loading: self.is_loading(),
            has_valid_data: self.directory.has_valid_data(),
            has_baseline_data: self.directory.has_baseline_data(),
            last_update: self.last_update(),
        }
    }

    /// Re-derive and publish the status.
    pub async fn evaluate(&self) -> Freshness {
        let inputs = self.inputs().await;
        let status = derive_freshness(&inputs, self.clock.now(), self.config.stale_threshold);

        let previous = *self.status.borrow();
        if self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        }) {
            info!(from = %previous, to = %status, "Freshness changed");
        }
        status
    }

    /// Last published status.
    pub fn current(&self) -> Freshness {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Freshness> {
        self.status.subscribe()
    }

    /// Re-evaluate on every interval tick and whenever an input changes,
    /// until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.check_interval.as_std());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.changed.notified() => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        debug!("Freshness monitor stopping");
                        return;
                    }
                }
            }
            self.evaluate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricedesk_common::ManualClock;

    fn inputs() -> FreshnessInputs {
        FreshnessInputs {
            online: true,
            loading: false,
            has_valid_data: true,
            has_baseline_data: true,
            last_update: None,
        }
    }

    fn threshold() -> Duration {
        Duration::hours(24)
    }

    #[test]
    fn test_stale_after_threshold() {
        let now = chrono::Utc::now();
        let status = derive_freshness(
            &FreshnessInputs {
                last_update: Some(now - Duration::hours(25)),
                ..inputs()
            },
            now,
            threshold(),
        );
        assert_eq!(status, Freshness::Stale);
    }

    #[test]
    fn test_current_within_threshold() {
        let now = chrono::Utc::now();
        let status = derive_freshness(
            &FreshnessInputs {
                last_update: Some(now - Duration::hours(24)),
                ..inputs()
            },
            now,
            threshold(),
        );
        assert_eq!(status, Freshness::Current);
    }

    #[test]
    fn test_partial_hour_past_threshold_is_current() {
        let now = chrono::Utc::now();
        let at = |age: Duration| {
            derive_freshness(
                &FreshnessInputs {
                    last_update: Some(now - age),
                    ..inputs()
                },
                now,
                threshold(),
            )
        };

        assert_eq!(at(Duration::hours(24) + Duration::minutes(59)), Freshness::Current);
        assert_eq!(at(Duration::hours(25)), Freshness::Stale);
    }

    #[test]
    fn test_offline_wins() {
        let now = chrono::Utc::now();
        for loading in [false, true] {
            for has_valid_data in [false, true] {
                for last_update in [None, Some(now), Some(now - Duration::days(3))] {
                    let status = derive_freshness(
                        &FreshnessInputs {
                            online: false,
                            loading,
                            has_valid_data,
                            has_baseline_data: has_valid_data,
                            last_update,
                        },
                        now,
                        threshold(),
                    );
                    assert_eq!(status, Freshness::Offline);
                }
            }
        }
    }

    #[test]
    fn test_loading_is_current_regardless_of_age() {
        let now = chrono::Utc::now();
        let status = derive_freshness(
            &FreshnessInputs {
                loading: true,
                has_valid_data: false,
                has_baseline_data: false,
                last_update: Some(now - Duration::days(30)),
                ..inputs()
            },
            now,
            threshold(),
        );
        assert_eq!(status, Freshness::Current);
    }

    #[test]
    fn test_no_data_is_stale() {
        let now = chrono::Utc::now();
        let status = derive_freshness(
            &FreshnessInputs {
                has_valid_data: false,
                has_baseline_data: false,
                last_update: Some(now),
                ..inputs()
            },
            now,
            threshold(),
        );
        assert_eq!(status, Freshness::Stale);
    }

    #[test]
    fn test_no_timestamp_depends_on_baseline() {
        let now = chrono::Utc::now();
        assert_eq!(derive_freshness(&inputs(), now, threshold()), Freshness::Current);

        let without_baseline = FreshnessInputs {
            has_baseline_data: false,
            ..inputs()
        };
        assert_eq!(
            derive_freshness(&without_baseline, now, threshold()),
            Freshness::Stale
        );
    }

    #[test]
    fn test_describe_age() {
        let now = chrono::Utc::now();
        assert_eq!(describe_age(None, now), "never");
        assert_eq!(describe_age(Some(now - Duration::seconds(30)), now), "just now");
        assert_eq!(describe_age(Some(now - Duration::minutes(12)), now), "12min");
        assert_eq!(describe_age(Some(now - Duration::hours(5)), now), "5h");
        assert_eq!(describe_age(Some(now - Duration::hours(80)), now), "3d");
    }

    fn monitor(clock: Arc<ManualClock>, probe: Arc<StaticConnectivity>) -> Arc<FreshnessMonitor> {
        Arc::new(FreshnessMonitor::new(
            FreshnessConfig::default(),
            Arc::new(CurrencyDirectory::with_defaults()),
            probe,
            clock,
        ))
    }

    #[tokio::test]
    async fn test_monitor_tracks_refresh_and_age() {
        let clock = Arc::new(ManualClock::starting_now());
        let probe = Arc::new(StaticConnectivity::new(true));
        let monitor = monitor(clock.clone(), probe.clone());

        monitor.begin_refresh();
        assert!(monitor.is_loading());
        monitor.finish_refresh(true);
        assert!(!monitor.is_loading());
        assert_eq!(monitor.last_update(), Some(clock.now()));
        assert_eq!(monitor.evaluate().await, Freshness::Current);

        clock.advance(Duration::hours(25));
        assert_eq!(monitor.evaluate().await, Freshness::Stale);
        assert_eq!(monitor.last_update_age(), "1d");

        probe.set_online(false);
        assert_eq!(monitor.evaluate().await, Freshness::Offline);
        assert_eq!(monitor.current(), Freshness::Offline);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_timestamp() {
        let clock = Arc::new(ManualClock::starting_now());
        let monitor = monitor(clock.clone(), Arc::new(StaticConnectivity::default()));
        let earlier = clock.now();
        monitor.mark_updated(earlier);

        clock.advance(Duration::minutes(10));
        monitor.begin_refresh();
        monitor.finish_refresh(false);

        assert_eq!(monitor.last_update(), Some(earlier));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_changes() {
        let clock = Arc::new(ManualClock::starting_now());
        let probe = Arc::new(StaticConnectivity::new(true));
        let monitor = monitor(clock.clone(), probe.clone());
        let mut status = monitor.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(monitor.clone().run(shutdown_rx));

        probe.set_online(false);
        monitor.notify_changed();
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), Freshness::Offline);

        probe.set_online(true);
        tokio::time::advance(StdDuration::from_secs(31)).await;
        status.changed().await.unwrap();
        assert_eq!(*status.borrow_and_update(), Freshness::Current);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
