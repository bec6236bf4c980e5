//! Human-readable rendering of engine results.

use std::collections::BTreeMap;
use std::time::Duration;

use pricedesk_fx::{
    Conversion, CurrencyDirectory, Freshness, PreloadReport, PriceEngineStats, SyncReport,
};

/// One line describing a conversion.
pub fn conversion_line(conversion: &Conversion, directory: &CurrencyDirectory) -> String {
    format!(
        "{} = {}  (rate {}, {})",
        directory.format(conversion.input.value, &conversion.input.currency),
        directory.format(conversion.output.value, &conversion.output.currency),
        conversion.rate.round_dp(6).normalize(),
        conversion.source.as_str(),
    )
}

/// Table of known currencies with their approximate base rates.
pub fn currency_rows(directory: &CurrencyDirectory) -> Vec<String> {
    directory
        .supported()
        .into_iter()
        .map(|c| {
            let rate = c
                .approximate_rate
                .map(|r| r.normalize().to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{:<4} {:<4} {:<22} {:<6} {}",
                c.code.code(),
                c.symbol,
                c.name,
                c.locale,
                rate
            )
        })
        .collect()
}

pub fn status_lines(stats: &PriceEngineStats) -> Vec<String> {
    vec![
        format!("freshness:   {}", stats.freshness),
        format!("loading:     {}", stats.loading),
        format!("last update: {}", stats.last_update_age),
        format!("currencies:  {}", stats.currencies),
        format!(
            "cache:       {} entries, {} hits, {} misses, hit rate {:.1}%",
            stats.cache.size,
            stats.cache.hits,
            stats.cache.misses,
            stats.cache.hit_rate * 100.0
        ),
    ]
}

pub fn preload_line(report: &PreloadReport, elapsed: Duration) -> String {
    format!(
        "preloaded {} of {} conversions in {} batches ({} failed, {}ms)",
        report.succeeded,
        report.scheduled,
        report.batches,
        report.failed,
        elapsed.as_millis()
    )
}

pub fn sync_line(report: &SyncReport) -> String {
    format!(
        "rates refreshed: {} updated, {} currencies added",
        report.rates_updated, report.currencies_added
    )
}

/// Freshness observations collected while watching.
#[derive(Debug, Clone, Default)]
pub struct WatchTally {
    /// Status changes observed.
    pub transitions: u64,
    /// Times each status was entered.
    entered: BTreeMap<&'static str, u64>,
    last: Option<Freshness>,
}

impl WatchTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed status. Repeats of the current status are ignored.
    pub fn record(&mut self, status: Freshness) -> bool {
        if self.last == Some(status) {
            return false;
        }
        if self.last.is_some() {
            self.transitions += 1;
        }
        *self.entered.entry(status.as_str()).or_default() += 1;
        self.last = Some(status);
        true
    }

    pub fn entered(&self, status: Freshness) -> u64 {
        self.entered.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .entered
            .iter()
            .map(|(status, count)| format!("{status}={count}"))
            .collect();
        format!("{} transitions ({})", self.transitions, parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricedesk_common::{Currency, Money};
    use pricedesk_fx::ConversionSource;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversion_line() {
        let directory = CurrencyDirectory::with_defaults();
        let conversion = Conversion::new(
            Money::new(dec!(1234.5), Currency::brl()),
            Money::new(dec!(246.9), Currency::usd()),
            dec!(0.2),
            ConversionSource::Cache,
            chrono::Utc::now(),
        );

        assert_eq!(
            conversion_line(&conversion, &directory),
            "R$ 1.234,50 = $246.90  (rate 0.2, cache)"
        );
    }

    #[test]
    fn test_currency_rows() {
        let rows = currency_rows(&CurrencyDirectory::with_defaults());

        assert_eq!(rows.len(), 10);
        assert!(rows[0].starts_with("AUD"));
        assert!(rows.iter().any(|r| r.starts_with("USD") && r.ends_with("0.2")));
        assert!(rows.iter().any(|r| r.starts_with("JPY") && r.ends_with('-')));
    }

    #[test]
    fn test_watch_tally() {
        let mut tally = WatchTally::new();

        assert!(tally.record(Freshness::Current));
        assert!(!tally.record(Freshness::Current));
        assert!(tally.record(Freshness::Offline));
        assert!(tally.record(Freshness::Current));

        assert_eq!(tally.transitions, 2);
        assert_eq!(tally.entered(Freshness::Current), 2);
        assert_eq!(tally.entered(Freshness::Stale), 0);
        assert_eq!(tally.summary(), "2 transitions (current=2, offline=1)");
    }

    #[test]
    fn test_preload_line() {
        let report = PreloadReport {
            scheduled: 30,
            succeeded: 28,
            failed: 2,
            batches: 3,
        };
        assert_eq!(
            preload_line(&report, Duration::from_millis(250)),
            "preloaded 28 of 30 conversions in 3 batches (2 failed, 250ms)"
        );
    }
}
