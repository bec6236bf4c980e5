//! Cache-first currency conversion with graceful degradation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use futures::future::join_all;
use pricedesk_common::{constants, normalize_amount, Clock, Currency, DurationExt, Money};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use crate::backend::ConversionBackend;
use crate::cache::{ConversionCache, ConversionKey};
use crate::conversion::{Conversion, ConversionSource, PreloadReport};
use crate::directory::CurrencyDirectory;
use crate::error::{FxError, FxResult};

/// Configuration for the converter.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Amounts always included in a preload.
    pub common_amounts: Vec<Decimal>,
    /// Number of concurrent backend calls per preload batch.
    pub preload_batch_size: usize,
    /// Pause between preload batches.
    pub preload_batch_pause: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            common_amounts: vec![
                Decimal::ONE,
                Decimal::TEN,
                Decimal::ONE_HUNDRED,
                Decimal::ONE_THOUSAND,
            ],
            preload_batch_size: 10,
            preload_batch_pause: constants::preload_batch_pause(),
        }
    }
}

impl ConverterConfig {
    pub fn validate(&self) -> FxResult<()> {
        if self.preload_batch_size == 0 {
            return Err(FxError::InvalidConfig(
                "preload_batch_size must be at least 1".to_string(),
            ));
        }
        if self.preload_batch_pause < Duration::zero() {
            return Err(FxError::InvalidConfig(
                "preload_batch_pause cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Converts amounts using the cache, then the backend, then the directory's
/// approximate rates, then the identity. Never fails.
pub struct CurrencyConverter {
    backend: Arc<dyn ConversionBackend>,
    cache: Arc<ConversionCache>,
    directory: Arc<CurrencyDirectory>,
    clock: Arc<dyn Clock>,
    config: ConverterConfig,
}

impl CurrencyConverter {
    pub fn new(
        backend: Arc<dyn ConversionBackend>,
        cache: Arc<ConversionCache>,
        directory: Arc<CurrencyDirectory>,
        clock: Arc<dyn Clock>,
        config: ConverterConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            directory,
            clock,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ConversionCache> {
        &self.cache
    }

    pub fn directory(&self) -> &Arc<CurrencyDirectory> {
        &self.directory
    }

    /// Convert `amount` and return only the converted value.
    pub async fn convert(&self, amount: Decimal, from: &Currency, to: &Currency) -> Decimal {
        self.convert_detailed(amount, from, to).await.output.value
    }

    /// Convert an amount denominated in the base currency.
    pub async fn convert_from_base(&self, amount: Decimal, to: &Currency) -> Decimal {
        self.convert(amount, &Currency::base(), to).await
    }

    /// Convert an amount into the base currency.
    pub async fn convert_to_base(&self, amount: Decimal, from: &Currency) -> Decimal {
        self.convert(amount, from, &Currency::base()).await
    }

    /// Convert `amount`, reporting which tier produced the result.
    #[instrument(skip(self), fields(amount = %amount, from = %from, to = %to))]
    pub async fn convert_detailed(&self, amount: Decimal, from: &Currency, to: &Currency) -> Conversion {
        let now = self.clock.now();

        if from == to || amount.is_zero() {
            return Conversion::unchanged(amount, from, to, ConversionSource::Identity, now);
        }

        let key = ConversionKey::new(amount, from.clone(), to.clone());
        if let Some(cached) = self.cache.get(&key) {
            self.cache.record_hit();
            return Conversion::new(
                Money::new(amount, from.clone()),
                Money::new(cached.converted_amount, to.clone()),
                cached.effective_rate,
                ConversionSource::Cache,
                now,
            );
        }
        self.cache.record_miss();

        match self.backend.perform_conversion(amount, from, to).await {
            Ok(quote) => {
                self.cache
                    .set(key, quote.converted_amount, quote.exchange_rate);
                debug!(rate = %quote.exchange_rate, "Live conversion");
                Conversion::new(
                    Money::new(amount, from.clone()),
                    Money::new(quote.converted_amount, to.clone()),
                    quote.exchange_rate,
                    ConversionSource::Live { as_of: quote.as_of },
                    self.clock.now(),
                )
            }
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    error = %FxError::conversion(from, to, e),
                    "Conversion backend failed, using fallback"
                );
                self.fallback(amount, from, to)
            }
        }
    }

    fn fallback(&self, amount: Decimal, from: &Currency, to: &Currency) -> Conversion {
        let now = self.clock.now();
        let estimate = self
            .static_estimate(amount, from, to)
            .and_then(|value| Some((value, value.checked_div(amount)?)));

        match estimate {
            Some((value, rate)) => Conversion::new(
                Money::new(amount, from.clone()),
                Money::new(value, to.clone()),
                rate,
                ConversionSource::StaticTable,
                now,
            ),
            None => {
                warn!(from = %from, to = %to, "No approximate rate, returning amount unchanged");
                Conversion::unchanged(amount, from, to, ConversionSource::Passthrough, now)
            }
        }
    }

    /// Estimate a conversion from the directory's approximate rates.
    ///
    /// Directory rates are units per one base currency. Converting out of the
    /// base multiplies by the target's rate and converting into it divides by
    /// the source's rate. Pairs that do not involve the base, and results that
    /// overflow, have no estimate.
    pub fn static_estimate(&self, amount: Decimal, from: &Currency, to: &Currency) -> Option<Decimal> {
        if from == to {
            return Some(amount);
        }

        if from.is_base() {
            amount.checked_mul(self.directory.approximate_rate(to)?)
        } else if to.is_base() {
            amount.checked_div(self.directory.approximate_rate(from)?)
        } else {
            None
        }
    }

    /// Warm the cache for every ordered pair of distinct `currencies` crossed
    /// with `amounts` plus the common amounts.
    ///
    /// Backend calls run in concurrent batches with a pause between batches.
    /// Individual failures are counted and otherwise ignored.
    #[instrument(skip_all, fields(currencies = currencies.len()))]
    pub async fn preload(&self, amounts: &[Decimal], currencies: &[Currency]) -> PreloadReport {
        let jobs = self.preload_jobs(amounts, currencies);
        let mut report = PreloadReport {
            scheduled: jobs.len(),
            ..Default::default()
        };

        let batch_size = self.config.preload_batch_size.max(1);
        for (i, batch) in jobs.chunks(batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.preload_batch_pause.as_std()).await;
            }

            let results = join_all(batch.iter().map(|key| self.preload_one(key))).await;
            for ok in results {
                if ok {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                }
            }
            report.batches += 1;
        }

        info!(
            scheduled = report.scheduled,
            succeeded = report.succeeded,
            failed = report.failed,
            "Preload finished"
        );
        report
    }

    fn preload_jobs(&self, amounts: &[Decimal], currencies: &[Currency]) -> Vec<ConversionKey> {
        let amounts: BTreeSet<Decimal> = amounts
            .iter()
            .chain(self.config.common_amounts.iter())
            .map(|a| normalize_amount(*a))
            .filter(|a| !a.is_zero())
            .collect();
        let currencies: BTreeSet<&Currency> = currencies.iter().collect();

        let mut jobs = Vec::new();
        for amount in &amounts {
            for from in &currencies {
                for to in &currencies {
                    if from != to {
                        jobs.push(ConversionKey::new(*amount, (*from).clone(), (*to).clone()));
                    }
                }
            }
        }
        jobs
    }

    async fn preload_one(&self, key: &ConversionKey) -> bool {
        match self
            .backend
            .perform_conversion(key.amount(), key.from(), key.to())
            .await
        {
            Ok(quote) => {
                self.cache
                    .set(key.clone(), quote.converted_amount, quote.exchange_rate);
                true
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Preload conversion failed");
                false
            }
        }
    }
}
