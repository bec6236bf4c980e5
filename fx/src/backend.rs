//! The external conversion collaborator and its request/response shapes.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use pricedesk_common::{Currency, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::FxResult;

/// Result of one upstream conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionQuote {
    pub amount: Decimal,
    pub from_currency: Currency,
    pub to_currency: Currency,
    pub converted_amount: Decimal,
    pub exchange_rate: Decimal,
    pub as_of: Timestamp,
}

/// A currency as advertised by the upstream service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: Currency,
    pub symbol: String,
    pub name: String,
}

impl CurrencyInfo {
    pub fn new(code: &str, symbol: &str, name: &str) -> Self {
        Self {
            code: Currency::new(code),
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }
}

/// Every rate quoted against one base currency on a given day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatesSnapshot {
    pub date: NaiveDate,
    pub base: Currency,
    pub rates: HashMap<Currency, Decimal>,
}

/// The conversion authority living on the other side of a process or network
/// boundary. Any error is treated the same way by callers.
#[async_trait]
pub trait ConversionBackend: Send + Sync {
    /// Get the backend name.
    fn name(&self) -> &str;

    /// Convert `amount` from one currency to another.
    async fn perform_conversion(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
    ) -> FxResult<ConversionQuote>;

    /// Discard any rates cached on the backend side.
    async fn invalidate_upstream_cache(&self) -> FxResult<()>;

    /// List the currencies the backend can convert.
    async fn fetch_supported_currencies(&self) -> FxResult<Vec<CurrencyInfo>>;

    /// Get all rates quoted against `base`.
    async fn fetch_rates_for_base(&self, base: &Currency) -> FxResult<RatesSnapshot>;
}

/// Scripted backend for testing.
#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockBackend;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use dashmap::DashMap;
    use parking_lot::Mutex;

    use crate::error::FxError;

    /// Backend with rates expressed as units per one base currency.
    pub struct MockBackend {
        rates: DashMap<Currency, Decimal>,
        failing: AtomicBool,
        delay: Mutex<Option<Duration>>,
        conversion_calls: AtomicUsize,
        invalidations: AtomicUsize,
    }

    impl MockBackend {
        /// Create an empty backend that only knows the base currency.
        pub fn new() -> Self {
            let rates = DashMap::new();
            rates.insert(Currency::base(), Decimal::ONE);
            Self {
                rates,
                failing: AtomicBool::new(false),
                delay: Mutex::new(None),
                conversion_calls: AtomicUsize::new(0),
                invalidations: AtomicUsize::new(0),
            }
        }

        /// Add a rate relative to the base currency.
        pub fn with_rate(self, code: &str, rate: Decimal) -> Self {
            self.set_rate(code, rate);
            self
        }

        pub fn set_rate(&self, code: &str, rate: Decimal) {
            self.rates.insert(Currency::new(code), rate);
        }

        /// Make every call fail until switched back.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Delay every conversion by `delay`.
        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock() = Some(delay);
        }

        /// Number of `perform_conversion` calls so far.
        pub fn conversion_calls(&self) -> usize {
            self.conversion_calls.load(Ordering::SeqCst)
        }

        /// Number of `invalidate_upstream_cache` calls so far.
        pub fn invalidations(&self) -> usize {
            self.invalidations.load(Ordering::SeqCst)
        }

        fn check_failing(&self) -> FxResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(FxError::Transport("mock backend unavailable".to_string()));
            }
            Ok(())
        }

        fn rate(&self, code: &Currency) -> Option<Decimal> {
            self.rates.get(code).map(|r| *r)
        }
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ConversionBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        async fn perform_conversion(
            &self,
            amount: Decimal,
            from: &Currency,
            to: &Currency,
        ) -> FxResult<ConversionQuote> {
            self.conversion_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.check_failing()?;

            let from_rate = self.rate(from).filter(|r| !r.is_zero());
            let to_rate = self.rate(to);
            let (from_rate, to_rate) = match (from_rate, to_rate) {
                (Some(f), Some(t)) => (f, t),
                _ => {
                    return Err(FxError::RateNotFound {
                        from: from.clone(),
                        to: to.clone(),
                    })
                }
            };

            let exchange_rate = to_rate
                .checked_div(from_rate)
                .ok_or_else(|| FxError::conversion(from, to, "rate overflowed"))?;
            let converted_amount = amount
                .checked_mul(exchange_rate)
                .ok_or_else(|| FxError::conversion(from, to, "amount overflowed"))?;
            Ok(ConversionQuote {
                amount,
                from_currency: from.clone(),
                to_currency: to.clone(),
                converted_amount,
                exchange_rate,
                as_of: Utc::now(),
            })
        }

        async fn invalidate_upstream_cache(&self) -> FxResult<()> {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
            self.check_failing()
        }

        async fn fetch_supported_currencies(&self) -> FxResult<Vec<CurrencyInfo>> {
            self.check_failing()?;
            let mut infos: Vec<CurrencyInfo> = self
                .rates
                .iter()
                .map(|entry| CurrencyInfo {
                    code: entry.key().clone(),
                    symbol: entry.key().code().to_string(),
                    name: entry.key().code().to_string(),
                })
                .collect();
            infos.sort_by(|a, b| a.code.cmp(&b.code));
            Ok(infos)
        }

        async fn fetch_rates_for_base(&self, base: &Currency) -> FxResult<RatesSnapshot> {
            self.check_failing()?;
            let base_rate = self
                .rate(base)
                .filter(|r| !r.is_zero())
                .ok_or_else(|| FxError::UnsupportedCurrency(base.clone()))?;

            let rates = self
                .rates
                .iter()
                .filter(|entry| entry.key() != base)
                .map(|entry| (entry.key().clone(), *entry.value() / base_rate))
                .collect();

            Ok(RatesSnapshot {
                date: Utc::now().date_naive(),
                base: base.clone(),
                rates,
            })
        }
    }
}
