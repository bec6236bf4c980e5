//! Registry of supported currencies and their display metadata.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use pricedesk_common::Currency;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::CurrencyInfo;
use crate::error::{FxError, FxResult};
use crate::format::{fixed_point, NumberStyle};

/// Symbol shown when a currency is unknown.
pub const BASE_SYMBOL: &str = "R$";

/// Reference data for one currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyConfig {
    pub code: Currency,
    pub symbol: String,
    pub name: String,
    /// BCP 47 locale used to format amounts in this currency.
    pub locale: String,
    /// Units of this currency per one unit of the base currency, used when
    /// no live conversion is available.
    pub approximate_rate: Option<Decimal>,
}

impl CurrencyConfig {
    pub fn new(code: &str, symbol: &str, name: &str, locale: &str) -> Self {
        Self {
            code: Currency::new(code),
            symbol: symbol.to_string(),
            name: name.to_string(),
            locale: locale.to_string(),
            approximate_rate: None,
        }
    }

    pub fn with_rate(mut self, rate: Decimal) -> Self {
        self.approximate_rate = Some(rate);
        self
    }

    fn from_info(info: &CurrencyInfo) -> Self {
        Self {
            code: info.code.clone(),
            symbol: info.symbol.clone(),
            name: info.name.clone(),
            locale: default_locale(&info.code).to_string(),
            approximate_rate: None,
        }
    }
}

fn default_locale(code: &Currency) -> &'static str {
    match code.code() {
        "BRL" => "pt-BR",
        "EUR" => "de-DE",
        "GBP" => "en-GB",
        "JPY" => "ja-JP",
        "CAD" => "en-CA",
        "AUD" => "en-AU",
        "CHF" => "de-CH",
        "CNY" => "zh-CN",
        "INR" => "en-IN",
        _ => "en-US",
    }
}

/// The currencies the application ships with.
pub fn default_currencies() -> Vec<CurrencyConfig> {
    vec![
        CurrencyConfig::new("BRL", "R$", "Brazilian Real", "pt-BR").with_rate(Decimal::ONE),
        CurrencyConfig::new("USD", "$", "US Dollar", "en-US").with_rate(Decimal::new(2, 1)),
        CurrencyConfig::new("EUR", "€", "Euro", "de-DE").with_rate(Decimal::new(18, 2)),
        CurrencyConfig::new("GBP", "£", "British Pound", "en-GB"),
        CurrencyConfig::new("JPY", "¥", "Japanese Yen", "ja-JP"),
        CurrencyConfig::new("CAD", "C$", "Canadian Dollar", "en-CA"),
        CurrencyConfig::new("AUD", "A$", "Australian Dollar", "en-AU"),
        CurrencyConfig::new("CHF", "CHF", "Swiss Franc", "de-CH"),
        CurrencyConfig::new("CNY", "¥", "Chinese Yuan", "zh-CN"),
        CurrencyConfig::new("INR", "₹", "Indian Rupee", "en-IN"),
    ]
}

type Entries = HashMap<Currency, CurrencyConfig>;

/// Read-mostly currency registry.
///
/// Readers take a snapshot of the whole table; every update builds a new
/// table and swaps it in, so no reader ever sees a half-applied refresh.
pub struct CurrencyDirectory {
    entries: RwLock<Arc<Entries>>,
}

impl CurrencyDirectory {
    /// Create a directory holding `configs`.
    pub fn new(configs: impl IntoIterator<Item = CurrencyConfig>) -> Self {
        Self {
            entries: RwLock::new(Arc::new(Self::index(configs))),
        }
    }

    /// Create a directory with the built-in currencies.
    pub fn with_defaults() -> Self {
        Self::new(default_currencies())
    }

    fn index(configs: impl IntoIterator<Item = CurrencyConfig>) -> Entries {
        configs.into_iter().map(|c| (c.code.clone(), c)).collect()
    }

    /// Current table.
    pub fn snapshot(&self) -> Arc<Entries> {
        self.entries.read().clone()
    }

    /// Replace the whole table.
    pub fn replace(&self, configs: impl IntoIterator<Item = CurrencyConfig>) {
        let entries = Arc::new(Self::index(configs));
        info!(currencies = entries.len(), "Currency directory replaced");
        *self.entries.write() = entries;
    }

    /// Add currencies advertised upstream, keeping what is already known
    /// about existing ones.
    pub fn merge_supported(&self, infos: &[CurrencyInfo]) -> usize {
        let current = self.snapshot();
        let mut next: Entries = (*current).clone();
        let mut added = 0;

        for info in infos {
            if !next.contains_key(&info.code) {
                next.insert(info.code.clone(), CurrencyConfig::from_info(info));
                added += 1;
            }
        }

        if added > 0 {
            debug!(added, "Merged upstream currencies into directory");
            *self.entries.write() = Arc::new(next);
        }
        added
    }

    /// Update approximate rates from a table quoted against the base
    /// currency. Codes the directory does not know are ignored.
    pub fn apply_rates(&self, rates: &HashMap<Currency, Decimal>) -> usize {
        let current = self.snapshot();
        let mut next: Entries = (*current).clone();
        let mut updated = 0;

        for (code, config) in next.iter_mut() {
            if code.is_base() {
                config.approximate_rate = Some(Decimal::ONE);
                continue;
            }
            if let Some(rate) = rates.get(code).filter(|r| r.is_sign_positive() && !r.is_zero()) {
                config.approximate_rate = Some(*rate);
                updated += 1;
            }
        }

        *self.entries.write() = Arc::new(next);
        debug!(updated, "Applied rates to directory");
        updated
    }

    /// Look up a currency.
    pub fn get(&self, code: &Currency) -> Option<CurrencyConfig> {
        self.entries.read().get(code).cloned()
    }

    /// Look up a currency, failing when it is unknown.
    pub fn require(&self, code: &Currency) -> FxResult<CurrencyConfig> {
        self.get(code)
            .ok_or_else(|| FxError::UnsupportedCurrency(code.clone()))
    }

    /// Look up a currency, falling back to the base currency's entry when it
    /// is unknown.
    pub fn resolve(&self, code: &Currency) -> CurrencyConfig {
        match self.require(code) {
            Ok(config) => config,
            Err(e) => {
                debug!(error = %e, "Falling back to base currency");
                self.get(&Currency::base()).unwrap_or_else(|| {
                    CurrencyConfig::new("BRL", BASE_SYMBOL, "Brazilian Real", "pt-BR")
                        .with_rate(Decimal::ONE)
                })
            }
        }
    }

    pub fn contains(&self, code: &Currency) -> bool {
        self.entries.read().contains_key(code)
    }

    /// Display symbol, or the base symbol for unknown codes.
    pub fn symbol(&self, code: &Currency) -> String {
        self.get(code)
            .map(|c| c.symbol)
            .unwrap_or_else(|| BASE_SYMBOL.to_string())
    }

    /// All currencies, ordered by code.
    pub fn supported(&self) -> Vec<CurrencyConfig> {
        let mut configs: Vec<CurrencyConfig> = self.snapshot().values().cloned().collect();
        configs.sort_by(|a, b| a.code.cmp(&b.code));
        configs
    }

    /// Approximate rate against the base currency, if known and non-zero.
    pub fn approximate_rate(&self, code: &Currency) -> Option<Decimal> {
        self.entries
            .read()
            .get(code)
            .and_then(|c| c.approximate_rate)
            .filter(|r| !r.is_zero())
    }

    /// Every known approximate rate.
    pub fn rate_table(&self) -> HashMap<Currency, Decimal> {
        self.snapshot()
            .values()
            .filter_map(|c| c.approximate_rate.map(|r| (c.code.clone(), r)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The only condition callers are expected to surface to the user.
    pub fn ensure_not_empty(&self) -> FxResult<()> {
        if self.is_empty() {
            return Err(FxError::EmptyDirectory);
        }
        Ok(())
    }

    /// The base currency is present with its identity rate.
    pub fn has_baseline_data(&self) -> bool {
        self.approximate_rate(&Currency::base()) == Some(Decimal::ONE)
    }

    /// At least one non-base currency has a usable rate.
    pub fn has_valid_data(&self) -> bool {
        self.snapshot()
            .values()
            .any(|c| !c.code.is_base() && c.approximate_rate.is_some_and(|r| !r.is_zero()))
    }

    /// Format `amount` using the currency's locale rules. Unknown codes are
    /// rendered as a bare two-decimal number.
    pub fn format(&self, amount: Decimal, code: &Currency) -> String {
        match self.get(code) {
            Some(config) => NumberStyle::for_locale(&config.locale).format(
                amount,
                code.decimal_places(),
                &config.symbol,
            ),
            None => fixed_point(amount, 2),
        }
    }
}

impl Default for CurrencyDirectory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
