//! Upstream rate service backed by a public exchange-rate feed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use dashmap::DashMap;
use pricedesk_common::{constants, Clock, Currency, DurationExt, Timestamp};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::backend::{ConversionBackend, ConversionQuote, CurrencyInfo, RatesSnapshot};
use crate::directory::default_currencies;
use crate::error::{FxError, FxResult};

pub const PRIMARY_FEED_URL: &str =
    "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies";
pub const FALLBACK_FEED_URL: &str = "https://latest.currency-api.pages.dev/v1/currencies";

/// Rates for one base currency as published by a feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRates {
    pub date: Option<NaiveDate>,
    pub rates: HashMap<Currency, Decimal>,
}

/// Source of rate tables.
#[async_trait]
pub trait RateFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Get every rate quoted against `base`.
    async fn fetch(&self, base: &Currency) -> FxResult<FeedRates>;
}

/// Parse a feed document of the form
/// `{ "date": "2024-05-01", "brl": { "usd": 0.19, ... } }`.
pub fn parse_feed_response(body: &[u8]) -> FxResult<FeedRates> {
    let document: Value = serde_json::from_slice(body)
        .map_err(|e| FxError::MalformedResponse(format!("invalid JSON: {e}")))?;
    let object = document
        .as_object()
        .ok_or_else(|| FxError::MalformedResponse("expected a JSON object".to_string()))?;

    let date = object
        .get("date")
        .and_then(Value::as_str)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());

    let mut rates = HashMap::new();
    for (key, value) in object {
        if key == "date" {
            continue;
        }
        let Some(table) = value.as_object() else {
            continue;
        };
        for (code, rate) in table {
            if let Some(rate) = rate.as_f64().and_then(Decimal::from_f64) {
                rates.insert(Currency::new(code.as_str()), rate);
            }
        }
    }

    if rates.is_empty() {
        return Err(FxError::MalformedResponse(
            "no exchange rates found in response".to_string(),
        ));
    }

    Ok(FeedRates { date, rates })
}

/// Feed fetched over HTTP, trying a fallback mirror when the primary fails.
pub struct HttpRateFeed {
    client: Client,
    primary_url: String,
    fallback_url: String,
}

impl HttpRateFeed {
    pub fn new(
        primary_url: impl Into<String>,
        fallback_url: impl Into<String>,
        timeout: StdDuration,
    ) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
        })
    }

    pub fn from_config(config: &RateServiceConfig) -> FxResult<Self> {
        Self::new(
            config.primary_url.clone(),
            config.fallback_url.clone(),
            config.http_timeout,
        )
    }

    fn document_url(root: &str, base: &Currency) -> String {
        format!(
            "{}/{}.json",
            root.trim_end_matches('/'),
            base.code().to_lowercase()
        )
    }

    async fn fetch_from(&self, url: &str) -> FxResult<FeedRates> {
        debug!(url, "Fetching exchange rates");

        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| FxError::Transport(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| FxError::Transport(format!("non-success status: {e}")))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| FxError::Transport(format!("failed to read body: {e}")))?;

        parse_feed_response(&body)
    }
}

#[async_trait]
impl RateFeed for HttpRateFeed {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, base: &Currency) -> FxResult<FeedRates> {
        let primary = Self::document_url(&self.primary_url, base);
        match self.fetch_from(&primary).await {
            Ok(rates) => Ok(rates),
            Err(e) => {
                warn!(base = %base, error = %e, "Primary rate feed failed, trying fallback");
                let fallback = Self::document_url(&self.fallback_url, base);
                self.fetch_from(&fallback).await
            }
        }
    }
}

/// Configuration for the rate service.
#[derive(Debug, Clone)]
pub struct RateServiceConfig {
    pub primary_url: String,
    pub fallback_url: String,
    /// Timeout for a single HTTP request.
    pub http_timeout: StdDuration,
    /// How long a fetched rate table is reused.
    pub cache_timeout: Duration,
}

impl Default for RateServiceConfig {
    fn default() -> Self {
        Self {
            primary_url: PRIMARY_FEED_URL.to_string(),
            fallback_url: FALLBACK_FEED_URL.to_string(),
            http_timeout: constants::http_timeout().as_std(),
            cache_timeout: constants::rate_refresh_interval(),
        }
    }
}

impl RateServiceConfig {
    pub fn validate(&self) -> FxResult<()> {
        if self.primary_url.is_empty() {
            return Err(FxError::InvalidConfig("primary feed URL cannot be empty".to_string()));
        }
        if self.http_timeout.is_zero() {
            return Err(FxError::InvalidConfig("HTTP timeout cannot be zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CachedRates {
    date: Option<NaiveDate>,
    rates: Arc<HashMap<Currency, Decimal>>,
    expires_at: Timestamp,
}

/// Conversion backend answering from per-base rate tables fetched from a
/// [`RateFeed`] and kept for the configured cache timeout.
pub struct RateService {
    feed: Arc<dyn RateFeed>,
    tables: DashMap<Currency, CachedRates>,
    supported: Vec<CurrencyInfo>,
    clock: Arc<dyn Clock>,
    config: RateServiceConfig,
}

impl RateService {
    pub fn new(feed: Arc<dyn RateFeed>, config: RateServiceConfig, clock: Arc<dyn Clock>) -> Self {
        let supported = default_currencies()
            .into_iter()
            .map(|c| CurrencyInfo {
                code: c.code,
                symbol: c.symbol,
                name: c.name,
            })
            .collect();

        Self {
            feed,
            tables: DashMap::new(),
            supported,
            clock,
            config,
        }
    }

    fn cached(&self, base: &Currency) -> Option<CachedRates> {
        let entry = self.tables.get(base)?;
        if self.clock.now() < entry.expires_at {
            debug!(base = %base, "Using cached rates");
            Some(entry.clone())
        } else {
            None
        }
    }

    #[instrument(skip(self), fields(feed = self.feed.name()))]
    async fn refresh_table(&self, base: &Currency) -> FxResult<CachedRates> {
        let fetched = self.feed.fetch(base).await?;
        let cached = CachedRates {
            date: fetched.date,
            rates: Arc::new(fetched.rates),
            expires_at: self.clock.now() + self.config.cache_timeout,
        };
        self.tables.insert(base.clone(), cached.clone());

        info!(
            base = %base,
            rates = cached.rates.len(),
            expires_at = %cached.expires_at,
            "Cached rate table"
        );
        Ok(cached)
    }

    async fn table(&self, base: &Currency) -> FxResult<CachedRates> {
        match self.cached(base) {
            Some(table) => Ok(table),
            None => self.refresh_table(base).await,
        }
    }

    /// Units of `to` per one unit of `from`.
    pub async fn exchange_rate(&self, from: &Currency, to: &Currency) -> FxResult<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }

        if let Some(rate) = self.cached(from).and_then(|t| t.rates.get(to).copied()) {
            return Ok(rate);
        }

        let table = self.refresh_table(from).await?;
        table.rates.get(to).copied().ok_or_else(|| FxError::RateNotFound {
            from: from.clone(),
            to: to.clone(),
        })
    }

    /// Drop every cached rate table.
    pub fn clear_cache(&self) {
        self.tables.clear();
        info!("Rate table cache cleared");
    }

    /// Number of cached rate tables, expired or not.
    pub fn cached_tables(&self) -> usize {
        self.tables.len()
    }
}

#[async_trait]
impl ConversionBackend for RateService {
    fn name(&self) -> &str {
        "rate-service"
    }

    async fn perform_conversion(
        &self,
        amount: Decimal,
        from: &Currency,
        to: &Currency,
    ) -> FxResult<ConversionQuote> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(FxError::InvalidAmount(amount));
        }

        let rate = self.exchange_rate(from, to).await?;
        let converted_amount = amount
            .checked_mul(rate)
            .ok_or_else(|| FxError::conversion(from, to, "converted amount overflowed"))?;

        debug!(
            amount = %amount,
            from = %from,
            to = %to,
            converted = %converted_amount,
            rate = %rate,
            "Conversion successful"
        );

        Ok(ConversionQuote {
            amount,
            from_currency: from.clone(),
            to_currency: to.clone(),
            converted_amount,
            exchange_rate: rate,
            as_of: self.clock.now(),
        })
    }

    async fn invalidate_upstream_cache(&self) -> FxResult<()> {
        self.clear_cache();
        Ok(())
    }

    async fn fetch_supported_currencies(&self) -> FxResult<Vec<CurrencyInfo>> {
        Ok(self.supported.clone())
    }

    async fn fetch_rates_for_base(&self, base: &Currency) -> FxResult<RatesSnapshot> {
        let table = self.table(base).await?;
        Ok(RatesSnapshot {
            date: table
                .date
                .unwrap_or_else(|| self.clock.now().date_naive()),
            base: base.clone(),
            rates: (*table.rates).clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricedesk_common::ManualClock;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    struct StubFeed {
        fetches: AtomicUsize,
        failing: AtomicBool,
    }

    impl StubFeed {
        fn new() -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RateFeed for StubFeed {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, base: &Currency) -> FxResult<FeedRates> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FxError::Transport("stub down".to_string()));
            }
            let body = format!(
                r#"{{"date":"2024-05-01","{}":{{"usd":0.19,"eur":0.175,"jpy":29.5}}}}"#,
                base.code().to_lowercase()
            );
            parse_feed_response(body.as_bytes())
        }
    }

    fn service() -> (Arc<StubFeed>, Arc<ManualClock>, RateService) {
        let feed = Arc::new(StubFeed::new());
        let clock = Arc::new(ManualClock::starting_now());
        let service = RateService::new(feed.clone(), RateServiceConfig::default(), clock.clone());
        (feed, clock, service)
    }

    #[test]
    fn test_parse_feed_response() {
        let body = br#"{"date":"2024-05-01","brl":{"usd":0.19,"eur":0.175,"btc":"n/a"}}"#;
        let parsed = parse_feed_response(body).unwrap();

        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(parsed.rates.len(), 2);
        assert_eq!(parsed.rates.get(&Currency::usd()), Some(&dec!(0.19)));
        assert_eq!(parsed.rates.get(&Currency::eur()), Some(&dec!(0.175)));
    }

    #[test]
    fn test_parse_feed_response_rejects_empty() {
        assert!(matches!(
            parse_feed_response(br#"{"date":"2024-05-01"}"#),
            Err(FxError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_feed_response(b"[1,2,3]"),
            Err(FxError::MalformedResponse(_))
        ));
        assert!(parse_feed_response(b"not json").is_err());
    }

    #[tokio::test]
    async fn test_conversion_uses_cached_table() {
        let (feed, _, service) = service();

        let quote = service
            .perform_conversion(dec!(100), &Currency::brl(), &Currency::usd())
            .await
            .unwrap();
        assert_eq!(quote.converted_amount, dec!(19));
        assert_eq!(quote.exchange_rate, dec!(0.19));

        service
            .perform_conversion(dec!(3), &Currency::brl(), &Currency::eur())
            .await
            .unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_table_expires() {
        let (feed, clock, service) = service();
        service.exchange_rate(&Currency::brl(), &Currency::usd()).await.unwrap();

        clock.advance(Duration::minutes(31));
        service.exchange_rate(&Currency::brl(), &Currency::usd()).await.unwrap();

        assert_eq!(feed.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (feed, _, service) = service();
        service.exchange_rate(&Currency::brl(), &Currency::usd()).await.unwrap();
        assert_eq!(service.cached_tables(), 1);

        service.invalidate_upstream_cache().await.unwrap();
        assert_eq!(service.cached_tables(), 0);

        service.exchange_rate(&Currency::brl(), &Currency::usd()).await.unwrap();
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_same_currency_needs_no_fetch() {
        let (feed, _, service) = service();
        let quote = service
            .perform_conversion(dec!(7), &Currency::eur(), &Currency::eur())
            .await
            .unwrap();

        assert_eq!(quote.converted_amount, dec!(7));
        assert_eq!(feed.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rejects_negative_amount() {
        let (_, _, service) = service();
        let result = service
            .perform_conversion(dec!(-1), &Currency::brl(), &Currency::usd())
            .await;
        assert!(matches!(result, Err(FxError::InvalidAmount(_))));
    }

    #[tokio::test]
    async fn test_overflowing_conversion_is_an_error() {
        let (_, _, service) = service();
        let result = service
            .perform_conversion(Decimal::MAX, &Currency::brl(), &Currency::jpy())
            .await;
        assert!(matches!(result, Err(FxError::ConversionFailure { .. })));
    }

    #[tokio::test]
    async fn test_missing_target_rate() {
        let (_, _, service) = service();
        let result = service.exchange_rate(&Currency::brl(), &Currency::gbp()).await;
        assert!(matches!(result, Err(FxError::RateNotFound { .. })));
    }

    #[tokio::test]
    async fn test_feed_failure_propagates() {
        let (feed, _, service) = service();
        feed.failing.store(true, Ordering::SeqCst);

        let result = service
            .perform_conversion(dec!(1), &Currency::brl(), &Currency::usd())
            .await;
        assert!(matches!(result, Err(FxError::Transport(_))));
    }

    #[tokio::test]
    async fn test_rates_for_base_and_supported() {
        let (_, _, service) = service();

        let snapshot = service.fetch_rates_for_base(&Currency::brl()).await.unwrap();
        assert_eq!(snapshot.date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(snapshot.rates.get(&Currency::usd()), Some(&dec!(0.19)));

        let supported = service.fetch_supported_currencies().await.unwrap();
        assert_eq!(supported.len(), 10);
        assert!(supported.iter().any(|c| c.code == Currency::new("INR")));
    }

    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut read = 0;
            loop {
                let n = socket.read(&mut buf[read..]).await.unwrap();
                read += n;
                if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_http_feed_falls_back_to_mirror() {
        let mirror = serve_once(r#"{"date":"2024-05-02","brl":{"usd":0.2}}"#).await;
        // Nothing listens on the discard port.
        let feed = HttpRateFeed::new("http://127.0.0.1:9", mirror, StdDuration::from_secs(5)).unwrap();

        let rates = feed.fetch(&Currency::brl()).await.unwrap();

        assert_eq!(rates.rates.get(&Currency::usd()), Some(&dec!(0.2)));
        assert_eq!(rates.date, NaiveDate::from_ymd_opt(2024, 5, 2));
    }

    #[test]
    fn test_document_url() {
        assert_eq!(
            HttpRateFeed::document_url("https://feed.example/v1/currencies/", &Currency::brl()),
            "https://feed.example/v1/currencies/brl.json"
        );
    }
}
