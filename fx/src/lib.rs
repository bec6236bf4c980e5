//! PriceDesk FX Engine
//!
//! Currency conversion with result caching, graceful fallback and data
//! freshness tracking.
//!
//! # Features
//!
//! - Bounded conversion cache with TTL expiry and bulk age-based eviction
//! - Converter that falls back to approximate rates and never fails
//! - Batched cache warm-up for common amounts
//! - Freshness status derived from connectivity, loading state and data age
//! - Upstream rate service over a public feed with a fallback mirror
//!
//! # Example
//!
//! ```rust,ignore
//! use pricedesk_fx::{FxConfig, PriceEngine};
//! use pricedesk_common::Currency;
//! use rust_decimal_macros::dec;
//!
//! let engine = PriceEngine::with_upstream(FxConfig::from_env())?;
//! engine.start().await;
//!
//! let conversion = engine.convert(dec!(100), &Currency::brl(), &Currency::usd()).await;
//! println!("{} ({})", conversion.output, conversion.source.as_str());
//! ```

pub mod backend;
pub mod cache;
pub mod config;
pub mod conversion;
pub mod converter;
pub mod directory;
pub mod engine;
pub mod error;
pub mod format;
pub mod freshness;
pub mod sync;
pub mod upstream;

pub use backend::{ConversionBackend, ConversionQuote, CurrencyInfo, RatesSnapshot};
#[cfg(any(test, feature = "test-utils"))]
pub use backend::MockBackend;
pub use cache::{CacheStats, ConversionCache, ConversionCacheConfig, ConversionKey};
pub use config::FxConfig;
pub use conversion::{Conversion, ConversionSource, PreloadReport};
pub use converter::{ConverterConfig, CurrencyConverter};
pub use directory::{CurrencyConfig, CurrencyDirectory};
pub use engine::{PriceEngine, PriceEngineStats};
pub use error::{FxError, FxResult};
pub use freshness::{
    derive_freshness, describe_age, ConnectivityProbe, Freshness, FreshnessConfig,
    FreshnessMonitor, StaticConnectivity, TcpConnectivityProbe,
};
pub use sync::{RateSynchronizer, SyncConfig, SyncReport};
pub use upstream::{HttpRateFeed, RateFeed, RateService, RateServiceConfig};
