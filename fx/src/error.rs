//! FX error types.

use pricedesk_common::Currency;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur while converting or refreshing rates.
#[derive(Debug, Error)]
pub enum FxError {
    /// The external conversion call was rejected, timed out or returned
    /// unusable data.
    #[error("Conversion {from}->{to} failed: {reason}")]
    ConversionFailure {
        from: Currency,
        to: Currency,
        reason: String,
    },

    /// Currency code absent from the directory.
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(Currency),

    /// The cache could not make room for a new entry. Never leaves the cache.
    #[error("Conversion cache is full ({capacity} entries)")]
    CacheCapacityExceeded { capacity: usize },

    /// The currency directory holds no currencies at all.
    #[error("Currency directory is empty")]
    EmptyDirectory,

    /// Transport-level failure talking to a rate feed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A rate feed answered with something we could not interpret.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Negative amounts cannot be converted.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// The rate table for `from` has no entry for `to`.
    #[error("Exchange rate not found for {from} to {to}")]
    RateNotFound { from: Currency, to: Currency },

    /// Configuration value out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FxError {
    /// Wrap any error as a conversion failure for the given pair.
    pub fn conversion(from: &Currency, to: &Currency, reason: impl ToString) -> Self {
        FxError::ConversionFailure {
            from: from.clone(),
            to: to.clone(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FxError::ConversionFailure { .. } | FxError::Transport(_)
        )
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
