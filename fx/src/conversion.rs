//! Conversion outcome types.

use pricedesk_common::{Currency, Money, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a converted amount came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversionSource {
    /// Same currency on both sides, or a zero amount.
    Identity,
    /// Served from the conversion cache.
    Cache,
    /// Fresh result from the conversion backend.
    Live { as_of: Timestamp },
    /// Backend failed; estimated from the directory's approximate rates.
    StaticTable,
    /// Backend failed and no approximate rate was known; amount returned as is.
    Passthrough,
}

impl ConversionSource {
    /// Whether the result came from a fallback tier.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConversionSource::StaticTable | ConversionSource::Passthrough)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionSource::Identity => "identity",
            ConversionSource::Cache => "cache",
            ConversionSource::Live { .. } => "live",
            ConversionSource::StaticTable => "static_table",
            ConversionSource::Passthrough => "passthrough",
        }
    }
}

/// Represents a completed currency conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversion {
    /// Unique conversion ID.
    pub id: Uuid,
    /// Input amount.
    pub input: Money,
    /// Output amount.
    pub output: Money,
    /// Rate applied, units of output per unit of input.
    pub rate: Decimal,
    /// Which tier produced the output.
    pub source: ConversionSource,
    /// When the conversion was executed.
    pub executed_at: Timestamp,
}

impl Conversion {
    /// Create a new conversion record.
    pub fn new(
        input: Money,
        output: Money,
        rate: Decimal,
        source: ConversionSource,
        executed_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            input,
            output,
            rate,
            source,
            executed_at,
        }
    }

    /// A conversion that hands the input back unchanged under `to`.
    pub fn unchanged(
        amount: Decimal,
        from: &Currency,
        to: &Currency,
        source: ConversionSource,
        executed_at: Timestamp,
    ) -> Self {
        Self::new(
            Money::new(amount, from.clone()),
            Money::new(amount, to.clone()),
            Decimal::ONE,
            source,
            executed_at,
        )
    }
}

/// Outcome of a cache warm-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conversion_serializes_source_tag() {
        let conversion = Conversion::new(
            Money::new(dec!(1000), Currency::brl()),
            Money::new(dec!(200), Currency::usd()),
            dec!(0.2),
            ConversionSource::Cache,
            chrono::Utc::now(),
        );

        let json = serde_json::to_value(&conversion).unwrap();
        assert_eq!(json["rate"], serde_json::json!("0.2"));
        assert_eq!(json["output"]["currency"], serde_json::json!("USD"));
        assert_eq!(json["source"]["kind"], serde_json::json!("cache"));
    }

    #[test]
    fn test_unchanged_conversion() {
        let conversion = Conversion::unchanged(
            dec!(0),
            &Currency::brl(),
            &Currency::usd(),
            ConversionSource::Identity,
            chrono::Utc::now(),
        );

        assert_eq!(conversion.output.value, dec!(0));
        assert_eq!(conversion.output.currency, Currency::usd());
        assert_eq!(conversion.rate, Decimal::ONE);
    }

    #[test]
    fn test_source_degraded() {
        assert!(ConversionSource::StaticTable.is_degraded());
        assert!(ConversionSource::Passthrough.is_degraded());
        assert!(!ConversionSource::Cache.is_degraded());
        assert!(!ConversionSource::Live {
            as_of: chrono::Utc::now()
        }
        .is_degraded());
    }

    #[test]
    fn test_source_serializes_with_tag() {
        let json = serde_json::to_value(ConversionSource::StaticTable).unwrap();
        assert_eq!(json["kind"], "static_table");
    }
}
