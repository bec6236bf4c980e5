//! Locale-driven amount formatting.

use num_format::{Locale, ToFormattedString};
use rust_decimal::{Decimal, RoundingStrategy};

/// Where the currency symbol goes relative to the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolPosition {
    /// `$1.00`
    Prefix,
    /// `R$ 1,00`
    PrefixSpaced,
    /// `1,00 €`
    SuffixSpaced,
}

/// Number locale and symbol placement for one currency locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberStyle {
    pub locale: Locale,
    pub symbol_position: SymbolPosition,
}

impl NumberStyle {
    /// Style for a BCP 47 locale tag. Unknown locales format like `en-US`.
    pub fn for_locale(tag: &str) -> Self {
        let (locale, symbol_position) = match tag {
            "pt-BR" => (Locale::pt, SymbolPosition::PrefixSpaced),
            "de-DE" => (Locale::de, SymbolPosition::SuffixSpaced),
            "fr-FR" => (Locale::fr, SymbolPosition::SuffixSpaced),
            "es-ES" => (Locale::es, SymbolPosition::SuffixSpaced),
            "it-IT" => (Locale::it, SymbolPosition::SuffixSpaced),
            "de-CH" => (Locale::de_CH, SymbolPosition::PrefixSpaced),
            "ja-JP" => (Locale::ja, SymbolPosition::Prefix),
            "zh-CN" => (Locale::zh, SymbolPosition::Prefix),
            _ => (Locale::en, SymbolPosition::Prefix),
        };
        Self {
            locale,
            symbol_position,
        }
    }

    /// Render `amount` with `decimals` fractional digits and `symbol`.
    pub fn format(&self, amount: Decimal, decimals: u32, symbol: &str) -> String {
        let number = self.format_number(amount.abs(), decimals);
        let sign = if amount.is_sign_negative() && !number_is_zero(amount, decimals) {
            "-"
        } else {
            ""
        };

        match self.symbol_position {
            SymbolPosition::Prefix => format!("{sign}{symbol}{number}"),
            SymbolPosition::PrefixSpaced => format!("{sign}{symbol} {number}"),
            SymbolPosition::SuffixSpaced => format!("{sign}{number} {symbol}"),
        }
    }

    fn format_number(&self, amount: Decimal, decimals: u32) -> String {
        let text = fixed_point(amount, decimals);
        let (integer, fraction) = match text.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (text.as_str(), None),
        };

        // Any non-negative Decimal integer part fits in a u128.
        let mut out = match integer.parse::<u128>() {
            Ok(value) => value.to_formatted_string(&self.locale),
            Err(_) => integer.to_string(),
        };
        if let Some(fraction) = fraction {
            out.push_str(self.locale.decimal());
            out.push_str(fraction);
        }
        out
    }
}

/// Plain `<amount>` with exactly `decimals` digits and no grouping.
pub fn fixed_point(amount: Decimal, decimals: u32) -> String {
    let mut value = amount.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    value.rescale(decimals);
    value.to_string()
}

fn number_is_zero(amount: Decimal, decimals: u32) -> bool {
    amount
        .round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero)
        .is_zero()
}
