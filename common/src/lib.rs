//! PriceDesk Common Types
//!
//! Shared types used across PriceDesk: currency codes, money amounts,
//! amount normalization, timing constants and the clock abstraction.

pub mod monetary;
pub mod time;

pub use monetary::*;
pub use time::*;
