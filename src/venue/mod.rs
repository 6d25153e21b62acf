//! Trading venue interface
//!
//! The cycle engine talks to the exchange through the [`Venue`] trait:
//! prices, candles, symbol constraints, balances, and market-order
//! execution. The wire format of a live exchange stays behind this seam;
//! the in-process [`PaperVenue`] implements it for demo trading and tests.

pub mod connection;
pub mod paper;

pub use connection::ConnectionManager;
pub use paper::PaperVenue;

use crate::types::{Candle, Interval, TradeSide};
use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Venue-side failure
#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("venue not connected")]
    NotConnected,
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("order rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Order-size constraints for one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolConstraints {
    /// Smallest tradable base-asset quantity
    pub min_qty: Decimal,
    /// Base-asset quantity granularity
    pub step_size: Decimal,
    /// Smallest tradable quote-asset notional
    pub min_notional: Decimal,
}

/// Result of an executed market order
#[derive(Debug, Clone)]
pub struct OrderFill {
    pub order_id: String,
    /// Volume-weighted execution price
    pub avg_price: Decimal,
    /// Base-asset quantity actually filled
    pub executed_qty: Decimal,
    /// Quote-asset notional actually filled
    pub cumulative_quote_qty: Decimal,
}

/// Abstract trading venue
#[async_trait]
pub trait Venue: Send + Sync {
    /// Latest price for a BASE/QUOTE symbol
    async fn price(&self, symbol: &str) -> Result<Decimal, VenueError>;

    /// Most recent candles, oldest first, at most `limit` entries
    async fn candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError>;

    async fn symbol_constraints(&self, symbol: &str) -> Result<SymbolConstraints, VenueError>;

    /// Free balance of one asset ("BTC", "USDT", ...)
    async fn asset_balance(&self, asset: &str) -> Result<Decimal, VenueError>;

    /// Place and fill a market order for `quantity` of the base asset
    async fn market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<OrderFill, VenueError>;
}

/// Floor a quantity to the venue's step size
pub fn quantize(quantity: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return quantity;
    }
    (quantity / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn quantize_floors_to_the_step() {
        assert_eq!(quantize(dec!(0.123456), dec!(0.001)), dec!(0.123));
        assert_eq!(quantize(dec!(5), dec!(1)), dec!(5));
        assert_eq!(quantize(dec!(0.0009), dec!(0.001)), dec!(0));
    }

    #[test]
    fn quantize_ignores_degenerate_steps() {
        assert_eq!(quantize(dec!(1.23), Decimal::ZERO), dec!(1.23));
    }
}
