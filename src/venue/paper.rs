//! Simulated in-process venue for demo trading and tests
//!
//! Holds per-asset balances, seeded prices and candles, and fills market
//! orders at the current price with step-size quantization and
//! min-notional enforcement.

use super::{quantize, OrderFill, SymbolConstraints, Venue, VenueError};
use crate::types::{Candle, Interval, TradeSide};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

fn default_constraints() -> SymbolConstraints {
    SymbolConstraints {
        min_qty: dec!(0.00001),
        step_size: dec!(0.00001),
        min_notional: dec!(10),
    }
}

#[derive(Default)]
struct PaperBook {
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    balances: HashMap<String, Decimal>,
    constraints: HashMap<String, SymbolConstraints>,
}

/// Paper-trading venue
pub struct PaperVenue {
    book: RwLock<PaperBook>,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self {
            book: RwLock::new(PaperBook::default()),
        }
    }

    /// Credit an asset balance
    pub async fn deposit(&self, asset: &str, amount: Decimal) {
        let mut book = self.book.write().await;
        *book.balances.entry(asset.to_string()).or_default() += amount;
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.book
            .write()
            .await
            .prices
            .insert(symbol.to_string(), price);
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.book
            .write()
            .await
            .candles
            .insert(symbol.to_string(), candles);
    }

    pub async fn set_constraints(&self, symbol: &str, constraints: SymbolConstraints) {
        self.book
            .write()
            .await
            .constraints
            .insert(symbol.to_string(), constraints);
    }

    fn split_symbol(symbol: &str) -> Result<(&str, &str), VenueError> {
        symbol
            .split_once('/')
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Venue for PaperVenue {
    async fn price(&self, symbol: &str) -> Result<Decimal, VenueError> {
        self.book
            .read()
            .await
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))
    }

    async fn candles(
        &self,
        symbol: &str,
        _interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueError> {
        let book = self.book.read().await;
        let candles = book
            .candles
            .get(symbol)
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        let start = candles.len().saturating_sub(limit);
        Ok(candles[start..].to_vec())
    }

    async fn symbol_constraints(&self, symbol: &str) -> Result<SymbolConstraints, VenueError> {
        Ok(self
            .book
            .read()
            .await
            .constraints
            .get(symbol)
            .copied()
            .unwrap_or_else(default_constraints))
    }

    async fn asset_balance(&self, asset: &str) -> Result<Decimal, VenueError> {
        Ok(self
            .book
            .read()
            .await
            .balances
            .get(asset)
            .copied()
            .unwrap_or_default())
    }

    async fn market_order(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: Decimal,
    ) -> Result<OrderFill, VenueError> {
        let (base, quote) = Self::split_symbol(symbol)?;
        let mut book = self.book.write().await;

        let price = book
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| VenueError::UnknownSymbol(symbol.to_string()))?;
        let constraints = book
            .constraints
            .get(symbol)
            .copied()
            .unwrap_or_else(default_constraints);

        let qty = quantize(quantity, constraints.step_size);
        if qty < constraints.min_qty || qty <= Decimal::ZERO {
            return Err(VenueError::Rejected(format!(
                "quantity {quantity} below minimum {}",
                constraints.min_qty
            )));
        }
        let notional = qty * price;
        if notional < constraints.min_notional {
            return Err(VenueError::Rejected(format!(
                "notional {notional} below minimum {}",
                constraints.min_notional
            )));
        }

        match side {
            TradeSide::Buy => {
                let funds = book.balances.get(quote).copied().unwrap_or_default();
                if funds < notional {
                    return Err(VenueError::Rejected(format!(
                        "insufficient {quote} balance: {funds} < {notional}"
                    )));
                }
                *book.balances.entry(quote.to_string()).or_default() -= notional;
                *book.balances.entry(base.to_string()).or_default() += qty;
            }
            TradeSide::Sell => {
                let held = book.balances.get(base).copied().unwrap_or_default();
                if held < qty {
                    return Err(VenueError::Rejected(format!(
                        "insufficient {base} balance: {held} < {qty}"
                    )));
                }
                *book.balances.entry(base.to_string()).or_default() -= qty;
                *book.balances.entry(quote.to_string()).or_default() += notional;
            }
        }

        Ok(OrderFill {
            order_id: Uuid::new_v4().to_string(),
            avg_price: price,
            executed_qty: qty,
            cumulative_quote_qty: notional,
        })
    }
}
