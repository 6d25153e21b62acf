//! Cycle-error taxonomy
//!
//! Recoverable errors are expected operational conditions: the orchestrator
//! logs them to the activity feed and the bot retries on its next tick.
//! Everything else escalates the bot to the `error` status, which stops
//! future ticks until the user restarts it.

use crate::venue::VenueError;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("venue not connected")]
    NotConnected,

    #[error("insufficient candle data: have {have}, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("insufficient {asset} balance: {available} available, {required} required")]
    InsufficientBalance {
        asset: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("order execution failed: {0}")]
    OrderExecution(String),

    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CycleError {
    /// Whether the bot stays active and simply retries next tick
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CycleError::InsufficientData { .. }
                | CycleError::InsufficientBalance { .. }
                | CycleError::OrderExecution(_)
        )
    }

    /// Classify an order-placement failure: lost connectivity stays fatal,
    /// venue rejections are recoverable order-execution errors
    pub fn from_order(err: VenueError) -> Self {
        match err {
            VenueError::NotConnected => CycleError::NotConnected,
            other => CycleError::OrderExecution(other.to_string()),
        }
    }
}
