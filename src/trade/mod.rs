//! Trade intents, the on-chain terms derived from them and the outcome types returned by the
//! scheduler.
mod error;
mod terms;

pub use error::{classify, TradeError, FAULT_DETAIL_LIMIT};
pub use terms::{order_hash, to_fixed, HashPrecision, Market, OrderTerms, Settlement};

use alloy_primitives::{B256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lane::{LaneId, Nonce, TxHash};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to trade. Only lives for the duration of one scheduling call.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TradeIntent {
    /// Correlation id supplied by the caller, bound into the order hash.
    pub id: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub pair: Option<String>,
}

impl TradeIntent {
    fn new(id: impl Into<String>, side: Side, price: Decimal, amount: Decimal) -> Self {
        Self {
            id: id.into(),
            side,
            price,
            amount,
            pair: None,
        }
    }

    pub fn buy(id: impl Into<String>, price: Decimal, amount: Decimal) -> Self {
        TradeIntent::new(id, Side::Buy, price, amount)
    }

    pub fn sell(id: impl Into<String>, price: Decimal, amount: Decimal) -> Self {
        TradeIntent::new(id, Side::Sell, price, amount)
    }

    pub fn with_pair(mut self, pair: impl Into<String>) -> Self {
        self.pair = Some(pair.into());
        self
    }

    pub fn total(&self) -> Decimal {
        self.price * self.amount
    }
}

/// Commit metadata for a confirmed trade.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Execution {
    pub lane_id: LaneId,
    /// Nonce the trade was sequenced with, the lane has since advanced past it.
    pub nonce: Nonce,
    pub tx_hash: TxHash,
    pub order_hash: B256,
    pub block_number: u64,
    pub confirmed_at: i64,
    pub amount_in: Option<U256>,
    pub price_x18: U256,
}
