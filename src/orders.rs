//! Book of the account's orders as the scheduler resolves them. Open orders are newest first,
//! filled and cancelled orders move to history.
use alloy_primitives::U256;
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::lane::{now_millis, LaneId};
use crate::trade::{Execution, Side, TradeError, TradeIntent};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub id: String,
    pub pair: String,
    pub side: Side,
    pub price: Decimal,
    pub amount: Decimal,
    pub total: Decimal,
    pub status: OrderStatus,
    pub timestamp: i64,
    pub lane_id: Option<LaneId>,
    pub amount_in: Option<U256>,
    pub price_x18: Option<U256>,
}

#[derive(Clone, Debug, Default)]
pub struct OrderStore {
    active: Vec<Order>,
    history: Vec<Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> &[Order] {
        &self.active
    }

    pub fn history(&self) -> &[Order] {
        &self.history
    }

    pub fn get(&self, id: &str) -> Option<&Order> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|order| order.id == id)
    }

    /// Opens an order for `intent`. `pair` is used when the intent carries none.
    pub fn add(&mut self, intent: &TradeIntent, pair: &str) -> &Order {
        let order = Order {
            id: intent.id.clone(),
            pair: intent.pair.clone().unwrap_or_else(|| pair.to_string()),
            side: intent.side,
            price: intent.price,
            amount: intent.amount,
            total: intent.total(),
            status: OrderStatus::Open,
            timestamp: now_millis(),
            lane_id: None,
            amount_in: None,
            price_x18: None,
        };
        self.active.insert(0, order);
        &self.active[0]
    }

    fn take_active(&mut self, id: &str) -> Option<Order> {
        let idx = self.active.iter().position(|order| order.id == id)?;
        Some(self.active.remove(idx))
    }

    /// Moves an open order to history as filled, stamped with where it executed.
    pub fn fill(&mut self, id: &str, execution: &Execution) -> Option<&Order> {
        let mut order = self.take_active(id)?;
        order.status = OrderStatus::Filled;
        order.lane_id = Some(execution.lane_id);
        order.amount_in = execution.amount_in;
        order.price_x18 = Some(execution.price_x18);
        order.timestamp = execution.confirmed_at;
        info!("ORDERS: {} filled on lane {}", id, execution.lane_id);
        self.history.insert(0, order);
        self.history.first()
    }

    pub fn cancel(&mut self, id: &str) -> Option<&Order> {
        let mut order = self.take_active(id)?;
        order.status = OrderStatus::Cancelled;
        info!("ORDERS: {} cancelled", id);
        self.history.insert(0, order);
        self.history.first()
    }

    /// Applies a scheduler result to the open order `id`. An unconfirmed trade may still land so
    /// the order stays open, any other failure drops it.
    pub fn record_outcome(&mut self, id: &str, outcome: &Result<Execution, TradeError>) {
        match outcome {
            Ok(execution) => {
                self.fill(id, execution);
            }
            Err(TradeError::Unconfirmed(tx_hash)) => {
                info!("ORDERS: {} still open, waiting on {:?}", id, tx_hash);
            }
            Err(err) => {
                if self.take_active(id).is_some() {
                    info!("ORDERS: {} dropped: {}", id, err);
                }
            }
        }
    }
}
