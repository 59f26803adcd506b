//! Remote side of the scheduler. [ChainClient] is the contract the scheduler is written against,
//! [rpc::HttpClient] talks JSON-RPC to a node or the devnet and [test::TestClient] runs against an
//! in-process [ledger::Ledger].
pub mod abi;
pub mod ledger;
pub mod rpc;
pub mod test;

use std::future::Future;

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::lane::{LaneId, Nonce, TxHash};
use crate::trade::Settlement;

/// Arguments of one `executeTrade` submission.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TradeCall {
    pub lane_id: LaneId,
    pub nonce: Nonce,
    pub order_hash: B256,
    pub settlement: Option<Settlement>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Error object returned by the node, including contract reverts during simulation.
    Rpc { code: i64, message: String },
    /// Non-success HTTP status from the endpoint.
    Http(u16),
    Transport(String),
    Decode(String),
    Reverted(TxHash),
    Timeout(TxHash),
    NoAccount,
}

impl std::error::Error for ChainError {}

impl core::fmt::Display for ChainError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChainError::Rpc { code, message } => write!(f, "{message} (code {code})"),
            ChainError::Http(status) => write!(f, "http status {status}"),
            ChainError::Transport(msg) => write!(f, "transport error: {msg}"),
            ChainError::Decode(msg) => write!(f, "decode error: {msg}"),
            ChainError::Reverted(tx) => write!(f, "transaction {tx} reverted"),
            ChainError::Timeout(tx) => write!(f, "timed out waiting for {tx}"),
            ChainError::NoAccount => write!(f, "no sending account available"),
        }
    }
}

impl From<alloy_sol_types::Error> for ChainError {
    fn from(value: alloy_sol_types::Error) -> Self {
        ChainError::Decode(value.to_string())
    }
}

/// Operations the scheduler needs from the chain. Every call may fail and none of them retry.
pub trait ChainClient {
    /// Address of the lane contract, this is also the spender for token allowances.
    fn lane_manager(&self) -> Address;
    fn account(&self) -> impl Future<Output = Result<Address, ChainError>> + Send;
    /// Current nonce of every lane, index `i` is lane `i + 1`.
    fn read_nonces(&self) -> impl Future<Output = Result<Vec<Nonce>, ChainError>> + Send;
    /// Simulates the trade against current state and, if that passes, submits it.
    fn simulate_and_send(
        &self,
        call: TradeCall,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
    /// Waits for a successful receipt. A reverted transaction is an error.
    fn await_confirmation(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Receipt, ChainError>> + Send;
    fn read_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;
    fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
    fn read_balance(
        &self,
        token: Address,
        owner: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;
    /// Pool reserve of `token`, which is the lane contract's own balance of it.
    fn read_reserves(
        &self,
        token: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send {
        self.read_balance(token, self.lane_manager())
    }
    /// Amount of `token` that `provider` has supplied to the pool.
    fn read_liquidity(
        &self,
        token: Address,
        provider: Address,
    ) -> impl Future<Output = Result<U256, ChainError>> + Send;
    /// Test-token faucet, only tokens that expose `mint` accept it.
    fn mint(
        &self,
        token: Address,
        to: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
    fn initialize_pool(
        &self,
        quote_token: Address,
        base_token: Address,
        price_x18: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
    /// Supplies `amount` of `token` from the account. Needs allowance for the lane contract.
    fn add_liquidity(
        &self,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
    fn remove_liquidity(
        &self,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHash, ChainError>> + Send;
}

pub(crate) fn nonces_from_words(words: Vec<U256>) -> Result<Vec<Nonce>, ChainError> {
    words
        .into_iter()
        .map(|word| {
            u64::try_from(word).map_err(|_| ChainError::Decode(format!("nonce {word} overflows")))
        })
        .collect()
}
