//! In-memory stand-in for the lane contract and the tokens it settles in.
//!
//! The ledger only works in calldata, the same bytes a node would receive, so both the devnet
//! server and [TestClient](crate::chain::test::TestClient) exercise the real ABI encoding.
use std::collections::{HashMap, HashSet};

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolInterface};
use log::debug;
use serde::{Deserialize, Serialize};

use super::abi::{IERC20, ILaneManager};
use super::{ChainError, Receipt};
use crate::lane::{LaneId, Nonce, TxHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revert(pub String);

impl std::error::Error for Revert {}

impl core::fmt::Display for Revert {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "execution reverted: {}", self.0)
    }
}

/// JSON-RPC error code nodes use for reverted execution.
pub const REVERT_CODE: i64 = 3;

impl From<Revert> for ChainError {
    fn from(value: Revert) -> Self {
        ChainError::Rpc {
            code: REVERT_CODE,
            message: value.to_string(),
        }
    }
}

fn revert<T>(reason: &str) -> Result<T, Revert> {
    Err(Revert(reason.to_string()))
}

#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct ExecutedTrade {
    pub lane_id: LaneId,
    pub nonce: Nonce,
    pub user: Address,
    pub order_hash: B256,
    pub token_in: Address,
    pub amount_in: U256,
    pub block_number: u64,
}

#[derive(Clone, Debug, Default)]
struct Token {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl Token {
    fn balance(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or(U256::ZERO)
    }

    fn allowance(&self, owner: &Address, spender: &Address) -> U256 {
        self.allowances
            .get(&(*owner, *spender))
            .copied()
            .unwrap_or(U256::ZERO)
    }
}

#[derive(Clone, Debug)]
pub struct Ledger {
    lane_manager: Address,
    lane_nonces: Vec<Nonce>,
    executed: HashSet<B256>,
    tokens: HashMap<Address, Token>,
    //(provider, token) -> amount supplied
    positions: HashMap<(Address, Address), U256>,
    //(quote, base) -> initial price scaled by 10^18
    pools: HashMap<(Address, Address), U256>,
    trades: Vec<ExecutedTrade>,
    receipts: HashMap<TxHash, Receipt>,
    block: u64,
    tx_count: u64,
}

impl Ledger {
    pub fn new(lane_manager: Address, lanes: usize) -> Self {
        Self {
            lane_manager,
            lane_nonces: vec![0; lanes],
            executed: HashSet::new(),
            tokens: HashMap::new(),
            positions: HashMap::new(),
            pools: HashMap::new(),
            trades: Vec::new(),
            receipts: HashMap::new(),
            block: 0,
            tx_count: 0,
        }
    }

    pub fn add_token(&mut self, token: Address) {
        self.tokens.entry(token).or_default();
    }

    pub fn mint_to(&mut self, token: Address, account: Address, amount: U256) {
        let state = self.tokens.entry(token).or_default();
        let balance = state.balance(&account);
        state.balances.insert(account, balance + amount);
    }

    pub fn lane_manager(&self) -> Address {
        self.lane_manager
    }

    pub fn nonces(&self) -> &[Nonce] {
        &self.lane_nonces
    }

    /// Moves a lane's sequence directly, as if it had been advanced by another client.
    pub fn set_nonce(&mut self, lane_id: LaneId, nonce: Nonce) -> bool {
        match self.lane_index(lane_id) {
            Some(idx) => {
                self.lane_nonces[idx] = nonce;
                true
            }
            None => false,
        }
    }

    pub fn balance(&self, token: Address, account: Address) -> U256 {
        self.tokens
            .get(&token)
            .map(|t| t.balance(&account))
            .unwrap_or(U256::ZERO)
    }

    pub fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.tokens
            .get(&token)
            .map(|t| t.allowance(&owner, &spender))
            .unwrap_or(U256::ZERO)
    }

    pub fn liquidity(&self, token: Address, provider: Address) -> U256 {
        self.positions
            .get(&(provider, token))
            .copied()
            .unwrap_or(U256::ZERO)
    }

    pub fn pool_price(&self, quote_token: Address, base_token: Address) -> Option<U256> {
        self.pools.get(&(quote_token, base_token)).copied()
    }

    pub fn trades(&self) -> &[ExecutedTrade] {
        &self.trades
    }

    pub fn block_number(&self) -> u64 {
        self.block
    }

    pub fn receipt(&self, tx_hash: &TxHash) -> Option<Receipt> {
        self.receipts.get(tx_hash).copied()
    }

    fn lane_index(&self, lane_id: LaneId) -> Option<usize> {
        let idx = (lane_id as usize).checked_sub(1)?;
        (idx < self.lane_nonces.len()).then_some(idx)
    }

    /// Runs calldata against a copy of the state, nothing is kept.
    pub fn call(&self, from: Address, to: Address, data: &[u8]) -> Result<Bytes, Revert> {
        self.clone().dispatch(from, to, data)
    }

    /// Mines the calldata into a new block. A revert is recorded as a failed receipt and leaves
    /// state untouched.
    pub fn transact(&mut self, from: Address, to: Address, data: &[u8]) -> TxHash {
        self.tx_count += 1;
        self.block += 1;

        let mut preimage = Vec::with_capacity(data.len() + 48);
        preimage.extend_from_slice(from.as_slice());
        preimage.extend_from_slice(to.as_slice());
        preimage.extend_from_slice(data);
        preimage.extend_from_slice(&self.tx_count.to_be_bytes());
        let tx_hash = keccak256(&preimage);

        let success = match self.dispatch(from, to, data) {
            Ok(_) => true,
            Err(reason) => {
                debug!("LEDGER: {:?} failed: {}", tx_hash, reason);
                false
            }
        };
        self.receipts.insert(
            tx_hash,
            Receipt {
                tx_hash,
                block_number: self.block,
                success,
            },
        );
        tx_hash
    }

    //Every branch validates before it writes, a revert leaves no partial update
    fn dispatch(&mut self, from: Address, to: Address, data: &[u8]) -> Result<Bytes, Revert> {
        if to == self.lane_manager {
            let call = ILaneManager::ILaneManagerCalls::abi_decode(data, true)
                .or_else(|_| revert("invalid calldata"))?;
            self.lane_manager_call(from, call)
        } else if self.tokens.contains_key(&to) {
            let call =
                IERC20::IERC20Calls::abi_decode(data, true).or_else(|_| revert("invalid calldata"))?;
            self.token_call(from, to, call)
        } else {
            revert("no contract at address")
        }
    }

    fn lane_manager_call(
        &mut self,
        from: Address,
        call: ILaneManager::ILaneManagerCalls,
    ) -> Result<Bytes, Revert> {
        use ILaneManager::ILaneManagerCalls;

        match call {
            ILaneManagerCalls::getAllNonces(_) => {
                let nonces: Vec<U256> = self.lane_nonces.iter().map(|n| U256::from(*n)).collect();
                Ok(ILaneManager::getAllNoncesCall::abi_encode_returns(&(nonces,)).into())
            }
            ILaneManagerCalls::laneNonces(req) => {
                let lane_id = u64::try_from(req.laneId).unwrap_or(0);
                let idx = match self.lane_index(lane_id) {
                    Some(idx) => idx,
                    None => return revert("InvalidLane"),
                };
                let nonce = U256::from(self.lane_nonces[idx]);
                Ok(ILaneManager::laneNoncesCall::abi_encode_returns(&(nonce,)).into())
            }
            ILaneManagerCalls::executeTrade(req) => {
                let lane_id = u64::try_from(req.laneId).unwrap_or(0);
                let idx = match self.lane_index(lane_id) {
                    Some(idx) => idx,
                    None => return revert("InvalidLane"),
                };
                let current = self.lane_nonces[idx];
                if req.expectedNonce != U256::from(current) {
                    return revert("InvalidNonce");
                }
                if self.executed.contains(&req.orderHash) {
                    return revert("OrderAlreadyExecuted");
                }

                if !req.amountIn.is_zero() {
                    self.pull(req.tokenIn, from, req.amountIn)?;
                }

                self.lane_nonces[idx] = current + 1;
                self.executed.insert(req.orderHash);
                self.trades.push(ExecutedTrade {
                    lane_id,
                    nonce: current,
                    user: from,
                    order_hash: req.orderHash,
                    token_in: req.tokenIn,
                    amount_in: req.amountIn,
                    block_number: self.block,
                });
                Ok(ILaneManager::executeTradeCall::abi_encode_returns(&()).into())
            }
            ILaneManagerCalls::initializePool(req) => {
                if !self.tokens.contains_key(&req.quoteToken)
                    || !self.tokens.contains_key(&req.baseToken)
                {
                    return revert("UnknownToken");
                }
                if req.quoteToken == req.baseToken || req.priceX18.is_zero() {
                    return revert("InvalidPool");
                }
                let key = (req.quoteToken, req.baseToken);
                if self.pools.contains_key(&key) {
                    return revert("PoolAlreadyInitialized");
                }
                self.pools.insert(key, req.priceX18);
                Ok(ILaneManager::initializePoolCall::abi_encode_returns(&()).into())
            }
            ILaneManagerCalls::addLiquidity(req) => {
                if req.amount.is_zero() {
                    return revert("InvalidAmount");
                }
                self.pull(req.token, from, req.amount)?;
                let position = self.liquidity(req.token, from);
                self.positions
                    .insert((from, req.token), position + req.amount);
                Ok(ILaneManager::addLiquidityCall::abi_encode_returns(&()).into())
            }
            ILaneManagerCalls::removeLiquidity(req) => {
                if req.amount.is_zero() {
                    return revert("InvalidAmount");
                }
                let position = self.liquidity(req.token, from);
                if position < req.amount {
                    return revert("InsufficientLiquidity");
                }
                let spender = self.lane_manager;
                let token = match self.tokens.get_mut(&req.token) {
                    Some(token) => token,
                    None => return revert("UnknownToken"),
                };
                let held = token.balance(&spender);
                if held < req.amount {
                    return revert("ERC20: transfer amount exceeds balance");
                }
                token.balances.insert(spender, held - req.amount);
                let balance = token.balance(&from);
                token.balances.insert(from, balance + req.amount);
                self.positions
                    .insert((from, req.token), position - req.amount);
                Ok(ILaneManager::removeLiquidityCall::abi_encode_returns(&()).into())
            }
            ILaneManagerCalls::userLiquidity(req) => {
                let position = self.liquidity(req.token, req.user);
                Ok(ILaneManager::userLiquidityCall::abi_encode_returns(&(position,)).into())
            }
        }
    }

    //Moves `amount` of `token` from `from` into the lane manager against its allowance
    fn pull(&mut self, token: Address, from: Address, amount: U256) -> Result<(), Revert> {
        let spender = self.lane_manager;
        let token = match self.tokens.get_mut(&token) {
            Some(token) => token,
            None => return revert("UnknownToken"),
        };
        let allowance = token.allowance(&from, &spender);
        if allowance < amount {
            return revert("ERC20: insufficient allowance");
        }
        let balance = token.balance(&from);
        if balance < amount {
            return revert("ERC20: transfer amount exceeds balance");
        }
        if allowance != U256::MAX {
            token.allowances.insert((from, spender), allowance - amount);
        }
        token.balances.insert(from, balance - amount);
        let held = token.balance(&spender);
        token.balances.insert(spender, held + amount);
        Ok(())
    }

    fn token_call(
        &mut self,
        from: Address,
        token: Address,
        call: IERC20::IERC20Calls,
    ) -> Result<Bytes, Revert> {
        use IERC20::IERC20Calls;

        let state = match self.tokens.get_mut(&token) {
            Some(state) => state,
            None => return revert("no contract at address"),
        };
        match call {
            IERC20Calls::balanceOf(req) => {
                let balance = state.balance(&req.account);
                Ok(IERC20::balanceOfCall::abi_encode_returns(&(balance,)).into())
            }
            IERC20Calls::allowance(req) => {
                let allowance = state.allowance(&req.owner, &req.spender);
                Ok(IERC20::allowanceCall::abi_encode_returns(&(allowance,)).into())
            }
            IERC20Calls::approve(req) => {
                state.allowances.insert((from, req.spender), req.amount);
                Ok(IERC20::approveCall::abi_encode_returns(&(true,)).into())
            }
            IERC20Calls::mint(req) => {
                let balance = state.balance(&req.to);
                state.balances.insert(req.to, balance + req.amount);
                Ok(IERC20::mintCall::abi_encode_returns(&()).into())
            }
        }
    }
}
