//! Liquidity side of the lane contract: reserves, provider positions and the deposit/withdraw
//! flow. These are plain account transactions, they do not go through a lane.
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainClient, ChainError, Receipt};
use crate::lane::TxHash;
use crate::trade::{classify, TradeError};

/// Reserves and the account's own holdings for one token.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PoolPosition {
    pub token: Address,
    pub reserves: U256,
    pub balance: U256,
    pub allowance: U256,
    pub supplied: U256,
}

pub struct LiquidityDesk<C> {
    client: Arc<C>,
}

impl<C> LiquidityDesk<C>
where
    C: ChainClient + Send + Sync + 'static,
{
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    fn remote_failure(&self, action: &str, err: ChainError) -> TradeError {
        error!("POOL: {} failed: {}", action, err);
        classify(&err)
    }

    async fn confirm(
        &self,
        action: &str,
        sent: Result<TxHash, ChainError>,
    ) -> Result<Receipt, TradeError> {
        let tx_hash = sent.map_err(|e| self.remote_failure(action, e))?;
        self.client
            .await_confirmation(tx_hash)
            .await
            .map_err(|e| self.remote_failure(action, e))
    }

    pub async fn position(&self, token: Address) -> Result<PoolPosition, TradeError> {
        let account = self
            .client
            .account()
            .await
            .map_err(|e| self.remote_failure("position", e))?;
        let read = async {
            Ok::<_, ChainError>(PoolPosition {
                token,
                reserves: self.client.read_reserves(token).await?,
                balance: self.client.read_balance(token, account).await?,
                allowance: self
                    .client
                    .read_allowance(token, account, self.client.lane_manager())
                    .await?,
                supplied: self.client.read_liquidity(token, account).await?,
            })
        };
        read.await.map_err(|e| self.remote_failure("position", e))
    }

    /// Deposits `amount` of `token`, approving the lane contract first when the current allowance
    /// does not cover it.
    pub async fn supply(&self, token: Address, amount: U256) -> Result<Receipt, TradeError> {
        let position = self.position(token).await?;
        if position.allowance < amount {
            info!("POOL: Approving {} before supplying {}", token, amount);
            let sent = self
                .client
                .approve(token, self.client.lane_manager(), U256::MAX)
                .await;
            let approved = match sent {
                Ok(tx_hash) => self.client.await_confirmation(tx_hash).await,
                Err(e) => Err(e),
            };
            approved.map_err(|e| TradeError::AuthorizationFailed(e.to_string()))?;
        }

        let sent = self.client.add_liquidity(token, amount).await;
        let receipt = self.confirm("supply", sent).await?;
        info!("POOL: Supplied {} of {} in block {}", amount, token, receipt.block_number);
        Ok(receipt)
    }

    pub async fn withdraw(&self, token: Address, amount: U256) -> Result<Receipt, TradeError> {
        let sent = self.client.remove_liquidity(token, amount).await;
        let receipt = self.confirm("withdraw", sent).await?;
        info!("POOL: Withdrew {} of {} in block {}", amount, token, receipt.block_number);
        Ok(receipt)
    }

    /// Opens the `quote_token`/`base_token` pool at `price_x18` (price scaled by 10^18).
    pub async fn initialize(
        &self,
        quote_token: Address,
        base_token: Address,
        price_x18: U256,
    ) -> Result<Receipt, TradeError> {
        let sent = self
            .client
            .initialize_pool(quote_token, base_token, price_x18)
            .await;
        self.confirm("initialize", sent).await
    }

    /// Mints test tokens to the account.
    pub async fn faucet(&self, token: Address, amount: U256) -> Result<Receipt, TradeError> {
        let account = self
            .client
            .account()
            .await
            .map_err(|e| self.remote_failure("faucet", e))?;
        let sent = self.client.mint(token, account, amount).await;
        self.confirm("faucet", sent).await
    }
}
