//! JSON-RPC client for a node exposing the lane contract. The wire types are shared with the
//! [devnet](crate::devnet) server.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256, U64};
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use super::{abi, nonces_from_words, ChainClient, ChainError, Receipt, TradeCall};
use crate::config::Config;
use crate::lane::{LaneId, Nonce, TxHash};

/// Transaction envelope type for lane-keyed transactions with a fee token.
pub const LANE_TX_TYPE: u64 = 0x76;

#[derive(Debug, Deserialize, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: u64, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    #[serde(alias = "input")]
    pub data: Bytes,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce_key: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_token: Option<Address>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    pub block_number: U64,
    pub status: U64,
}

impl From<Receipt> for RpcReceipt {
    fn from(value: Receipt) -> Self {
        Self {
            transaction_hash: value.tx_hash,
            block_number: U64::from(value.block_number),
            status: U64::from(value.success as u64),
        }
    }
}

impl From<RpcReceipt> for Receipt {
    fn from(value: RpcReceipt) -> Self {
        Self {
            tx_hash: value.transaction_hash,
            block_number: value.block_number.to::<u64>(),
            success: value.status == U64::from(1),
        }
    }
}

#[derive(Debug)]
pub struct HttpClient {
    pub path: String,
    pub client: reqwest::Client,
    lane_manager: Address,
    account: OnceCell<Address>,
    api_key: Option<String>,
    fee_token: Option<Address>,
    poll_interval: Duration,
    confirmation_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(path: String, lane_manager: Address) -> Self {
        Self {
            path,
            client: reqwest::Client::new(),
            lane_manager,
            account: OnceCell::new(),
            api_key: None,
            fee_token: None,
            poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut client = HttpClient::new(config.rpc_url.clone(), config.lane_manager)
            .with_polling(config.poll_interval(), config.confirmation_timeout());
        if let Some(account) = config.account {
            client = client.with_account(account);
        }
        if let Some(key) = &config.api_key {
            client = client.with_api_key(key.clone());
        }
        if let Some(token) = config.fee_token {
            client = client.with_fee_token(token);
        }
        client
    }

    pub fn with_account(mut self, account: Address) -> Self {
        self.account = OnceCell::new_with(Some(account));
        self
    }

    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    /// Sends trades as lane-keyed transactions paying fees in `token`.
    pub fn with_fee_token(mut self, token: Address) -> Self {
        self.fee_token = Some(token);
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, confirmation_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.confirmation_timeout = confirmation_timeout;
        self
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, ChainError> {
        let req = RpcRequest {
            jsonrpc: "2.0".to_string(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };

        let mut builder = self.client.post(self.path.clone()).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ChainError::Http(status.as_u16()));
        }

        let body = resp
            .json::<RpcResponse>()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        if let Some(err) = body.error {
            debug!("RPC: {} failed with {}: {}", method, err.code, err.message);
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| ChainError::Decode(e.to_string()))
    }

    fn transaction(
        &self,
        from: Address,
        to: Address,
        data: Bytes,
        lane_id: Option<LaneId>,
    ) -> TransactionRequest {
        let mut tx = TransactionRequest {
            from: Some(from),
            to,
            data,
            ..Default::default()
        };
        if let Some(token) = self.fee_token {
            tx.tx_type = Some(U64::from(LANE_TX_TYPE));
            tx.fee_token = Some(token);
            tx.nonce_key = lane_id.map(U256::from);
        }
        tx
    }

    fn encode(tx: &TransactionRequest) -> Result<Value, ChainError> {
        serde_json::to_value(tx).map_err(|e| ChainError::Decode(e.to_string()))
    }

    async fn eth_call(&self, tx: &TransactionRequest) -> Result<Bytes, ChainError> {
        self.request("eth_call", vec![Self::encode(tx)?, Value::from("latest")])
            .await
    }

    async fn simulate_then_send(&self, tx: TransactionRequest) -> Result<TxHash, ChainError> {
        self.eth_call(&tx).await?;
        self.request("eth_sendTransaction", vec![Self::encode(&tx)?])
            .await
    }

    async fn call_uint(&self, to: Address, data: Bytes) -> Result<U256, ChainError> {
        let tx = TransactionRequest {
            to,
            data,
            ..Default::default()
        };
        let data = self.eth_call(&tx).await?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<TxHash, ChainError> {
        let from = self.account().await?;
        let tx = self.transaction(from, to, data, None);
        self.simulate_then_send(tx).await
    }

    async fn receipt(&self, tx_hash: TxHash) -> Result<Option<RpcReceipt>, ChainError> {
        self.request("eth_getTransactionReceipt", vec![Value::from(tx_hash.to_string())])
            .await
    }
}

impl ChainClient for HttpClient {
    fn lane_manager(&self) -> Address {
        self.lane_manager
    }

    async fn account(&self) -> Result<Address, ChainError> {
        self.account
            .get_or_try_init(|| async {
                let accounts: Vec<Address> = self.request("eth_accounts", Vec::new()).await?;
                accounts.first().copied().ok_or(ChainError::NoAccount)
            })
            .await
            .copied()
    }

    async fn read_nonces(&self) -> Result<Vec<Nonce>, ChainError> {
        let tx = TransactionRequest {
            to: self.lane_manager,
            data: abi::get_all_nonces(),
            ..Default::default()
        };
        let data = self.eth_call(&tx).await?;
        nonces_from_words(abi::decode_nonces(&data)?)
    }

    async fn simulate_and_send(&self, call: TradeCall) -> Result<TxHash, ChainError> {
        let from = self.account().await?;
        let tx = self.transaction(
            from,
            self.lane_manager,
            abi::execute_trade(&call),
            Some(call.lane_id),
        );
        let tx_hash = self.simulate_then_send(tx).await?;
        info!(
            "RPC: Sent trade on lane {} with nonce {}: {:?}",
            call.lane_id, call.nonce, tx_hash
        );
        Ok(tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Receipt, ChainError> {
        let poll = async {
            loop {
                if let Some(receipt) = self.receipt(tx_hash).await? {
                    return Ok::<_, ChainError>(receipt);
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };
        let receipt: Receipt = tokio::time::timeout(self.confirmation_timeout, poll)
            .await
            .map_err(|_| ChainError::Timeout(tx_hash))??
            .into();
        if !receipt.success {
            return Err(ChainError::Reverted(tx_hash));
        }
        Ok(receipt)
    }

    async fn read_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.call_uint(token, abi::allowance(owner, spender)).await
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, ChainError> {
        let tx_hash = self.send(token, abi::approve(spender, amount)).await?;
        info!("RPC: Sent approval of {} for {}: {:?}", token, spender, tx_hash);
        Ok(tx_hash)
    }

    async fn read_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.call_uint(token, abi::balance_of(owner)).await
    }

    async fn read_liquidity(&self, token: Address, provider: Address) -> Result<U256, ChainError> {
        self.call_uint(self.lane_manager, abi::user_liquidity(provider, token))
            .await
    }

    async fn mint(&self, token: Address, to: Address, amount: U256) -> Result<TxHash, ChainError> {
        self.send(token, abi::mint(to, amount)).await
    }

    async fn initialize_pool(
        &self,
        quote_token: Address,
        base_token: Address,
        price_x18: U256,
    ) -> Result<TxHash, ChainError> {
        let data = abi::initialize_pool(quote_token, base_token, price_x18);
        let tx_hash = self.send(self.lane_manager, data).await?;
        info!("RPC: Sent pool initialization {}/{}: {:?}", base_token, quote_token, tx_hash);
        Ok(tx_hash)
    }

    async fn add_liquidity(&self, token: Address, amount: U256) -> Result<TxHash, ChainError> {
        let tx_hash = self
            .send(self.lane_manager, abi::add_liquidity(token, amount))
            .await?;
        info!("RPC: Sent liquidity of {} {}: {:?}", amount, token, tx_hash);
        Ok(tx_hash)
    }

    async fn remove_liquidity(&self, token: Address, amount: U256) -> Result<TxHash, ChainError> {
        let tx_hash = self
            .send(self.lane_manager, abi::remove_liquidity(token, amount))
            .await?;
        info!("RPC: Sent withdrawal of {} {}: {:?}", amount, token, tx_hash);
        Ok(tx_hash)
    }
}
