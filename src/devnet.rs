//! Local JSON-RPC chain backed by a [Ledger]. Implements just enough of the Ethereum method set for
//! [HttpClient](crate::chain::rpc::HttpClient) to run a full trade cycle.
use std::sync::Mutex;

use alloy_primitives::{address, Address, B256, U256, U64};
use derive_more::{Display, Error};
use log::info;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::chain::ledger::{Ledger, REVERT_CODE};
use crate::chain::rpc::{RpcErrorObject, RpcReceipt, RpcRequest, RpcResponse, TransactionRequest};
use crate::lane::DEFAULT_LANES;
use crate::trade::Market;

pub const CHAIN_ID: u64 = 42431;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const UNKNOWN_ACCOUNT: i64 = -32000;

pub const DEV_LANE_MANAGER: Address = address!("55129fc022f7f955132f722b70dc90e97269211c");
pub const DEV_ACCOUNT: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
pub const DEV_BASE_TOKEN: Address = address!("c91de334276fea6dc52f1b20c7d9576b9697a33c");
pub const DEV_QUOTE_TOKEN: Address = address!("bd3dac5467ec691709798844b36d3ddac484fe20");

/// cETH quoted in USDC, the pair the dev tokens are minted for.
pub fn dev_market() -> Market {
    Market {
        pair: "cETH/USDC".to_string(),
        base_token: DEV_BASE_TOKEN,
        quote_token: DEV_QUOTE_TOKEN,
        base_decimals: 18,
        quote_decimals: 6,
    }
}

#[derive(Debug, Display, Error)]
pub enum DevnetError {
    Unauthorized,
}

impl actix_web::ResponseError for DevnetError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            DevnetError::Unauthorized => actix_web::http::StatusCode::UNAUTHORIZED,
        }
    }
}

fn invalid_params(message: impl Into<String>) -> RpcErrorObject {
    RpcErrorObject {
        code: INVALID_PARAMS,
        message: message.into(),
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, RpcErrorObject> {
    serde_json::to_value(value).map_err(|e| RpcErrorObject {
        code: INTERNAL_ERROR,
        message: e.to_string(),
    })
}

fn param<T: DeserializeOwned>(params: &[Value], idx: usize) -> Result<T, RpcErrorObject> {
    let value = params
        .get(idx)
        .cloned()
        .ok_or_else(|| invalid_params(format!("missing param {idx}")))?;
    serde_json::from_value(value).map_err(|e| invalid_params(e.to_string()))
}

pub struct DevnetState {
    pub ledger: Ledger,
    pub accounts: Vec<Address>,
    pub chain_id: u64,
    api_key: Option<String>,
}

impl DevnetState {
    pub fn new(ledger: Ledger, accounts: Vec<Address>) -> Self {
        Self {
            ledger,
            accounts,
            chain_id: CHAIN_ID,
            api_key: None,
        }
    }

    /// Ledger with `lanes` lanes, the two dev tokens and a funded [DEV_ACCOUNT].
    pub fn seeded(lanes: usize) -> Self {
        let mut ledger = Ledger::new(DEV_LANE_MANAGER, lanes);
        let million_usdc = U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(6));
        let thousand_eth = U256::from(1_000u64) * U256::from(10u64).pow(U256::from(18));
        ledger.mint_to(DEV_QUOTE_TOKEN, DEV_ACCOUNT, million_usdc);
        ledger.mint_to(DEV_BASE_TOKEN, DEV_ACCOUNT, thousand_eth);
        DevnetState::new(ledger, vec![DEV_ACCOUNT])
    }

    /// Requests must then carry `Authorization: Bearer <key>`.
    pub fn with_api_key(mut self, key: String) -> Self {
        self.api_key = Some(key);
        self
    }

    pub fn authorize(&self, header: Option<&str>) -> Result<(), DevnetError> {
        match &self.api_key {
            None => Ok(()),
            Some(key) => match header.and_then(|h| h.strip_prefix("Bearer ")) {
                Some(given) if given == key => Ok(()),
                _ => Err(DevnetError::Unauthorized),
            },
        }
    }

    pub fn handle(&mut self, req: RpcRequest) -> RpcResponse {
        match self.dispatch(&req.method, &req.params) {
            Ok(value) => RpcResponse::ok(req.id, value),
            Err(err) => RpcResponse::err(req.id, err.code, err.message),
        }
    }

    fn dispatch(&mut self, method: &str, params: &[Value]) -> Result<Value, RpcErrorObject> {
        match method {
            "eth_chainId" => encode(U64::from(self.chain_id)),
            "eth_blockNumber" => encode(U64::from(self.ledger.block_number())),
            "eth_accounts" => encode(&self.accounts),
            "eth_call" => {
                let tx: TransactionRequest = param(params, 0)?;
                let from = tx.from.unwrap_or(Address::ZERO);
                let out = self
                    .ledger
                    .call(from, tx.to, &tx.data)
                    .map_err(|revert| RpcErrorObject {
                        code: REVERT_CODE,
                        message: revert.to_string(),
                    })?;
                encode(out)
            }
            "eth_sendTransaction" => {
                let tx: TransactionRequest = param(params, 0)?;
                let from = match tx.from.or_else(|| self.accounts.first().copied()) {
                    Some(from) if self.accounts.contains(&from) => from,
                    _ => {
                        return Err(RpcErrorObject {
                            code: UNKNOWN_ACCOUNT,
                            message: "unknown account".to_string(),
                        })
                    }
                };
                let tx_hash = self.ledger.transact(from, tx.to, &tx.data);
                info!(
                    "DEVNET: Mined {:?} in block {} (lane {:?})",
                    tx_hash,
                    self.ledger.block_number(),
                    tx.nonce_key
                );
                encode(tx_hash)
            }
            "eth_getTransactionReceipt" => {
                let tx_hash: B256 = param(params, 0)?;
                match self.ledger.receipt(&tx_hash) {
                    Some(receipt) => encode(RpcReceipt::from(receipt)),
                    None => Ok(Value::Null),
                }
            }
            other => Err(RpcErrorObject {
                code: METHOD_NOT_FOUND,
                message: format!("the method {other} does not exist"),
            }),
        }
    }
}

impl Default for DevnetState {
    fn default() -> Self {
        DevnetState::seeded(DEFAULT_LANES)
    }
}

pub type DevnetData = Mutex<DevnetState>;

pub mod server {
    use std::sync::PoisonError;

    use actix_web::http::header::AUTHORIZATION;
    use actix_web::{post, web, HttpRequest};

    use super::{DevnetData, DevnetError};
    use crate::chain::rpc::{RpcRequest, RpcResponse};

    #[post("/")]
    pub async fn rpc(
        app: web::Data<DevnetData>,
        http: HttpRequest,
        req: web::Json<RpcRequest>,
    ) -> Result<web::Json<RpcResponse>, DevnetError> {
        let mut devnet = app.lock().unwrap_or_else(PoisonError::into_inner);
        let header = http
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        devnet.authorize(header)?;
        Ok(web::Json(devnet.handle(req.into_inner())))
    }
}
