//! Runtime configuration. Loaded from a JSON file, then selected fields are overridden from the
//! environment.
use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::lane::DEFAULT_LANES;
use crate::scheduler::SchedulerConfig;
use crate::trade::{HashPrecision, Market};

pub const RPC_URL_VAR: &str = "LANES_RPC_URL";
pub const API_KEY_VAR: &str = "LANES_API_KEY";
pub const ACCOUNT_VAR: &str = "LANES_ACCOUNT";

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_lanes() -> usize {
    DEFAULT_LANES
}

fn default_confirm_window_ms() -> u64 {
    2000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_confirmation_timeout_ms() -> u64 {
    60_000
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    pub lane_manager: Address,
    #[serde(default)]
    pub account: Option<Address>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub fee_token: Option<Address>,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    /// How long a lane shows as confirmed before it is released.
    #[serde(default = "default_confirm_window_ms")]
    pub confirm_window_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,
    #[serde(default)]
    pub precision: HashPrecision,
    #[serde(default)]
    pub market: Option<Market>,
    #[serde(default)]
    pub max_slippage_bps: Option<u32>,
}

impl Config {
    pub fn new(rpc_url: impl Into<String>, lane_manager: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            lane_manager,
            account: None,
            api_key: None,
            fee_token: None,
            lanes: default_lanes(),
            confirm_window_ms: default_confirm_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            precision: HashPrecision::default(),
            market: None,
            max_slippage_bps: None,
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text).context("invalid lanes config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("could not read config {}", path.display()))?;
        Self::from_json(&text)
    }

    /// Applies `LANES_RPC_URL`, `LANES_API_KEY` and `LANES_ACCOUNT` when they are set.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(RPC_URL_VAR) {
            self.rpc_url = url;
        }
        if let Ok(key) = std::env::var(API_KEY_VAR) {
            self.api_key = Some(key);
        }
        if let Ok(account) = std::env::var(ACCOUNT_VAR) {
            let account = account
                .parse::<Address>()
                .with_context(|| format!("{ACCOUNT_VAR} is not an address"))?;
            self.account = Some(account);
        }
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.lanes == 0 {
            anyhow::bail!("lanes must be at least 1");
        }
        if let Some(bps) = self.max_slippage_bps {
            if bps > 10_000 {
                anyhow::bail!("max_slippage_bps must be at most 10000");
            }
        }
        Ok(())
    }

    pub fn confirm_window(&self) -> Duration {
        Duration::from_millis(self.confirm_window_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            lanes: self.lanes,
            confirm_window: self.confirm_window(),
            precision: self.precision,
            market: self.market.clone(),
            max_slippage_bps: self.max_slippage_bps,
        }
    }
}
