use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use rand::Rng;

use super::abi;
use super::ledger::Ledger;
use super::{nonces_from_words, ChainClient, ChainError, Receipt, TradeCall};
use crate::lane::{Nonce, TxHash};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process [ChainClient] over a shared [Ledger], with hooks to inject failures.
pub struct TestClient {
    ledger: Arc<Mutex<Ledger>>,
    account: Address,
    send_failures: Mutex<VecDeque<ChainError>>,
    read_failure: Mutex<Option<ChainError>>,
    approve_failure: Mutex<Option<ChainError>>,
    withhold_receipts: AtomicBool,
    latency: Option<(Duration, Duration)>,
}

impl TestClient {
    pub fn new(ledger: Arc<Mutex<Ledger>>, account: Address) -> Self {
        Self {
            ledger,
            account,
            send_failures: Mutex::new(VecDeque::new()),
            read_failure: Mutex::new(None),
            approve_failure: Mutex::new(None),
            withhold_receipts: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Fresh ledger with `lanes` lanes and no tokens.
    pub fn single(lanes: usize) -> Self {
        let ledger = Ledger::new(Address::repeat_byte(0x55), lanes);
        TestClient::new(Arc::new(Mutex::new(ledger)), Address::repeat_byte(0x11))
    }

    /// Every remote call sleeps for a random duration in `min..=max` before touching the ledger.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.latency = Some((min, max));
        self
    }

    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        Arc::clone(&self.ledger)
    }

    pub fn fail_next_send(&self, err: ChainError) {
        locked(&self.send_failures).push_back(err);
    }

    pub fn fail_reads(&self, err: Option<ChainError>) {
        *locked(&self.read_failure) = err;
    }

    pub fn fail_approvals(&self, err: Option<ChainError>) {
        *locked(&self.approve_failure) = err;
    }

    /// Transactions still land but their receipts are never seen.
    pub fn withhold_receipts(&self, withhold: bool) {
        self.withhold_receipts.store(withhold, Ordering::SeqCst);
    }

    async fn delay(&self) {
        if let Some((min, max)) = self.latency {
            let wait = rand::thread_rng().gen_range(min..=max);
            tokio::time::sleep(wait).await;
        }
    }

    fn simulate_then_send(&self, to: Address, data: &[u8]) -> Result<TxHash, ChainError> {
        let mut ledger = locked(&self.ledger);
        ledger.call(self.account, to, data)?;
        Ok(ledger.transact(self.account, to, data))
    }
}

impl ChainClient for TestClient {
    fn lane_manager(&self) -> Address {
        locked(&self.ledger).lane_manager()
    }

    async fn account(&self) -> Result<Address, ChainError> {
        Ok(self.account)
    }

    async fn read_nonces(&self) -> Result<Vec<Nonce>, ChainError> {
        self.delay().await;
        if let Some(err) = locked(&self.read_failure).clone() {
            return Err(err);
        }
        let data = {
            let ledger = locked(&self.ledger);
            ledger.call(self.account, ledger.lane_manager(), &abi::get_all_nonces())?
        };
        nonces_from_words(abi::decode_nonces(&data)?)
    }

    async fn simulate_and_send(&self, call: TradeCall) -> Result<TxHash, ChainError> {
        self.delay().await;
        if let Some(err) = locked(&self.send_failures).pop_front() {
            return Err(err);
        }
        let to = self.lane_manager();
        self.simulate_then_send(to, &abi::execute_trade(&call))
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> Result<Receipt, ChainError> {
        self.delay().await;
        if self.withhold_receipts.load(Ordering::SeqCst) {
            return Err(ChainError::Timeout(tx_hash));
        }
        match locked(&self.ledger).receipt(&tx_hash) {
            Some(receipt) if receipt.success => Ok(receipt),
            Some(_) => Err(ChainError::Reverted(tx_hash)),
            None => Err(ChainError::Timeout(tx_hash)),
        }
    }

    async fn read_allowance(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
    ) -> Result<U256, ChainError> {
        self.delay().await;
        let data = locked(&self.ledger).call(owner, token, &abi::allowance(owner, spender))?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn approve(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxHash, ChainError> {
        self.delay().await;
        if let Some(err) = locked(&self.approve_failure).clone() {
            return Err(err);
        }
        self.simulate_then_send(token, &abi::approve(spender, amount))
    }

    async fn read_balance(&self, token: Address, owner: Address) -> Result<U256, ChainError> {
        self.delay().await;
        let data = locked(&self.ledger).call(owner, token, &abi::balance_of(owner))?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn read_liquidity(&self, token: Address, provider: Address) -> Result<U256, ChainError> {
        self.delay().await;
        let data = {
            let ledger = locked(&self.ledger);
            ledger.call(provider, ledger.lane_manager(), &abi::user_liquidity(provider, token))?
        };
        Ok(abi::decode_uint(&data)?)
    }

    async fn mint(&self, token: Address, to: Address, amount: U256) -> Result<TxHash, ChainError> {
        self.delay().await;
        self.simulate_then_send(token, &abi::mint(to, amount))
    }

    async fn initialize_pool(
        &self,
        quote_token: Address,
        base_token: Address,
        price_x18: U256,
    ) -> Result<TxHash, ChainError> {
        self.delay().await;
        let to = self.lane_manager();
        self.simulate_then_send(to, &abi::initialize_pool(quote_token, base_token, price_x18))
    }

    async fn add_liquidity(&self, token: Address, amount: U256) -> Result<TxHash, ChainError> {
        self.delay().await;
        let to = self.lane_manager();
        self.simulate_then_send(to, &abi::add_liquidity(token, amount))
    }

    async fn remove_liquidity(&self, token: Address, amount: U256) -> Result<TxHash, ChainError> {
        self.delay().await;
        let to = self.lane_manager();
        self.simulate_then_send(to, &abi::remove_liquidity(token, amount))
    }
}
