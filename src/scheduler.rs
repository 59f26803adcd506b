//! Maps trade intents onto lanes and drives each one through the chain.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy_primitives::U256;
use log::{error, info, warn};
use rust_decimal::Decimal;
use tokio::task::JoinHandle;

use crate::chain::{ChainClient, ChainError, TradeCall};
use crate::lane::{now_millis, Lane, LaneId, LaneRegistry, Nonce, SyncError, DEFAULT_LANES};
use crate::notify::{LogNotifier, Notification, Notify};
use crate::trade::{
    classify, Execution, HashPrecision, Market, OrderTerms, Settlement, TradeError, TradeIntent,
};

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub lanes: usize,
    /// Time a lane stays `confirmed` after a commit before it is released back to idle.
    pub confirm_window: Duration,
    pub precision: HashPrecision,
    pub market: Option<Market>,
    pub max_slippage_bps: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
            confirm_window: Duration::from_secs(2),
            precision: HashPrecision::default(),
            market: None,
            max_slippage_bps: None,
        }
    }
}

//Returns the lane to idle unless the trade committed, this also covers a caller dropping the
//future mid-flight
struct Reservation<'a> {
    registry: &'a LaneRegistry,
    lane_id: LaneId,
    committed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            release_logged(self.registry, self.lane_id);
        }
    }
}

fn release_logged(registry: &LaneRegistry, lane_id: LaneId) {
    if let Err(e) = registry.release(lane_id) {
        warn!("SCHEDULER: Could not release lane {}: {}", lane_id, e);
    }
}

fn failure_message(lane_id: LaneId, err: &TradeError) -> String {
    match err {
        TradeError::InsufficientFunds => format!("Lane {lane_id} failed: insufficient funds"),
        TradeError::SequenceBreak => {
            format!("Execution refused in lane {lane_id}: sequence break, resync nonces")
        }
        other => format!("Execution refused in lane {lane_id}: {other}"),
    }
}

/// Drives trades from intent to confirmation, one lane per trade.
///
/// Each `process_trade` call is independent, callers can run as many concurrently as they like and
/// at most one per lane will be in flight. Nothing is queued.
pub struct TradeScheduler<C> {
    client: Arc<C>,
    registry: Arc<LaneRegistry>,
    config: SchedulerConfig,
    notifier: Arc<dyn Notify>,
    kill_switch: AtomicBool,
    //Allowance is per account, one approval at a time keeps parallel lanes from all approving
    approval: tokio::sync::Mutex<()>,
    releases: Mutex<Vec<JoinHandle<()>>>,
}

impl<C> TradeScheduler<C>
where
    C: ChainClient + Send + Sync + 'static,
{
    pub fn new(client: C, config: SchedulerConfig) -> Self {
        Self::with_client(Arc::new(client), config)
    }

    pub fn with_client(client: Arc<C>, config: SchedulerConfig) -> Self {
        Self {
            client,
            registry: Arc::new(LaneRegistry::new(config.lanes)),
            config,
            notifier: Arc::new(LogNotifier),
            kill_switch: AtomicBool::new(false),
            approval: tokio::sync::Mutex::new(()),
            releases: Mutex::new(Vec::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notify>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &Arc<LaneRegistry> {
        &self.registry
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn lanes(&self) -> Vec<Lane> {
        self.registry.list_lanes()
    }

    pub fn set_kill_switch(&self, active: bool) {
        info!("SCHEDULER: Kill switch {}", if active { "on" } else { "off" });
        self.kill_switch.store(active, Ordering::SeqCst);
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch.load(Ordering::SeqCst)
    }

    fn releases(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.releases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refreshes every lane's cached nonce from the chain. Failure is reported and the cached
    /// nonces stay as they were.
    pub async fn sync_nonces(&self) -> Result<Vec<Nonce>, SyncError> {
        let res = self
            .registry
            .sync_nonces(|| self.client.read_nonces())
            .await;
        if let Err(e) = &res {
            self.notifier
                .notify(Notification::error(None, format!("Lane sync failed: {e}")));
        }
        res
    }

    pub async fn process_trade(&self, intent: TradeIntent) -> Result<Execution, TradeError> {
        if self.kill_switch_active() {
            self.notifier.notify(Notification::error(
                None,
                format!("Kill switch active, trade {} rejected", intent.id),
            ));
            return Err(TradeError::KillSwitchActive);
        }

        let lane = match self.registry.reserve_next() {
            Some(lane) => lane,
            None => {
                warn!("SCHEDULER: No idle lane for trade {}", intent.id);
                self.notifier.notify(Notification::error(
                    None,
                    "All lanes busy. Sequential bottleneck detected.",
                ));
                return Err(TradeError::AllLanesBusy);
            }
        };
        let mut reservation = Reservation {
            registry: &self.registry,
            lane_id: lane.id,
            committed: false,
        };
        info!(
            "SCHEDULER: Trade {} reserved lane {} at nonce {}",
            intent.id, lane.id, lane.nonce
        );

        match self.execute(&lane, &intent).await {
            Ok(execution) => {
                match self.registry.commit(lane.id, 1, execution.tx_hash) {
                    Ok(committed) => {
                        reservation.committed = true;
                        self.notifier.notify(Notification::success(
                            Some(lane.id),
                            format!(
                                "Lane {} confirmed. Nonce advanced to {}",
                                lane.id, committed.nonce
                            ),
                        ));
                        self.schedule_release(lane.id);
                    }
                    //Lane was released under us, the trade still landed so the cached nonce is
                    //now behind the chain
                    Err(e) => {
                        warn!("SCHEDULER: Commit on lane {} failed: {}", lane.id, e);
                        self.notifier.notify(Notification::error(
                            Some(lane.id),
                            format!(
                                "Lane {} landed {} but could not commit, resyncing nonces",
                                lane.id, execution.tx_hash
                            ),
                        ));
                        if let Err(e) = self.sync_nonces().await {
                            warn!("SCHEDULER: Resync after lane {} failed: {}", lane.id, e);
                        }
                    }
                }
                Ok(execution)
            }
            Err(err) => {
                error!("SCHEDULER: Trade {} on lane {} failed: {}", intent.id, lane.id, err);
                drop(reservation);
                self.notifier
                    .notify(Notification::error(Some(lane.id), failure_message(lane.id, &err)));
                Err(err)
            }
        }
    }

    /// Splits `intent` into `parts` equal trades and runs them concurrently. Results come back in
    /// child order, children that find no idle lane resolve to `AllLanesBusy`.
    pub async fn split_trade(
        self: &Arc<Self>,
        intent: TradeIntent,
        parts: usize,
    ) -> Vec<Result<Execution, TradeError>> {
        if parts == 0 {
            return Vec::new();
        }
        let share = intent.amount / Decimal::from(parts as u64);

        let mut handles = Vec::with_capacity(parts);
        for i in 0..parts {
            let mut child = intent.clone();
            child.id = format!("{}-{}", intent.id, i);
            child.amount = share;
            let scheduler = Arc::clone(self);
            handles.push(tokio::spawn(
                async move { scheduler.process_trade(child).await },
            ));
        }

        let mut results = Vec::with_capacity(parts);
        for handle in handles {
            results.push(match handle.await {
                Ok(res) => res,
                Err(e) => Err(TradeError::DynamicFault(e.to_string())),
            });
        }
        results
    }

    /// Waits for every pending confirm-window release.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.releases());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn schedule_release(&self, lane_id: LaneId) {
        let window = self.config.confirm_window;
        if window.is_zero() {
            release_logged(&self.registry, lane_id);
            return;
        }

        let registry = Arc::clone(&self.registry);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            release_logged(&registry, lane_id);
        });
        let mut releases = self.releases();
        releases.retain(|h| !h.is_finished());
        releases.push(handle);
    }

    fn remote_failure(&self, lane_id: LaneId, err: ChainError) -> TradeError {
        error!("SCHEDULER: Remote failure on lane {}: {}", lane_id, err);
        classify(&err)
    }

    async fn execute(&self, lane: &Lane, intent: &TradeIntent) -> Result<Execution, TradeError> {
        let terms = OrderTerms::build(
            intent,
            self.config.precision,
            self.config.market.as_ref(),
            self.config.max_slippage_bps,
        )?;

        if let Some(leg) = &terms.settlement {
            self.ensure_allowance(lane.id, leg).await?;
        }

        self.notifier.notify(Notification::info(
            Some(lane.id),
            format!("Broadcasting to lane {} (nonce {})", lane.id, lane.nonce),
        ));
        let call = TradeCall {
            lane_id: lane.id,
            nonce: lane.nonce,
            order_hash: terms.order_hash,
            settlement: terms.settlement,
        };
        let tx_hash = self
            .client
            .simulate_and_send(call)
            .await
            .map_err(|e| self.remote_failure(lane.id, e))?;
        let receipt = self
            .client
            .await_confirmation(tx_hash)
            .await
            .map_err(|e| self.remote_failure(lane.id, e))?;

        Ok(Execution {
            lane_id: lane.id,
            nonce: lane.nonce,
            tx_hash,
            order_hash: terms.order_hash,
            block_number: receipt.block_number,
            confirmed_at: now_millis(),
            amount_in: terms.settlement.map(|leg| leg.amount_in),
            price_x18: terms.price_x18,
        })
    }

    async fn ensure_allowance(&self, lane_id: LaneId, leg: &Settlement) -> Result<(), TradeError> {
        let _approval = self.approval.lock().await;

        let owner = self
            .client
            .account()
            .await
            .map_err(|e| self.remote_failure(lane_id, e))?;
        let spender = self.client.lane_manager();
        let current = self
            .client
            .read_allowance(leg.token_in, owner, spender)
            .await
            .map_err(|e| self.remote_failure(lane_id, e))?;
        if current >= leg.amount_in {
            return Ok(());
        }

        info!(
            "SCHEDULER: Allowance {} of {} below {}, approving",
            current, leg.token_in, leg.amount_in
        );
        self.notifier.notify(Notification::info(
            Some(lane_id),
            format!("Approving {} for trading", leg.token_in),
        ));
        let tx_hash = self
            .client
            .approve(leg.token_in, spender, U256::MAX)
            .await
            .map_err(|e| TradeError::AuthorizationFailed(e.to_string()))?;
        self.client
            .await_confirmation(tx_hash)
            .await
            .map_err(|e| TradeError::AuthorizationFailed(e.to_string()))?;
        Ok(())
    }
}
