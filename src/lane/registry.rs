use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use time::OffsetDateTime;

use super::{Lane, LaneId, LaneStatus, Nonce, TxHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    UnknownLane(LaneId),
    AlreadyReserved(LaneId),
    NotReserved(LaneId),
}

impl std::error::Error for RegistryError {}

impl core::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegistryError::UnknownLane(id) => write!(f, "UnknownLane({id})"),
            RegistryError::AlreadyReserved(id) => write!(f, "AlreadyReserved({id})"),
            RegistryError::NotReserved(id) => write!(f, "NotReserved({id})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    Remote(String),
    LaneCountMismatch { expected: usize, got: usize },
}

impl std::error::Error for SyncError {}

impl core::fmt::Display for SyncError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SyncError::Remote(msg) => write!(f, "nonce sync failed: {msg}"),
            SyncError::LaneCountMismatch { expected, got } => {
                write!(f, "nonce sync returned {got} lanes, expected {expected}")
            }
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Owns the fixed pool of lanes and arbitrates access to them.
///
/// The table sits behind a single mutex and no lock is held across an await, so every operation
/// here is atomic with respect to every other. Lane ids run from 1 to N.
#[derive(Debug)]
pub struct LaneRegistry {
    table: Mutex<Table>,
    syncing: AtomicBool,
}

//`generations[i]` moves whenever lane `i + 1` is reserved or committed, a sync compares it against
//the value it saw before fetching
#[derive(Debug)]
struct Table {
    lanes: Vec<Lane>,
    generations: Vec<u64>,
}

impl Table {
    fn lane_mut(&mut self, lane_id: LaneId) -> Result<&mut Lane, RegistryError> {
        self.lanes
            .iter_mut()
            .find(|lane| lane.id == lane_id)
            .ok_or(RegistryError::UnknownLane(lane_id))
    }

    fn touch(&mut self, lane_id: LaneId) {
        if let Some(idx) = self.lanes.iter().position(|lane| lane.id == lane_id) {
            self.generations[idx] += 1;
        }
    }
}

struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl LaneRegistry {
    pub fn new(count: usize) -> Self {
        let lanes = (1..=count as LaneId).map(Lane::new).collect();
        Self {
            table: Mutex::new(Table {
                lanes,
                generations: vec![0; count],
            }),
            syncing: AtomicBool::new(false),
        }
    }

    //A poisoned table is still consistent because every mutation completes before unlock
    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.table().lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().lanes.is_empty()
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    /// Snapshot of every lane, ordered by id.
    pub fn list_lanes(&self) -> Vec<Lane> {
        self.table().lanes.clone()
    }

    pub fn get(&self, lane_id: LaneId) -> Option<Lane> {
        self.table()
            .lanes
            .iter()
            .find(|lane| lane.id == lane_id)
            .cloned()
    }

    /// Lowest-id idle lane. Ties are always broken by ascending id, there is no recency weighting.
    pub fn find_idle(&self) -> Option<Lane> {
        self.table().lanes.iter().find(|lane| lane.is_idle()).cloned()
    }

    pub fn reserve(&self, lane_id: LaneId) -> Result<Lane, RegistryError> {
        let mut table = self.table();
        let lane = table.lane_mut(lane_id)?;
        if !lane.is_idle() {
            return Err(RegistryError::AlreadyReserved(lane_id));
        }
        lane.status = LaneStatus::Processing;
        let lane = lane.clone();
        table.touch(lane_id);
        Ok(lane)
    }

    /// Finds and reserves the lowest idle lane under one lock, so two callers can never pick the
    /// same lane.
    pub fn reserve_next(&self) -> Option<Lane> {
        let mut table = self.table();
        let lane = table.lanes.iter_mut().find(|lane| lane.is_idle())?;
        lane.status = LaneStatus::Processing;
        let lane = lane.clone();
        table.touch(lane.id);
        Some(lane)
    }

    pub fn commit(
        &self,
        lane_id: LaneId,
        nonce_delta: Nonce,
        tx_hash: TxHash,
    ) -> Result<Lane, RegistryError> {
        let mut table = self.table();
        let lane = table.lane_mut(lane_id)?;
        if lane.status != LaneStatus::Processing {
            return Err(RegistryError::NotReserved(lane_id));
        }
        lane.status = LaneStatus::Confirmed;
        lane.nonce += nonce_delta;
        lane.last_execution_time = Some(now_millis());
        lane.last_tx_hash = Some(tx_hash);
        info!(
            "LANES: Lane {} committed {:?}, nonce now {}",
            lane_id, tx_hash, lane.nonce
        );
        let lane = lane.clone();
        table.touch(lane_id);
        Ok(lane)
    }

    /// Returns a lane to idle whatever state it was in.
    pub fn release(&self, lane_id: LaneId) -> Result<(), RegistryError> {
        let mut table = self.table();
        let lane = table.lane_mut(lane_id)?;
        lane.status = LaneStatus::Idle;
        Ok(())
    }

    /// Replaces cached nonces with the values produced by `fetch`. Index `i` of the fetched vector
    /// belongs to lane `i + 1`.
    ///
    /// Nothing is written unless the fetch succeeds and returns exactly one nonce per lane. Lanes
    /// that are processing keep their cached nonce because their pending commit advances it. So do
    /// lanes reserved or committed while the fetch was in flight, the fetched value may predate
    /// their transaction.
    pub async fn sync_nonces<F, Fut, E>(&self, fetch: F) -> Result<Vec<Nonce>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Nonce>, E>>,
        E: std::fmt::Display,
    {
        self.syncing.store(true, Ordering::SeqCst);
        let _guard = SyncGuard(&self.syncing);

        let started = self.table().generations.clone();
        let nonces = match fetch().await {
            Ok(nonces) => nonces,
            Err(e) => {
                warn!("LANES: Nonce sync failed, keeping cached nonces: {}", e);
                return Err(SyncError::Remote(e.to_string()));
            }
        };

        let mut table = self.table();
        let Table { lanes, generations } = &mut *table;
        if nonces.len() != lanes.len() {
            warn!(
                "LANES: Nonce sync returned {} values for {} lanes",
                nonces.len(),
                lanes.len()
            );
            return Err(SyncError::LaneCountMismatch {
                expected: lanes.len(),
                got: nonces.len(),
            });
        }

        for (idx, (lane, nonce)) in lanes.iter_mut().zip(nonces.iter()).enumerate() {
            if lane.status == LaneStatus::Processing {
                continue;
            }
            if generations[idx] != started[idx] {
                debug!(
                    "LANES: Lane {} moved during sync, keeping nonce {}",
                    lane.id, lane.nonce
                );
                continue;
            }
            lane.nonce = *nonce;
        }
        info!("LANES: Nonces synced from chain: {:?}", nonces);
        Ok(nonces)
    }
}

impl Default for LaneRegistry {
    fn default() -> Self {
        Self::new(super::DEFAULT_LANES)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_primitives::B256;
    use tokio::sync::oneshot;

    use super::{LaneRegistry, RegistryError, SyncError};
    use crate::lane::LaneStatus;

    #[test]
    fn test_that_find_idle_prefers_lowest_id() {
        let registry = LaneRegistry::new(4);
        assert_eq!(registry.find_idle().unwrap().id, 1);

        registry.reserve(1).unwrap();
        registry.reserve(3).unwrap();
        assert_eq!(registry.find_idle().unwrap().id, 2);

        registry.reserve(2).unwrap();
        assert_eq!(registry.find_idle().unwrap().id, 4);

        registry.reserve(4).unwrap();
        assert!(registry.find_idle().is_none());

        registry.release(3).unwrap();
        assert_eq!(registry.find_idle().unwrap().id, 3);
    }

    #[test]
    fn test_that_reserve_fails_on_busy_lane() {
        let registry = LaneRegistry::new(4);
        registry.reserve(2).unwrap();
        assert_eq!(registry.reserve(2), Err(RegistryError::AlreadyReserved(2)));

        registry.commit(2, 1, B256::repeat_byte(1)).unwrap();
        assert_eq!(registry.reserve(2), Err(RegistryError::AlreadyReserved(2)));
        assert_eq!(registry.reserve(9), Err(RegistryError::UnknownLane(9)));
    }

    #[test]
    fn test_that_commit_advances_nonce_by_one() {
        let registry = LaneRegistry::new(4);
        let before = registry.reserve(1).unwrap().nonce;
        let tx = B256::repeat_byte(7);
        let lane = registry.commit(1, 1, tx).unwrap();

        assert_eq!(lane.nonce, before + 1);
        assert_eq!(lane.status, LaneStatus::Confirmed);
        assert_eq!(lane.last_tx_hash, Some(tx));
        assert!(lane.last_execution_time.is_some());
        //Commit without a reservation is rejected
        assert_eq!(
            registry.commit(1, 1, tx),
            Err(RegistryError::NotReserved(1))
        );
    }

    #[test]
    fn test_that_release_always_returns_to_idle() {
        let registry = LaneRegistry::new(4);
        registry.release(1).unwrap();
        assert!(registry.get(1).unwrap().is_idle());

        registry.reserve(1).unwrap();
        registry.release(1).unwrap();
        assert!(registry.get(1).unwrap().is_idle());

        registry.reserve(1).unwrap();
        registry.commit(1, 1, B256::ZERO).unwrap();
        registry.release(1).unwrap();
        let lane = registry.get(1).unwrap();
        assert!(lane.is_idle());
        assert_eq!(lane.nonce, 1);
    }

    #[test]
    fn test_that_reserve_next_walks_lanes_in_order() {
        let registry = LaneRegistry::new(4);
        let ids: Vec<u64> = (0..4).map(|_| registry.reserve_next().unwrap().id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(registry.reserve_next().is_none());
        assert!(registry
            .list_lanes()
            .iter()
            .all(|lane| lane.status == LaneStatus::Processing));
    }

    #[tokio::test]
    async fn test_that_sync_overwrites_nonces() {
        let registry = LaneRegistry::new(4);
        let res = registry
            .sync_nonces(|| async { Ok::<_, String>(vec![5, 6, 7, 8]) })
            .await;
        assert_eq!(res, Ok(vec![5, 6, 7, 8]));
        let nonces: Vec<u64> = registry.list_lanes().iter().map(|l| l.nonce).collect();
        assert_eq!(nonces, vec![5, 6, 7, 8]);
        assert!(!registry.is_syncing());
    }

    #[tokio::test]
    async fn test_that_failed_sync_keeps_cached_nonces() {
        let registry = LaneRegistry::new(4);
        registry
            .sync_nonces(|| async { Ok::<_, String>(vec![3, 3, 3, 3]) })
            .await
            .unwrap();

        let res = registry
            .sync_nonces(|| async { Err::<Vec<u64>, _>("connection refused".to_string()) })
            .await;
        assert_eq!(res, Err(SyncError::Remote("connection refused".into())));

        let res = registry
            .sync_nonces(|| async { Ok::<_, String>(vec![9, 9]) })
            .await;
        assert_eq!(
            res,
            Err(SyncError::LaneCountMismatch {
                expected: 4,
                got: 2
            })
        );

        let nonces: Vec<u64> = registry.list_lanes().iter().map(|l| l.nonce).collect();
        assert_eq!(nonces, vec![3, 3, 3, 3]);
        assert!(!registry.is_syncing());
    }

    #[tokio::test]
    async fn test_that_sync_skips_processing_lanes() {
        let registry = LaneRegistry::new(4);
        registry.reserve(2).unwrap();
        registry
            .sync_nonces(|| async { Ok::<_, String>(vec![4, 4, 4, 4]) })
            .await
            .unwrap();
        let nonces: Vec<u64> = registry.list_lanes().iter().map(|l| l.nonce).collect();
        assert_eq!(nonces, vec![4, 0, 4, 4]);
    }

    #[tokio::test]
    async fn test_that_commit_during_sync_is_not_overwritten() {
        let registry = Arc::new(LaneRegistry::new(4));
        registry.reserve(1).unwrap();

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (resolve_tx, resolve_rx) = oneshot::channel::<()>();
        let sync = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .sync_nonces(move || async move {
                        started_tx.send(()).unwrap();
                        resolve_rx.await.map_err(|e| e.to_string())?;
                        //Read before either trade below was mined
                        Ok::<_, String>(vec![0, 0, 5, 5])
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert!(registry.is_syncing());
        registry.commit(1, 1, B256::repeat_byte(1)).unwrap();
        registry.reserve(2).unwrap();
        registry.commit(2, 1, B256::repeat_byte(2)).unwrap();
        registry.release(2).unwrap();
        resolve_tx.send(()).unwrap();

        assert_eq!(sync.await.unwrap(), Ok(vec![0, 0, 5, 5]));
        let lane = registry.get(1).unwrap();
        assert_eq!(lane.status, LaneStatus::Confirmed);
        assert_eq!(lane.nonce, 1);
        let nonces: Vec<u64> = registry.list_lanes().iter().map(|l| l.nonce).collect();
        assert_eq!(nonces, vec![1, 1, 5, 5]);

        //Next sync with nothing in flight takes the chain values again
        registry.release(1).unwrap();
        registry
            .sync_nonces(|| async { Ok::<_, String>(vec![1, 1, 5, 5]) })
            .await
            .unwrap();
        let nonces: Vec<u64> = registry.list_lanes().iter().map(|l| l.nonce).collect();
        assert_eq!(nonces, vec![1, 1, 5, 5]);
    }
}
