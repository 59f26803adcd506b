//! Lane data model and the registry that owns the lane table.
mod registry;

pub use registry::{LaneRegistry, RegistryError, SyncError};
pub(crate) use registry::now_millis;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

pub type LaneId = u64;
pub type Nonce = u64;
pub type TxHash = B256;

/// Number of lanes exposed by the lane contract.
pub const DEFAULT_LANES: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneStatus {
    Idle,
    Processing,
    Confirmed,
    //Kept for consumers that render a transient failure, the registry never stores it
    Error,
}

impl std::fmt::Display for LaneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaneStatus::Idle => write!(f, "idle"),
            LaneStatus::Processing => write!(f, "processing"),
            LaneStatus::Confirmed => write!(f, "confirmed"),
            LaneStatus::Error => write!(f, "error"),
        }
    }
}

/// One independent nonce sequence. `nonce` mirrors the sequence number the contract expects next
/// for this lane.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Lane {
    pub id: LaneId,
    pub status: LaneStatus,
    pub nonce: Nonce,
    /// Epoch milliseconds of the last commit.
    pub last_execution_time: Option<i64>,
    pub last_tx_hash: Option<TxHash>,
}

impl Lane {
    pub fn new(id: LaneId) -> Self {
        Self {
            id,
            status: LaneStatus::Idle,
            nonce: 0,
            last_execution_time: None,
            last_tx_hash: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == LaneStatus::Idle
    }
}
