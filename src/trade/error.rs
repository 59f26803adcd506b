use crate::chain::ChainError;
use crate::lane::TxHash;

/// Longest remote error detail surfaced in a `DynamicFault`.
pub const FAULT_DETAIL_LIMIT: usize = 96;

const FUNDS_PATTERNS: [&str; 3] = ["insufficient funds", "exceeds the balance", "exceeds balance"];
const SEQUENCE_PATTERNS: [&str; 2] = ["InvalidNonce", "Sequence Break"];

/// Outcome of a rejected or failed trade as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeError {
    AllLanesBusy,
    KillSwitchActive,
    InvalidIntent(String),
    AuthorizationFailed(String),
    InsufficientFunds,
    /// Cached lane nonce disagrees with the chain, nonces should be resynced before retrying.
    SequenceBreak,
    Unauthorized,
    /// Submitted but no receipt arrived in time. The transaction may still land.
    Unconfirmed(TxHash),
    DynamicFault(String),
}

impl std::error::Error for TradeError {}

impl core::fmt::Display for TradeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TradeError::AllLanesBusy => write!(f, "All lanes busy"),
            TradeError::KillSwitchActive => write!(f, "Kill switch active"),
            TradeError::InvalidIntent(msg) => write!(f, "Invalid intent: {msg}"),
            TradeError::AuthorizationFailed(msg) => write!(f, "Authorization failed: {msg}"),
            TradeError::InsufficientFunds => write!(f, "Insufficient funds"),
            TradeError::SequenceBreak => write!(f, "Sequence break"),
            TradeError::Unauthorized => write!(f, "Unauthorized"),
            TradeError::Unconfirmed(tx) => write!(f, "Unconfirmed transaction {tx}"),
            TradeError::DynamicFault(msg) => write!(f, "Dynamic fault: {msg}"),
        }
    }
}

fn first_line(detail: &str) -> String {
    let line = detail.lines().next().unwrap_or("").trim();
    line.chars().take(FAULT_DETAIL_LIMIT).collect()
}

/// Maps a remote failure onto the user-facing taxonomy.
///
/// Credential failures are recognised from the HTTP status. Everything else is matched on the
/// remote message text because the contract does not expose structured error codes to the client.
pub fn classify(err: &ChainError) -> TradeError {
    match err {
        ChainError::Http(401) | ChainError::Http(403) => return TradeError::Unauthorized,
        ChainError::Timeout(tx) => return TradeError::Unconfirmed(*tx),
        _ => {}
    }

    let detail = err.to_string();
    if FUNDS_PATTERNS.iter().any(|p| detail.contains(p)) {
        TradeError::InsufficientFunds
    } else if SEQUENCE_PATTERNS.iter().any(|p| detail.contains(p)) {
        TradeError::SequenceBreak
    } else if detail.to_lowercase().contains("unauthorized") {
        TradeError::Unauthorized
    } else {
        TradeError::DynamicFault(first_line(&detail))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::B256;

    use super::{classify, TradeError, FAULT_DETAIL_LIMIT};
    use crate::chain::ChainError;

    fn rpc(message: &str) -> ChainError {
        ChainError::Rpc {
            code: -32000,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_that_remote_messages_are_classified() {
        assert_eq!(
            classify(&rpc("insufficient funds for gas * price + value")),
            TradeError::InsufficientFunds
        );
        assert_eq!(
            classify(&rpc("The total cost exceeds the balance of the account")),
            TradeError::InsufficientFunds
        );
        assert_eq!(
            classify(&rpc("execution reverted: ERC20: transfer amount exceeds balance")),
            TradeError::InsufficientFunds
        );
        assert_eq!(
            classify(&rpc("execution reverted: InvalidNonce")),
            TradeError::SequenceBreak
        );
        assert_eq!(
            classify(&rpc("Sequence Break on lane 2")),
            TradeError::SequenceBreak
        );
        assert_eq!(classify(&rpc("Unauthorized")), TradeError::Unauthorized);
    }

    #[test]
    fn test_that_transport_failures_are_classified() {
        assert_eq!(classify(&ChainError::Http(401)), TradeError::Unauthorized);
        assert_eq!(classify(&ChainError::Http(403)), TradeError::Unauthorized);
        assert!(matches!(
            classify(&ChainError::Http(502)),
            TradeError::DynamicFault(_)
        ));

        let tx = B256::repeat_byte(3);
        assert_eq!(
            classify(&ChainError::Timeout(tx)),
            TradeError::Unconfirmed(tx)
        );
    }

    #[test]
    fn test_that_dynamic_fault_keeps_first_line_only() {
        let long = format!("{}\nstack trace follows", "x".repeat(300));
        match classify(&ChainError::Transport(long)) {
            TradeError::DynamicFault(detail) => {
                assert_eq!(detail.chars().count(), FAULT_DETAIL_LIMIT);
                assert!(!detail.contains('\n'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
