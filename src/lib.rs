//! # What is Lanes?
//!
//! Lanes routes trade submissions from a single account onto a fixed number of independent nonce
//! sequences ("lanes") held by a lane-managing contract. A transaction that stalls on one lane
//! does not block the others, so up to N trades can be in flight at the same time, one per lane.
//!
//! The contract enforces the per-lane sequence. This library only keeps a local mirror of the lane
//! nonces, arbitrates which lane a new trade goes to, and drives the remote calls for one trade
//! from start to finish.
//!
//! # Implementation
//!
//! The library is composed of:
//! - A [LaneRegistry](crate::lane::LaneRegistry) which owns the lane table. Every mutation of lane
//! state goes through the registry (reserve, commit, release, sync) and each of those operations is
//! atomic with respect to the others.
//! - A [TradeScheduler](crate::scheduler::TradeScheduler) which takes a
//! [TradeIntent](crate::trade::TradeIntent), picks the lowest idle lane, builds the order-identity
//! hash, ensures token allowance, submits, waits for the receipt and then commits or releases the
//! lane.
//! - A [ChainClient](crate::chain::ChainClient) which is the remote side. There is a JSON-RPC
//! implementation, [HttpClient](crate::chain::rpc::HttpClient), and an in-process implementation,
//! [TestClient](crate::chain::test::TestClient), that runs against the in-memory
//! [Ledger](crate::chain::ledger::Ledger).
//! - A [LiquidityDesk](crate::pool::LiquidityDesk) which reads pool reserves and the account's
//! position and runs the deposit/withdraw transactions. These never take a lane.
//! - A [devnet](crate::devnet) server which exposes the same in-memory ledger over JSON-RPC so that
//! the HTTP client can be run end to end without a real chain.
//!
//! Scheduler outcomes are pushed to a [Notify](crate::notify::Notify) sink, by default this just
//! logs.
//!
//! ``
//! cargo run --bin lanes_devnet 127.0.0.1 8545
//! cargo run --bin lanes_client_test ./lanes.json
//! ``
//!
//! # Concurrency
//!
//! Every call to `process_trade` is an independent task. Tasks on different lanes do not wait on
//! each other and no ordering is given between them. On one lane the order of reserve and
//! commit/release is strict: a lane cannot be reserved again until it has been released. There is
//! no queue, a trade that arrives when every lane is busy is rejected.
pub mod chain;
pub mod config;
pub mod devnet;
pub mod lane;
pub mod notify;
pub mod orders;
pub mod pool;
pub mod scheduler;
pub mod trade;
