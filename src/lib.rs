//! # regnet-harness
//!
//! Drives a handful of regtest blockchain daemons as one test network.
//!
//! The crate covers the plumbing a functional test needs around the daemon
//! under test:
//! - Process supervision with bounded liveness and shutdown waits
//! - Chain topology control: connect, split into two partitions, rejoin
//! - Convergence barriers on block heights and mempools
//! - Hand-built payments with exact 8-decimal arithmetic
//! - A scenario runner with expect-fail brackets and batch summaries
//!
//! The daemon's own token surface (balances, sends, trades) is reached through
//! small capability traits whose RPC method names depend on the daemon
//! flavor.
//!
//! ## Example
//!
//! ```rust,no_run
//! use regnet_harness::config::HarnessConfig;
//! use regnet_harness::runner::{Report, TestRunner};
//! use regnet_harness::scenarios::BuiltinScenario;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = TestRunner::new(HarnessConfig::default())?;
//!     let mut report = Report::new(true);
//!     let batch = runner.run_batch(&BuiltinScenario::ALL, &mut report).await;
//!     std::process::exit(batch.exit_code());
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod amount;
pub mod assertions;
pub mod barrier;
pub mod baseline;
pub mod capability;
pub mod config;
pub mod entity;
pub mod error;
pub mod rpc;
pub mod runner;
pub mod scenarios;
pub mod supervisor;
pub mod topology;

#[cfg(test)]
mod mock;

pub use amount::Amount;
pub use barrier::ConvergenceBarrier;
pub use capability::{DaemonAdapter, MethodTable};
pub use config::{DaemonFlavor, HarnessConfig};
pub use entity::{Entity, PaymentRequest};
pub use error::{Error, Result};
pub use rpc::{NodeRpc, RpcClient};
pub use runner::{Report, Scenario, ScenarioContext, TestRunner};
pub use supervisor::{NodeSet, NodeSupervisor};
pub use topology::{NetworkState, TopologyController};
