//! Cross-node convergence barriers.
//!
//! Nothing one node does is visible on another until a barrier has seen the
//! subset agree. Every barrier is bounded by [`ConvergenceConfig`] and fails
//! with [`Error::ConvergenceTimeout`] carrying the last observed values.

use crate::config::ConvergenceConfig;
use crate::error::{Error, Result};
use crate::rpc::NodeRpc;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;
use tracing::{debug, info};

/// Polls a node subset until a per-node observation agrees.
#[derive(Debug, Clone, Default)]
pub struct ConvergenceBarrier {
    config: ConvergenceConfig,
}

impl ConvergenceBarrier {
    /// Create a barrier with the given polling policy.
    #[must_use]
    pub fn new(config: ConvergenceConfig) -> Self {
        Self { config }
    }

    /// Polling policy.
    #[must_use]
    pub fn config(&self) -> &ConvergenceConfig {
        &self.config
    }

    /// Wait until every node in `subset` reports the same block height.
    ///
    /// Returns the agreed height.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConvergenceTimeout` when the retry budget runs out,
    /// or the first RPC error of a polling round.
    pub async fn await_blocks<R: NodeRpc>(&self, subset: &[R]) -> Result<u64> {
        self.converge("block height", subset, |rpc| rpc.get_block_count())
            .await
    }

    /// Wait until every node in `subset` reports the same mempool contents.
    ///
    /// Returns the agreed set of transaction ids.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConvergenceTimeout` when the retry budget runs out,
    /// or the first RPC error of a polling round.
    pub async fn await_mempools<R: NodeRpc>(&self, subset: &[R]) -> Result<BTreeSet<String>> {
        self.converge("mempool", subset, |rpc| rpc.get_raw_mempool())
            .await
    }

    /// Settle each partition independently: blocks first, then mempools.
    ///
    /// # Errors
    ///
    /// Returns the first barrier failure.
    pub async fn sync_all<R: NodeRpc>(&self, partitions: &[Vec<R>]) -> Result<()> {
        for group in partitions {
            let height = self.await_blocks(group).await?;
            let mempool = self.await_mempools(group).await?;
            debug!(
                "Partition of {} node(s) settled at height {height} with {} pending tx",
                group.len(),
                mempool.len()
            );
        }
        Ok(())
    }

    async fn converge<'a, R, T, F, Fut>(
        &self,
        what: &'static str,
        subset: &'a [R],
        probe: F,
    ) -> Result<T>
    where
        R: NodeRpc,
        T: PartialEq + Debug,
        F: Fn(&'a R) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if subset.is_empty() {
            return Err(Error::Topology(format!(
                "cannot await {what} on an empty node set"
            )));
        }

        let attempts = self.config.max_attempts;
        let mut observed = Vec::new();
        for attempt in 1..=attempts {
            observed = try_join_all(subset.iter().map(&probe)).await?;

            if observed.windows(2).all(|w| w[0] == w[1]) {
                if attempt > 1 {
                    info!("{} node(s) agree on {what} after {attempt} attempts", subset.len());
                }
                if let Some(agreed) = observed.pop() {
                    return Ok(agreed);
                }
            }

            debug!("Waiting for {what} convergence ({attempt}/{attempts})");
            if attempt < attempts {
                tokio::time::sleep(self.config.poll_interval()).await;
            }
        }

        let observed = subset
            .iter()
            .zip(&observed)
            .map(|(rpc, value)| format!("{}={value:?}", rpc.label()))
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::ConvergenceTimeout {
            what,
            attempts,
            observed,
        })
    }
}
