//! Per-scenario state handed to scenario bodies.

use super::report::Report;
use crate::amount::Amount;
use crate::assertions::assert_equal;
use crate::barrier::ConvergenceBarrier;
use crate::capability::{
    BalanceQuerier, BlockGenerator, DaemonAdapter, PropertyId, TokenBalance,
    TransactionInspector,
};
use crate::config::{DaemonFlavor, EntityConfig, HarnessConfig};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::rpc::NodeRpc;
use crate::supervisor::{NodeSet, PeerEndpoint};
use crate::topology::TopologyController;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// JSON-RPC code for an unknown property.
const RPC_INVALID_PARAMETER: i64 = -8;

/// Length of a transaction id in hex.
const TXID_HEX_LEN: usize = 64;

/// Everything a scenario step can touch.
///
/// Tracks the running success flag and the expect-fail depth. Entities are
/// created on first use and stay bound to their node until the scenario
/// ends.
pub struct ScenarioContext<'a, N: NodeSet> {
    nodes: &'a N,
    report: &'a mut Report,
    topology: TopologyController,
    barrier: ConvergenceBarrier,
    flavor: DaemonFlavor,
    entity_config: EntityConfig,
    default_pivot: usize,
    entities: BTreeMap<String, Entity<N::Rpc>>,
    default_entities: BTreeMap<usize, String>,
    success: bool,
    expect_fail_depth: u32,
}

impl<'a, N: NodeSet> ScenarioContext<'a, N> {
    /// Create a context over `nodes`, recording lines into `report`.
    pub fn new(nodes: &'a N, config: &HarnessConfig, report: &'a mut Report) -> Self {
        Self {
            nodes,
            report,
            topology: TopologyController::new(config.topology.clone()),
            barrier: ConvergenceBarrier::new(config.convergence.clone()),
            flavor: config.flavor,
            entity_config: config.entity.clone(),
            default_pivot: config.topology.pivot,
            entities: BTreeMap::new(),
            default_entities: BTreeMap::new(),
            success: true,
            expect_fail_depth: 0,
        }
    }

    /// Node indices of the network.
    pub fn node_indices(&self) -> Vec<usize> {
        self.nodes.indices()
    }

    /// RPC connection of a live node.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeExited` if the node died.
    pub fn rpc(&self, index: usize) -> Result<N::Rpc> {
        Ok(self.nodes.endpoint(index)?.rpc)
    }

    fn rpcs(&self, indices: &[usize]) -> Result<Vec<N::Rpc>> {
        Ok(self
            .nodes
            .endpoints_of(indices)?
            .into_iter()
            .map(|e| e.rpc)
            .collect())
    }

    fn endpoints(&self) -> Result<Vec<PeerEndpoint<N::Rpc>>> {
        self.nodes.endpoints()
    }

    /// Capability adapter for node `index`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeExited` if the node died.
    pub fn adapter(&self, index: usize) -> Result<DaemonAdapter<N::Rpc>> {
        Ok(DaemonAdapter::new(self.rpc(index)?, self.flavor))
    }

    /// Topology state.
    pub fn topology(&self) -> &TopologyController {
        &self.topology
    }

    /// Link all nodes as a chain.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::connect_chain`].
    pub async fn connect_chain(&mut self) -> Result<()> {
        let nodes = self.endpoints()?;
        self.topology.connect_chain(&nodes).await
    }

    /// Split the chain at `pivot`.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::split`].
    pub async fn split(&mut self, pivot: usize) -> Result<()> {
        let nodes = self.endpoints()?;
        self.topology.split(&nodes, pivot).await
    }

    /// Split the chain at the configured default pivot.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::split`].
    pub async fn split_default(&mut self) -> Result<()> {
        self.split(self.default_pivot).await
    }

    /// Rejoin a split chain.
    ///
    /// # Errors
    ///
    /// See [`TopologyController::join`].
    pub async fn join(&mut self) -> Result<()> {
        let nodes = self.endpoints()?;
        self.topology.join(&nodes).await
    }

    /// Wait for equal heights on `indices`.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceBarrier::await_blocks`].
    pub async fn await_blocks(&self, indices: &[usize]) -> Result<u64> {
        let rpcs = self.rpcs(indices)?;
        self.barrier.await_blocks(&rpcs).await
    }

    /// Wait for equal mempools on `indices`.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceBarrier::await_mempools`].
    pub async fn await_mempools(&self, indices: &[usize]) -> Result<usize> {
        let rpcs = self.rpcs(indices)?;
        Ok(self.barrier.await_mempools(&rpcs).await?.len())
    }

    /// Settle every partition of the current topology.
    ///
    /// # Errors
    ///
    /// See [`ConvergenceBarrier::sync_all`].
    pub async fn sync_all(&self) -> Result<()> {
        let partitions = self
            .topology
            .partitions()
            .iter()
            .map(|group| self.rpcs(group))
            .collect::<Result<Vec<_>>>()?;
        self.barrier.sync_all(&partitions).await
    }

    /// Settle, mine `count` blocks on node `index`, settle again.
    ///
    /// # Errors
    ///
    /// Returns barrier or node errors.
    pub async fn generate_block(&self, index: usize, count: u32) -> Result<()> {
        self.sync_all().await?;
        self.adapter(index)?.generate_blocks(count).await?;
        self.sync_all().await
    }

    /// The default entity of node `index`, created on first use.
    ///
    /// # Errors
    ///
    /// Returns the node's error if no address can be generated.
    pub async fn entity(&mut self, index: usize) -> Result<Entity<N::Rpc>> {
        if let Some(address) = self.default_entities.get(&index) {
            if let Some(entity) = self.entities.get(address) {
                return Ok(entity.clone());
            }
        }
        let entity = self.new_entity(index).await?;
        self.default_entities
            .insert(index, entity.address().to_string());
        Ok(entity)
    }

    /// A new entity on node `index` with a fresh address.
    ///
    /// # Errors
    ///
    /// Returns the node's error if no address can be generated.
    pub async fn new_entity(&mut self, index: usize) -> Result<Entity<N::Rpc>> {
        let entity = Entity::create(
            index,
            self.rpc(index)?,
            self.flavor,
            self.entity_config.clone(),
        )
        .await?;
        debug!("Entity {} bound to node {index}", entity.address());
        self.entities
            .insert(entity.address().to_string(), entity.clone());
        Ok(entity)
    }

    /// Bind an existing `address` of node `index` to an entity.
    ///
    /// Binding an address again to the same node returns the same entity.
    ///
    /// # Errors
    ///
    /// Returns `Error::Assertion` if the address is already bound to a
    /// different node.
    pub fn bind_entity(&mut self, index: usize, address: &str) -> Result<Entity<N::Rpc>> {
        if let Some(existing) = self.entities.get(address) {
            if existing.node() != index {
                return Err(Error::Assertion(format!(
                    "address {address} is bound to node {}, not node {index}",
                    existing.node()
                )));
            }
            return Ok(existing.clone());
        }
        let entity = Entity::bind(
            index,
            self.rpc(index)?,
            address,
            self.flavor,
            self.entity_config.clone(),
        );
        self.entities.insert(address.to_string(), entity.clone());
        Ok(entity)
    }

    /// Entity owning `address`, if any.
    pub fn entity_for(&self, address: &str) -> Option<&Entity<N::Rpc>> {
        self.entities.get(address)
    }

    /// Enter an expect-fail bracket. Brackets nest.
    pub fn expect_fail(&mut self) {
        self.expect_fail_depth += 1;
    }

    /// Leave the innermost expect-fail bracket.
    pub fn stop_expectation(&mut self) {
        if self.expect_fail_depth == 0 {
            warn!("stop_expectation called outside an expect-fail bracket");
            return;
        }
        self.expect_fail_depth -= 1;
    }

    /// Whether an expect-fail bracket is open.
    pub fn expecting_failure(&self) -> bool {
        self.expect_fail_depth > 0
    }

    /// Whether no unexpected failure has been recorded.
    pub fn is_successful(&self) -> bool {
        self.success
    }

    /// Record a user-visible line.
    pub fn line(&mut self, text: impl Into<String>) {
        self.report.line(text);
    }

    /// Mark the scenario failed regardless of any open bracket.
    pub fn fail(&mut self, step: &str, error: &Error) {
        warn!("{step} failed: {error}");
        self.report.line(format!("{step} ... failed: {error}"));
        self.success = false;
    }

    /// Evaluate the outcome of a step.
    ///
    /// Inside an expect-fail bracket an error is a confirmation; outside it
    /// marks the scenario failed. Either way the scenario continues and
    /// `Ok(None)` is returned. Fatal errors are returned so the scenario
    /// aborts.
    ///
    /// # Errors
    ///
    /// Returns `error` unchanged if it is fatal.
    pub fn record<T>(&mut self, step: &str, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) if self.expecting_failure() => {
                self.report.line(format!("{step} should fail: {e} ... OK"));
                Ok(None)
            }
            Err(e) => {
                self.fail(step, &e);
                Ok(None)
            }
        }
    }

    /// Record an equality check; see [`ScenarioContext::record`].
    ///
    /// # Errors
    ///
    /// Never fails for a mismatch; only fatal errors propagate.
    pub fn check_equal<T: PartialEq + std::fmt::Debug + ?Sized>(
        &mut self,
        what: &str,
        actual: &T,
        expected: &T,
    ) -> Result<bool> {
        Ok(self
            .record(what, assert_equal(what, actual, expected))?
            .is_some())
    }

    /// Confirm that a transaction was rejected or found invalid.
    ///
    /// An RPC fault (or insufficient funds) means the node refused it
    /// outright, as does a returned id that is not a real transaction id.
    /// Otherwise a block is mined and the token layer is asked whether the
    /// transaction is valid; a valid transaction fails the scenario, even
    /// inside an expect-fail bracket.
    ///
    /// # Errors
    ///
    /// Returns fatal errors and failures of the lookup itself.
    pub async fn check_invalid(&mut self, reason: &str, result: Result<String>) -> Result<()> {
        let txid = match result {
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!("Rejected with: {e}");
                self.report
                    .line(format!("Transaction rejected (reason: {reason}) ... OK"));
                return Ok(());
            }
            Ok(txid) => txid,
        };

        if txid.len() != TXID_HEX_LEN || txid.bytes().all(|b| b == b'0') {
            self.report
                .line(format!("Transaction rejected (reason: {reason}) ... OK"));
            return Ok(());
        }

        let inspector = self.first_node()?;
        self.generate_block(inspector, 1).await?;
        let info = self.adapter(inspector)?.transaction(&txid).await?;
        if info.valid {
            let raw = self
                .rpc(inspector)?
                .get_raw_transaction(&txid)
                .await
                .unwrap_or_else(|e| format!("<unavailable: {e}>"));
            let error = Error::Assertion(format!(
                "expected transaction to be invalid (reason: {reason}): {txid} {raw}"
            ));
            self.fail("check_invalid", &error);
        } else {
            self.report
                .line(format!("Transaction invalid (reason: {reason}) ... OK"));
        }
        Ok(())
    }

    /// Check a token balance on every node. An unknown property counts as a
    /// zero balance.
    ///
    /// # Errors
    ///
    /// Returns fatal errors and non-`-8` node faults.
    pub async fn check_balance(
        &mut self,
        address: &str,
        property: PropertyId,
        expected_balance: Amount,
        expected_reserved: Option<Amount>,
    ) -> Result<bool> {
        for index in self.node_indices() {
            let balance = match self.adapter(index)?.balance(address, property).await {
                Ok(balance) => balance,
                Err(e) if e.rpc_code() == Some(RPC_INVALID_PARAMETER) => TokenBalance::ZERO,
                Err(e) => return Err(e),
            };

            let what = format!("balance of {address} for SP{property} on node {index}");
            if !self.check_equal(&what, &balance.balance, &expected_balance)? {
                return Ok(false);
            }
            if let Some(reserved) = expected_reserved {
                let what = format!("reserved balance of {address} for SP{property} on node {index}");
                if !self.check_equal(&what, &balance.reserved, &reserved)? {
                    return Ok(false);
                }
            }
        }

        let reserved = expected_reserved.map_or_else(|| "any".to_string(), |r| r.to_string());
        self.report.line(format!(
            "Balance of {address} should be: {expected_balance} SP{property} ({reserved} SP{property} reserved)... OK"
        ));
        Ok(true)
    }

    /// Check the number of offers selling `property` (optionally for
    /// `desired`) on the first node.
    ///
    /// # Errors
    ///
    /// Returns fatal errors and node faults of the lookup.
    pub async fn check_orderbook_count(
        &mut self,
        expected: usize,
        property: PropertyId,
        desired: Option<PropertyId>,
    ) -> Result<bool> {
        let index = self.first_node()?;
        let offers = self.adapter(index)?.orderbook(property, desired).await?;
        let desired_label = desired.map_or_else(|| "None".to_string(), |d| d.to_string());
        let what = format!("number of offers for (SP{property}, SP{desired_label})");
        if !self.check_equal(&what, &offers.len(), &expected)? {
            debug!("Order book: {offers:?}");
            return Ok(false);
        }
        self.report.line(format!("{what} should be: {expected}... OK"));
        Ok(true)
    }

    /// Check the number of active offers on the traditional exchange.
    ///
    /// # Errors
    ///
    /// Returns fatal errors and node faults of the lookup.
    pub async fn check_active_dex_offers_count(&mut self, expected: usize) -> Result<bool> {
        let index = self.first_node()?;
        let offers = self.adapter(index)?.active_dex_sells().await?;
        let what = "number of active offers on the traditional exchange";
        if !self.check_equal(what, &offers.len(), &expected)? {
            debug!("Active offers: {offers:?}");
            return Ok(false);
        }
        self.report.line(format!("{what} should be: {expected}... OK"));
        Ok(true)
    }

    fn first_node(&self) -> Result<usize> {
        self.node_indices()
            .first()
            .copied()
            .ok_or_else(|| Error::Setup("network has no nodes".to_string()))
    }
}
