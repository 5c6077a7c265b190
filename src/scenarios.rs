//! Built-in scenarios exercising the harness itself.
//!
//! They need nothing from the daemon beyond the plain wallet and peer RPC
//! surface, so they double as a smoke test for a new daemon build.

use crate::amount::Amount;
use crate::entity::PaymentRequest;
use crate::error::{Error, Result};
use crate::rpc::NodeRpc;
use crate::runner::{Scenario, ScenarioContext};
use crate::supervisor::NodeSet;
use std::fmt;
use std::str::FromStr;

/// 0.3 coins.
const PAYMENT: Amount = Amount::from_sats(30_000_000);
/// 0.0001 coins.
const FEE: Amount = Amount::from_sats(10_000);
/// 0.5 coins.
const HALF: Amount = Amount::from_sats(50_000_000);
/// 0.2 coins.
const MULTISIG_PAYMENT: Amount = Amount::from_sats(20_000_000);

/// Scenarios shipped with the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinScenario {
    /// Chain-linked nodes settle immediately when nothing is pending.
    ChainTopology,
    /// Blocks mined in one partition stay there until the network rejoins.
    PartitionRejoin,
    /// A payment from a single output returns the remainder as change.
    ChangeOutput,
    /// A payment exceeding the available outputs is refused locally.
    InsufficientFunds,
    /// Outputs of a 1-of-2 multi-signature address can be spent.
    MultisigFunding,
}

impl BuiltinScenario {
    /// Every built-in scenario in run order.
    pub const ALL: [Self; 5] = [
        Self::ChainTopology,
        Self::PartitionRejoin,
        Self::ChangeOutput,
        Self::InsufficientFunds,
        Self::MultisigFunding,
    ];

    /// Stable scenario name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ChainTopology => "chain-topology",
            Self::PartitionRejoin => "partition-rejoin",
            Self::ChangeOutput => "change-output",
            Self::InsufficientFunds => "insufficient-funds",
            Self::MultisigFunding => "multisig-funding",
        }
    }
}

impl fmt::Display for BuiltinScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuiltinScenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                Error::Config(format!(
                    "unknown scenario {s:?} (known: {})",
                    known.join(", ")
                ))
            })
    }
}

impl Scenario for BuiltinScenario {
    fn name(&self) -> &str {
        self.as_str()
    }

    async fn run<N: NodeSet>(&self, ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
        match self {
            Self::ChainTopology => chain_topology(ctx).await,
            Self::PartitionRejoin => partition_rejoin(ctx).await,
            Self::ChangeOutput => change_output(ctx).await,
            Self::InsufficientFunds => insufficient_funds(ctx).await,
            Self::MultisigFunding => multisig_funding(ctx).await,
        }
    }
}

async fn chain_topology<N: NodeSet>(ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
    let all = ctx.node_indices();
    let height = ctx.await_blocks(&all).await?;
    let pending = ctx.await_mempools(&all).await?;

    let links = ctx.topology().edges().len();
    ctx.check_equal("number of peer links", &links, &all.len().saturating_sub(1))?;
    ctx.line(format!(
        "{} nodes settled at height {height} with {pending} pending transaction(s) ... OK",
        all.len()
    ));
    Ok(())
}

async fn partition_rejoin<N: NodeSet>(ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
    let all = ctx.node_indices();
    let before = ctx.await_blocks(&all).await?;

    ctx.split_default().await?;
    let partitions = ctx.topology().partitions();
    let (lower, upper) = match partitions.as_slice() {
        [lower, upper] => (lower.clone(), upper.clone()),
        _ => return Err(Error::Topology("split did not produce two partitions".to_string())),
    };
    let miner = lower
        .first()
        .copied()
        .ok_or_else(|| Error::Topology("empty partition".to_string()))?;

    ctx.generate_block(miner, 1).await?;
    let lower_height = ctx.await_blocks(&lower).await?;
    ctx.check_equal("height of the mining partition", &lower_height, &(before + 1))?;
    let upper_height = ctx.await_blocks(&upper).await?;
    ctx.check_equal("height of the idle partition", &upper_height, &before)?;

    ctx.join().await?;
    let after = ctx.await_blocks(&all).await?;
    ctx.check_equal("height after rejoining", &after, &(before + 1))?;
    ctx.line(format!("Partitions converged to height {after} after rejoining ... OK"));
    Ok(())
}

/// Pay `amount` from the default entity of `node` to `address` and confirm it.
async fn fund<N: NodeSet>(
    ctx: &mut ScenarioContext<'_, N>,
    node: usize,
    address: &str,
    amount: Amount,
) -> Result<()> {
    let funder = ctx.entity(node).await?;
    let request = funder.payment(Some(address), amount);
    funder.build_payment(&request).await?;
    ctx.generate_block(node, 1).await
}

async fn change_output<N: NodeSet>(ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
    let alice = ctx.new_entity(0).await?;
    let bob = ctx.new_entity(0).await?;
    fund(ctx, 0, alice.address(), Amount::ONE).await?;

    let request = PaymentRequest::new(Some(bob.address().to_string()), PAYMENT, FEE)
        .with_filter(vec![alice.address().to_string()]);
    let built = alice.build_payment(&request).await;
    if let Some(built) = ctx.record("Payment with change", built)? {
        let expected_change = Amount::ONE - PAYMENT - FEE;
        ctx.check_equal("number of inputs", &built.inputs.len(), &1)?;
        ctx.check_equal(
            "destination output",
            &built.outputs.get(bob.address()).copied(),
            &Some(PAYMENT),
        )?;
        ctx.check_equal("change", &built.change, &expected_change)?;
        ctx.check_equal(
            "change output",
            &built.outputs.get(alice.address()).copied(),
            &Some(expected_change),
        )?;
    }

    ctx.generate_block(0, 1).await
}

async fn insufficient_funds<N: NodeSet>(ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
    let alice = ctx.new_entity(0).await?;
    let bob = ctx.new_entity(0).await?;
    fund(ctx, 0, alice.address(), HALF).await?;

    let all = ctx.node_indices();
    let pending_before = ctx.await_mempools(&all).await?;

    let request = PaymentRequest::new(Some(bob.address().to_string()), Amount::ONE, FEE)
        .with_filter(vec![alice.address().to_string()]);
    match alice.build_payment(&request).await {
        Err(Error::InsufficientFunds { need, have }) => {
            ctx.check_equal("amount needed", &need, &(Amount::ONE + FEE))?;
            ctx.check_equal("amount available", &have, &HALF)?;
            ctx.line(format!(
                "Payment should fail: need {need}, have {have} ... OK"
            ));
        }
        Err(e) if e.is_fatal() => return Err(e),
        Err(e) => ctx.fail("Payment exceeding funds", &e),
        Ok(built) => ctx.fail(
            "Payment exceeding funds",
            &Error::Assertion(format!("transaction {} was broadcast", built.txid)),
        ),
    }

    let pending_after = ctx.await_mempools(&all).await?;
    ctx.check_equal("pending transactions", &pending_after, &pending_before)?;
    Ok(())
}

async fn multisig_funding<N: NodeSet>(ctx: &mut ScenarioContext<'_, N>) -> Result<()> {
    let alice = ctx.new_entity(0).await?;
    let bob = ctx.new_entity(0).await?;
    let keys = vec![alice.address().to_string(), bob.address().to_string()];
    let multisig = ctx.rpc(0)?.add_multisig_address(1, &keys).await?;
    let vault = ctx.bind_entity(0, &multisig)?;
    fund(ctx, 0, vault.address(), HALF).await?;

    let request = PaymentRequest::new(Some(bob.address().to_string()), MULTISIG_PAYMENT, FEE)
        .with_filter(vec![multisig.clone()]);
    let built = vault.build_payment(&request).await;
    if let Some(built) = ctx.record("Spend from multi-signature address", built)? {
        ctx.check_equal("change", &built.change, &(HALF - MULTISIG_PAYMENT - FEE))?;
        ctx.check_equal(
            "destination output",
            &built.outputs.get(bob.address()).copied(),
            &Some(MULTISIG_PAYMENT),
        )?;
    }

    ctx.generate_block(0, 1).await
}
