//! Coin selection, fee/change arithmetic and build-sign-broadcast.
//!
//! [`plan_payment`] is pure: it turns a list of unspent outputs and a
//! [`PaymentRequest`] into inputs and outputs. [`build_payment`] feeds it
//! fresh `listunspent` data and pushes the result through the node.

use crate::amount::Amount;
use crate::config::CoinSelection;
use crate::error::{Error, Result};
use crate::rpc::{NodeRpc, Utxo};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// A value transfer to be assembled from the entity's unspent outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Receiving address; `None` sends everything except the fee back as change.
    pub destination: Option<String>,
    /// Amount paid to `destination`.
    pub amount: Amount,
    /// Fee left to the miner.
    pub fee: Amount,
    /// Only spend outputs owned by these addresses (empty: any).
    pub address_filter: Vec<String>,
    /// Minimum confirmations of spent outputs.
    pub min_conf: u32,
    /// Maximum confirmations of spent outputs.
    pub max_conf: u32,
}

impl PaymentRequest {
    /// A payment of `amount` to `destination` with the given fee and no
    /// input restrictions.
    #[must_use]
    pub fn new(destination: Option<String>, amount: Amount, fee: Amount) -> Self {
        Self {
            destination,
            amount,
            fee,
            address_filter: Vec::new(),
            min_conf: 0,
            max_conf: 999_999,
        }
    }

    /// Restrict spending to outputs of `addresses`.
    #[must_use]
    pub fn with_filter(mut self, addresses: Vec<String>) -> Self {
        self.address_filter = addresses;
        self
    }

    /// Restrict spending to outputs within a confirmation range.
    #[must_use]
    pub fn with_conf_range(mut self, min_conf: u32, max_conf: u32) -> Self {
        self.min_conf = min_conf;
        self.max_conf = max_conf;
        self
    }

    /// Amount plus fee.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAmount` for negative values or overflow.
    pub fn need(&self) -> Result<Amount> {
        if self.amount.is_negative() || self.fee.is_negative() {
            return Err(Error::InvalidAmount(format!(
                "negative payment: amount {}, fee {}",
                self.amount, self.fee
            )));
        }
        self.amount
            .checked_add(self.fee)
            .ok_or_else(|| Error::InvalidAmount(format!("{} + {} overflows", self.amount, self.fee)))
    }
}

/// Inputs and outputs of a payment before it is handed to the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentPlan {
    /// Spent outputs, in selection order.
    pub inputs: Vec<Utxo>,
    /// Address to amount.
    pub outputs: BTreeMap<String, Amount>,
    /// Sum of `inputs`.
    pub total_in: Amount,
    /// `total_in - amount - fee`.
    pub change: Amount,
}

/// A broadcast payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTransaction {
    /// Spent outputs.
    pub inputs: Vec<Utxo>,
    /// Address to amount.
    pub outputs: BTreeMap<String, Amount>,
    /// Change returned to the entity (zero if no change output).
    pub change: Amount,
    /// Signed transaction encoding.
    pub signed_hex: String,
    /// Broadcast transaction id.
    pub txid: String,
}

/// Pick inputs from the end of `utxos` (most recently listed first).
///
/// Returns the selected outputs and their sum.
#[must_use]
pub fn select_coins(
    mut utxos: Vec<Utxo>,
    need: Amount,
    strategy: CoinSelection,
) -> (Vec<Utxo>, Amount) {
    let mut selected = Vec::new();
    let mut total = Amount::ZERO;
    while let Some(utxo) = utxos.pop() {
        total += utxo.amount;
        selected.push(utxo);
        if strategy == CoinSelection::UntilCovered && total >= need {
            break;
        }
    }
    (selected, total)
}

/// Compute inputs, outputs and change for `request`.
///
/// The destination output is present only if a destination is given and the
/// amount is positive; the change output only if change is positive. Paying
/// to `change_address` itself merges both into one output.
///
/// # Errors
///
/// Returns `Error::InsufficientFunds` if the selected outputs do not cover
/// amount plus fee, and `Error::InvalidAmount` for negative requests.
pub fn plan_payment(
    utxos: Vec<Utxo>,
    request: &PaymentRequest,
    change_address: &str,
    strategy: CoinSelection,
) -> Result<PaymentPlan> {
    let need = request.need()?;
    let (inputs, total_in) = select_coins(utxos, need, strategy);
    if total_in < need {
        return Err(Error::InsufficientFunds {
            need,
            have: total_in,
        });
    }
    let change = total_in
        .checked_sub(need)
        .ok_or_else(|| Error::InvalidAmount(format!("{total_in} - {need} overflows")))?;

    let mut outputs = BTreeMap::new();
    if let Some(destination) = &request.destination {
        if request.amount.is_positive() {
            outputs.insert(destination.clone(), request.amount);
        }
    }
    if change.is_positive() {
        *outputs.entry(change_address.to_string()).or_insert(Amount::ZERO) += change;
    }

    Ok(PaymentPlan {
        inputs,
        outputs,
        total_in,
        change,
    })
}

/// Plan `request` against live unspent outputs, then create, sign and
/// broadcast it through `rpc`.
///
/// Broadcast always allows high fees. Node errors are returned unchanged.
///
/// # Errors
///
/// Returns `Error::InsufficientFunds` before anything is submitted if funds
/// do not suffice, or the node's error from any RPC step.
pub async fn build_payment<R: NodeRpc>(
    rpc: &R,
    request: &PaymentRequest,
    change_address: &str,
    strategy: CoinSelection,
) -> Result<BuiltTransaction> {
    let utxos = rpc
        .list_unspent(request.min_conf, request.max_conf, &request.address_filter)
        .await?;
    let plan = plan_payment(utxos, request, change_address, strategy)?;
    debug!(
        "{}: spending {} input(s) worth {}, change {}",
        rpc.label(),
        plan.inputs.len(),
        plan.total_in,
        plan.change
    );

    let raw = rpc.create_raw_transaction(&plan.inputs, &plan.outputs).await?;
    let signed = rpc.sign_raw_transaction(&raw).await?;
    if !signed.complete {
        warn!("{}: signature incomplete, broadcasting anyway", rpc.label());
    }
    let txid = rpc.send_raw_transaction(&signed.hex, true).await?;

    Ok(BuiltTransaction {
        inputs: plan.inputs,
        outputs: plan.outputs,
        change: plan.change,
        signed_hex: signed.hex,
        txid,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mock::MockNetwork;

    fn amt(s: &str) -> Amount {
        s.parse().unwrap()
    }

    fn utxo(n: u8, amount: &str) -> Utxo {
        Utxo {
            txid: format!("{n:064x}"),
            vout: 0,
            address: "mSelf".to_string(),
            amount: amt(amount),
            confirmations: 1,
        }
    }

    fn pay(destination: &str, amount: &str, fee: &str) -> PaymentRequest {
        PaymentRequest::new(Some(destination.to_string()), amt(amount), amt(fee))
    }

    #[test]
    fn test_single_input_with_change() {
        let plan = plan_payment(
            vec![utxo(1, "1.0")],
            &pay("mDest", "0.3", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap();

        assert_eq!(plan.inputs.len(), 1);
        assert_eq!(plan.outputs["mDest"].to_string(), "0.30000000");
        assert_eq!(plan.outputs["mSelf"].to_string(), "0.69990000");
        assert_eq!(plan.change, amt("0.6999"));
    }

    #[test]
    fn test_insufficient_funds_reports_need_and_have() {
        let err = plan_payment(
            vec![utxo(1, "0.2"), utxo(2, "0.3")],
            &pay("mDest", "1.0", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap_err();

        match err {
            Error::InsufficientFunds { need, have } => {
                assert_eq!(need, amt("1.0001"));
                assert_eq!(have, amt("0.5"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_drain_all_consumes_every_output_newest_first() {
        let plan = plan_payment(
            vec![utxo(1, "5"), utxo(2, "1"), utxo(3, "2")],
            &pay("mDest", "0.5", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap();

        let order: Vec<_> = plan.inputs.iter().map(|u| u.amount).collect();
        assert_eq!(order, vec![amt("2"), amt("1"), amt("5")]);
        assert_eq!(plan.change, amt("7.4999"));
    }

    #[test]
    fn test_until_covered_stops_early() {
        let plan = plan_payment(
            vec![utxo(1, "5"), utxo(2, "1"), utxo(3, "2")],
            &pay("mDest", "2.5", "0.0001"),
            "mSelf",
            CoinSelection::UntilCovered,
        )
        .unwrap();

        assert_eq!(plan.inputs.len(), 2);
        assert_eq!(plan.total_in, amt("3"));
        assert_eq!(plan.change, amt("0.4999"));
    }

    #[test]
    fn test_zero_change_has_no_change_output() {
        let plan = plan_payment(
            vec![utxo(1, "1.0001")],
            &pay("mDest", "1", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap();
        assert!(plan.change.is_zero());
        assert_eq!(plan.outputs.len(), 1);
        assert!(!plan.outputs.contains_key("mSelf"));
    }

    #[test]
    fn test_no_destination_returns_everything_as_change() {
        let request = PaymentRequest::new(None, Amount::ZERO, amt("0.0001"));
        let plan =
            plan_payment(vec![utxo(1, "1")], &request, "mSelf", CoinSelection::DrainAll).unwrap();
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs["mSelf"], amt("0.9999"));
    }

    #[test]
    fn test_zero_amount_omits_destination() {
        let plan = plan_payment(
            vec![utxo(1, "1")],
            &pay("mDest", "0", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap();
        assert!(!plan.outputs.contains_key("mDest"));
    }

    #[test]
    fn test_payment_to_self_merges_with_change() {
        let plan = plan_payment(
            vec![utxo(1, "1")],
            &pay("mSelf", "0.3", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap();
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs["mSelf"], amt("0.9999"));
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let err = plan_payment(
            vec![utxo(1, "1")],
            &pay("mDest", "-0.1", "0.0001"),
            "mSelf",
            CoinSelection::DrainAll,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidAmount(_)));
    }

    #[test]
    fn test_conservation_and_funds_threshold() {
        let pool = vec![utxo(1, "0.12345678"), utxo(2, "0.5"), utxo(3, "0.00000001")];
        let available: Amount = pool.iter().map(|u| u.amount).sum();
        let fee = amt("0.0001");

        for sats in (0..=available.sats() + 20_000).step_by(1_234_567) {
            let amount = Amount::from_sats(sats);
            let request = PaymentRequest::new(Some("mDest".to_string()), amount, fee);
            let result = plan_payment(pool.clone(), &request, "mSelf", CoinSelection::DrainAll);
            let need = amount + fee;
            if need > available {
                assert!(matches!(result, Err(Error::InsufficientFunds { .. })));
                continue;
            }
            let plan = result.unwrap();
            let inputs: Amount = plan.inputs.iter().map(|u| u.amount).sum();
            assert_eq!(inputs, amount + fee + plan.change);
            assert!(!plan.change.is_negative());
            assert_eq!(plan.outputs.contains_key("mSelf"), plan.change.is_positive());
            assert!(plan.outputs.values().all(|v| v.is_positive()));
        }
    }

    #[tokio::test]
    async fn test_build_payment_broadcasts_with_high_fee_override() {
        let net = MockNetwork::new(1);
        let rpc = net.rpc(0);
        let me = rpc.get_new_address().await.unwrap();
        net.fund(0, &me, Amount::ONE);

        let built = build_payment(
            &rpc,
            &pay("mDest", "0.3", "0.0001").with_filter(vec![me.clone()]),
            &me,
            CoinSelection::DrainAll,
        )
        .await
        .unwrap();

        assert_eq!(built.inputs.len(), 1);
        assert_eq!(built.outputs["mDest"], amt("0.3"));
        assert_eq!(built.outputs[&me], amt("0.6999"));

        let sent = net.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].txid, built.txid);
        assert!(sent[0].allow_high_fees);
        assert_eq!(net.mempool(0).len(), 1);
    }

    #[tokio::test]
    async fn test_build_payment_submits_nothing_when_short() {
        let net = MockNetwork::new(1);
        let rpc = net.rpc(0);
        let me = rpc.get_new_address().await.unwrap();
        net.fund(0, &me, amt("0.5"));

        let err = build_payment(
            &rpc,
            &pay("mDest", "1.0", "0.0001"),
            &me,
            CoinSelection::DrainAll,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert!(!err.is_fatal());
        assert_eq!(net.call_count("createrawtransaction"), 0);
        assert_eq!(net.call_count("sendrawtransaction"), 0);
    }

    #[tokio::test]
    async fn test_node_fault_propagates_unchanged() {
        let net = MockNetwork::new(1);
        let rpc = net.rpc(0);
        let me = rpc.get_new_address().await.unwrap();
        net.fund(0, &me, Amount::ONE);
        net.fail("sendrawtransaction", -26, "66: insufficient priority");

        let err = build_payment(&rpc, &pay("mDest", "0.3", "0.0001"), &me, CoinSelection::DrainAll)
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(-26));
    }

    #[tokio::test]
    async fn test_filter_and_conf_range_are_forwarded() {
        let net = MockNetwork::new(1);
        let rpc = net.rpc(0);
        let me = rpc.get_new_address().await.unwrap();
        net.fund(0, &me, Amount::ONE);

        let request = pay("mDest", "0.1", "0.0001")
            .with_filter(vec![me.clone()])
            .with_conf_range(1, 10);
        build_payment(&rpc, &request, &me, CoinSelection::DrainAll)
            .await
            .unwrap();

        let params = net.last_params("listunspent").unwrap();
        assert_eq!(params[0], serde_json::json!(1));
        assert_eq!(params[1], serde_json::json!(10));
        assert_eq!(params[2], serde_json::json!([me]));
    }
}
