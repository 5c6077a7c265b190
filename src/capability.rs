//! Daemon-specific RPC surface behind capability traits.
//!
//! The token layer of the daemon under test exists in two RPC dialects. The
//! harness talks to it only through [`BlockGenerator`], [`BalanceQuerier`],
//! [`TradeSubmitter`] and [`TransactionInspector`]; [`DaemonAdapter`]
//! implements all of them on top of any [`NodeRpc`], with the concrete method
//! names taken from a [`MethodTable`] chosen by [`DaemonFlavor`].

use crate::amount::Amount;
use crate::config::DaemonFlavor;
use crate::error::{Error, Result};
use crate::rpc::NodeRpc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Token property identifier.
pub type PropertyId = u32;

/// How blocks are mined on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateStyle {
    /// `generate <n>`
    Generate,
    /// `setgenerate true <n>`
    SetGenerate,
}

/// Concrete RPC method names of one daemon flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodTable {
    /// Block generation style.
    pub generate: GenerateStyle,
    /// Token balance of an address.
    pub get_balance: &'static str,
    /// Simple token send.
    pub send: &'static str,
    /// Send to all holders of a property.
    pub send_to_owners: &'static str,
    /// Distributed exchange trade.
    pub trade: &'static str,
    /// Broadcast a raw token payload.
    pub send_raw_payload: &'static str,
    /// Token-layer transaction lookup.
    pub get_transaction: &'static str,
    /// Distributed exchange order book.
    pub get_orderbook: &'static str,
    /// Active offers on the traditional exchange.
    pub get_active_dex_sells: &'static str,
}

impl MethodTable {
    /// Omni Core 0.2 and later, on a Bitcoin Core 0.13 base.
    pub const OMNI: Self = Self {
        generate: GenerateStyle::Generate,
        get_balance: "omni_getbalance",
        send: "omni_send",
        send_to_owners: "omni_sendsto",
        trade: "omni_sendtrade",
        send_raw_payload: "omni_sendrawtx",
        get_transaction: "omni_gettransaction",
        get_orderbook: "omni_getorderbook",
        get_active_dex_sells: "omni_getactivedexsells",
    };

    /// Master Core and Omni Core 0.0.x, on a Bitcoin Core 0.10 base. These
    /// daemons lack `disconnectnode`, so the network cannot be split.
    pub const MASTER_CORE: Self = Self {
        generate: GenerateStyle::SetGenerate,
        get_balance: "getbalance_MP",
        send: "send_MP",
        send_to_owners: "sendtoowners_MP",
        trade: "trade_MP",
        send_raw_payload: "sendrawtx_MP",
        get_transaction: "gettransaction_MP",
        get_orderbook: "getorderbook_MP",
        get_active_dex_sells: "getactivedexsells_MP",
    };

    /// Method table of a flavor.
    #[must_use]
    pub const fn for_flavor(flavor: DaemonFlavor) -> Self {
        match flavor {
            DaemonFlavor::Omni => Self::OMNI,
            DaemonFlavor::MasterCore => Self::MASTER_CORE,
        }
    }
}

/// Token balance of one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// Available balance.
    pub balance: Amount,
    /// Balance reserved by open offers.
    #[serde(default)]
    pub reserved: Amount,
}

impl TokenBalance {
    /// The balance reported for a property that does not exist.
    pub const ZERO: Self = Self {
        balance: Amount::ZERO,
        reserved: Amount::ZERO,
    };
}

/// Token-layer view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Transaction id.
    pub txid: String,
    /// Whether the token layer accepted the transaction.
    pub valid: bool,
    /// Rejection reason, if invalid.
    #[serde(default, rename = "invalidreason")]
    pub invalid_reason: Option<String>,
    /// Confirmations at lookup time.
    #[serde(default)]
    pub confirmations: u64,
}

/// Trade action codes of the distributed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TradeAction {
    /// Place a new offer.
    Add = 1,
    /// Cancel offers at a given price.
    CancelAtPrice = 2,
    /// Cancel all offers of a currency pair.
    CancelPair = 3,
    /// Cancel every offer in an ecosystem.
    CancelEverything = 4,
}

/// Parameters of a distributed exchange trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeRequest {
    /// Property offered.
    pub property_for_sale: PropertyId,
    /// Amount offered.
    pub amount_for_sale: Amount,
    /// Property desired in exchange.
    pub property_desired: PropertyId,
    /// Amount desired.
    pub amount_desired: Amount,
    /// Trade action.
    pub action: TradeAction,
}

/// Mine blocks on demand.
#[allow(async_fn_in_trait)]
pub trait BlockGenerator {
    /// Mine `count` blocks on the bound node.
    async fn generate_blocks(&self, count: u32) -> Result<()>;
}

/// Query token balances.
#[allow(async_fn_in_trait)]
pub trait BalanceQuerier {
    /// Balance of `address` in `property`.
    async fn balance(&self, address: &str, property: PropertyId) -> Result<TokenBalance>;
}

/// Submit token-layer transactions. Each returns the broadcast txid.
#[allow(async_fn_in_trait)]
pub trait TradeSubmitter {
    /// Send `amount` of `property` from `from` to `to`.
    async fn send(&self, from: &str, to: &str, property: PropertyId, amount: Amount)
        -> Result<String>;

    /// Distribute `amount` of `property` to all holders.
    async fn send_to_owners(&self, from: &str, property: PropertyId, amount: Amount)
        -> Result<String>;

    /// Place or cancel an offer on the distributed exchange.
    async fn trade(&self, from: &str, request: &TradeRequest) -> Result<String>;

    /// Broadcast a hand-encoded token payload.
    async fn send_raw_payload(&self, from: &str, payload_hex: &str) -> Result<String>;
}

/// Inspect token-layer state.
#[allow(async_fn_in_trait)]
pub trait TransactionInspector {
    /// Token-layer view of `txid`.
    async fn transaction(&self, txid: &str) -> Result<TransactionInfo>;

    /// Offers of the distributed exchange selling `property`, optionally
    /// restricted to those desiring `desired`.
    async fn orderbook(&self, property: PropertyId, desired: Option<PropertyId>)
        -> Result<Vec<Value>>;

    /// Active offers on the traditional exchange.
    async fn active_dex_sells(&self) -> Result<Vec<Value>>;
}

/// Capability implementation over a raw RPC connection.
#[derive(Debug, Clone)]
pub struct DaemonAdapter<R> {
    rpc: R,
    methods: MethodTable,
}

impl<R: NodeRpc> DaemonAdapter<R> {
    /// Bind `rpc` to the method names of `flavor`.
    pub fn new(rpc: R, flavor: DaemonFlavor) -> Self {
        Self::with_methods(rpc, MethodTable::for_flavor(flavor))
    }

    /// Bind `rpc` to an explicit method table.
    pub fn with_methods(rpc: R, methods: MethodTable) -> Self {
        Self { rpc, methods }
    }

    /// Underlying RPC connection.
    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    /// Active method table.
    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }
}

impl<R: NodeRpc> BlockGenerator for DaemonAdapter<R> {
    async fn generate_blocks(&self, count: u32) -> Result<()> {
        match self.methods.generate {
            GenerateStyle::Generate => self.rpc.call("generate", vec![json!(count)]).await?,
            GenerateStyle::SetGenerate => {
                self.rpc
                    .call("setgenerate", vec![json!(true), json!(count)])
                    .await?
            }
        };
        Ok(())
    }
}

impl<R: NodeRpc> BalanceQuerier for DaemonAdapter<R> {
    async fn balance(&self, address: &str, property: PropertyId) -> Result<TokenBalance> {
        self.rpc
            .call_as(self.methods.get_balance, vec![json!(address), json!(property)])
            .await
    }
}

impl<R: NodeRpc> TradeSubmitter for DaemonAdapter<R> {
    async fn send(
        &self,
        from: &str,
        to: &str,
        property: PropertyId,
        amount: Amount,
    ) -> Result<String> {
        self.rpc
            .call_as(
                self.methods.send,
                vec![json!(from), json!(to), json!(property), json!(amount.to_string())],
            )
            .await
    }

    async fn send_to_owners(
        &self,
        from: &str,
        property: PropertyId,
        amount: Amount,
    ) -> Result<String> {
        self.rpc
            .call_as(
                self.methods.send_to_owners,
                vec![json!(from), json!(property), json!(amount.to_string())],
            )
            .await
    }

    async fn trade(&self, from: &str, request: &TradeRequest) -> Result<String> {
        if request.amount_for_sale.is_negative() || request.amount_desired.is_negative() {
            return Err(Error::InvalidAmount(format!(
                "negative trade amount: {} / {}",
                request.amount_for_sale, request.amount_desired
            )));
        }
        self.rpc
            .call_as(
                self.methods.trade,
                vec![
                    json!(from),
                    json!(request.property_for_sale),
                    json!(request.amount_for_sale.to_string()),
                    json!(request.property_desired),
                    json!(request.amount_desired.to_string()),
                    json!(request.action as u8),
                ],
            )
            .await
    }

    async fn send_raw_payload(&self, from: &str, payload_hex: &str) -> Result<String> {
        self.rpc
            .call_as(
                self.methods.send_raw_payload,
                vec![json!(from), json!(payload_hex)],
            )
            .await
    }
}

impl<R: NodeRpc> TransactionInspector for DaemonAdapter<R> {
    async fn transaction(&self, txid: &str) -> Result<TransactionInfo> {
        self.rpc
            .call_as(self.methods.get_transaction, vec![json!(txid)])
            .await
    }

    async fn orderbook(
        &self,
        property: PropertyId,
        desired: Option<PropertyId>,
    ) -> Result<Vec<Value>> {
        let mut params = vec![json!(property)];
        if let Some(desired) = desired {
            params.push(json!(desired));
        }
        self.rpc.call_as(self.methods.get_orderbook, params).await
    }

    async fn active_dex_sells(&self) -> Result<Vec<Value>> {
        self.rpc
            .call_as(self.methods.get_active_dex_sells, vec![])
            .await
    }
}
