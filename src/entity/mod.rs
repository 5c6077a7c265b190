//! Transaction-originating test actors.
//!
//! An [`Entity`] is bound to one node and one address for the lifetime of a
//! scenario. Coin payments are assembled by hand (see [`builder`]); token
//! operations go through the daemon's capability adapter.

pub mod builder;

pub use builder::{build_payment, plan_payment, BuiltTransaction, PaymentPlan, PaymentRequest};

use crate::amount::Amount;
use crate::capability::{
    BalanceQuerier, BlockGenerator, DaemonAdapter, PropertyId, TokenBalance, TradeRequest,
    TradeSubmitter,
};
use crate::config::{DaemonFlavor, EntityConfig};
use crate::error::Result;
use crate::rpc::NodeRpc;
use tracing::info;

/// Both legs of an offer payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferPayment {
    /// Payment of the fee amount to the protocol fee address.
    pub fee_leg: BuiltTransaction,
    /// The payment itself.
    pub payment: BuiltTransaction,
}

/// A test actor bound to a node and an address.
#[derive(Debug, Clone)]
pub struct Entity<R> {
    node: usize,
    address: String,
    rpc: R,
    flavor: DaemonFlavor,
    config: EntityConfig,
}

impl<R: NodeRpc + Clone> Entity<R> {
    /// Bind a fresh wallet address of node `node`.
    ///
    /// # Errors
    ///
    /// Returns the node's error if no address can be generated.
    pub async fn create(
        node: usize,
        rpc: R,
        flavor: DaemonFlavor,
        config: EntityConfig,
    ) -> Result<Self> {
        let address = rpc.get_new_address().await?;
        Ok(Self::bind(node, rpc, address, flavor, config))
    }

    /// Bind an existing address of node `node`.
    pub fn bind(
        node: usize,
        rpc: R,
        address: impl Into<String>,
        flavor: DaemonFlavor,
        config: EntityConfig,
    ) -> Self {
        Self {
            node,
            address: address.into(),
            rpc,
            flavor,
            config,
        }
    }

    /// Owned address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Index of the bound node.
    pub fn node(&self) -> usize {
        self.node
    }

    /// RPC connection of the bound node.
    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    fn adapter(&self) -> DaemonAdapter<R> {
        DaemonAdapter::new(self.rpc.clone(), self.flavor)
    }

    /// A payment request with the configured default fee and confirmation
    /// range, spending any wallet output.
    pub fn payment(&self, destination: Option<&str>, amount: Amount) -> PaymentRequest {
        PaymentRequest::new(
            destination.map(ToString::to_string),
            amount,
            self.config.default_fee,
        )
        .with_conf_range(self.config.min_conf, self.config.max_conf)
    }

    /// Build, sign and broadcast `request`; change returns to this entity.
    ///
    /// # Errors
    ///
    /// See [`builder::build_payment`].
    pub async fn build_payment(&self, request: &PaymentRequest) -> Result<BuiltTransaction> {
        info!(
            "Sending {} from {} to {} with a fee of {}",
            request.amount,
            self.address,
            request.destination.as_deref().unwrap_or("(none)"),
            request.fee
        );
        builder::build_payment(
            &self.rpc,
            request,
            &self.address,
            self.config.coin_selection,
        )
        .await
    }

    /// Two payments back to back: `request.fee` to the protocol fee address,
    /// then `request` itself.
    ///
    /// # Errors
    ///
    /// Returns the first failing leg's error; if the second leg fails the
    /// first has already been broadcast.
    pub async fn pay_for_offer(&self, request: &PaymentRequest) -> Result<OfferPayment> {
        let fee_leg = PaymentRequest {
            destination: Some(self.config.fee_address.clone()),
            amount: request.fee,
            ..request.clone()
        };
        let fee_leg = self.build_payment(&fee_leg).await?;
        let payment = self.build_payment(request).await?;
        Ok(OfferPayment { fee_leg, payment })
    }

    /// Buy tokens by paying `amount` to the exodus address from this
    /// entity's own outputs.
    ///
    /// # Errors
    ///
    /// See [`builder::build_payment`].
    pub async fn purchase_tokens(&self, amount: Amount, fee: Amount) -> Result<BuiltTransaction> {
        info!("Purchasing tokens from {} for {amount} with a fee of {fee}", self.address);
        let request = PaymentRequest::new(Some(self.config.exodus_address.clone()), amount, fee)
            .with_filter(vec![self.address.clone()])
            .with_conf_range(self.config.min_conf, self.config.max_conf);
        builder::build_payment(
            &self.rpc,
            &request,
            &self.address,
            self.config.coin_selection,
        )
        .await
    }

    /// Mine `count` blocks on the bound node.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn generate_block(&self, count: u32) -> Result<()> {
        info!("Generating {count} block(s) on node {}", self.node);
        self.adapter().generate_blocks(count).await
    }

    /// Token balance of this entity's address.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn get_balance(&self, property: PropertyId) -> Result<TokenBalance> {
        self.adapter().balance(&self.address, property).await
    }

    /// Send tokens to `destination`.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn send(
        &self,
        destination: &str,
        property: PropertyId,
        amount: Amount,
    ) -> Result<String> {
        info!(
            "Sending {amount} SP{property} from {} to {destination}",
            self.address
        );
        self.adapter()
            .send(&self.address, destination, property, amount)
            .await
    }

    /// Distribute tokens to every holder of `property`.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn send_to_owners(&self, property: PropertyId, amount: Amount) -> Result<String> {
        info!("Sending {amount} SP{property} from {} to owners", self.address);
        self.adapter()
            .send_to_owners(&self.address, property, amount)
            .await
    }

    /// Place or cancel an offer on the distributed exchange.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn trade(&self, request: &TradeRequest) -> Result<String> {
        info!(
            "Offering (action: {}) {} SP{} from {} for {} SP{}",
            request.action as u8,
            request.amount_for_sale,
            request.property_for_sale,
            self.address,
            request.amount_desired,
            request.property_desired
        );
        self.adapter().trade(&self.address, request).await
    }

    /// Broadcast a hand-encoded token payload from this entity.
    ///
    /// # Errors
    ///
    /// Returns the node's error.
    pub async fn send_raw_payload(&self, payload_hex: &str) -> Result<String> {
        self.adapter()
            .send_raw_payload(&self.address, payload_hex)
            .await
    }
}
