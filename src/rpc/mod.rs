//! JSON-RPC surface of the daemon under test.
//!
//! [`NodeRpc`] is the seam between the harness and a daemon: implementors
//! only provide [`NodeRpc::call`], every typed helper is built on top of it.
//! [`RpcClient`] talks HTTP to a real process.

mod client;

pub use client::RpcClient;

use crate::amount::Amount;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// An unspent transaction output as reported by `listunspent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Funding transaction id.
    pub txid: String,
    /// Output index within the funding transaction.
    pub vout: u32,
    /// Owning address.
    #[serde(default)]
    pub address: String,
    /// Output value.
    pub amount: Amount,
    /// Confirmation count.
    #[serde(default)]
    pub confirmations: u64,
}

/// One entry of `getpeerinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Remote address (`ip:port`).
    pub addr: String,
    /// Negotiated protocol version; zero until the handshake completes.
    #[serde(default)]
    pub version: u64,
    /// Whether the remote initiated the connection.
    #[serde(default)]
    pub inbound: bool,
}

/// Result of `signrawtransaction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Signed transaction encoding.
    pub hex: String,
    /// Whether every input carries a complete signature.
    pub complete: bool,
}

/// Modes of the `addnode` RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeMode {
    /// Try to connect once.
    OneTry,
    /// Add to the persistent peer list.
    Add,
    /// Remove from the persistent peer list.
    Remove,
}

impl AddNodeMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::OneTry => "onetry",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// A connection to one daemon's RPC interface.
#[allow(async_fn_in_trait)]
pub trait NodeRpc {
    /// Short label used in log lines (e.g. `node2`).
    fn label(&self) -> String;

    /// Invoke `method` with positional `params` and return the raw result.
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value>;

    /// Invoke `method` and decode its result.
    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("{method} on {}: {e}", self.label())))
    }

    /// Current block height (also the liveness probe).
    async fn get_block_count(&self) -> Result<u64> {
        self.call_as("getblockcount", vec![]).await
    }

    /// Ids of all transactions in the memory pool.
    async fn get_raw_mempool(&self) -> Result<BTreeSet<String>> {
        self.call_as("getrawmempool", vec![]).await
    }

    /// A fresh wallet address.
    async fn get_new_address(&self) -> Result<String> {
        self.call_as("getnewaddress", vec![]).await
    }

    /// Unspent outputs within the confirmation range, optionally restricted
    /// to `addresses` (empty means no restriction).
    async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<Vec<Utxo>> {
        self.call_as(
            "listunspent",
            vec![json!(min_conf), json!(max_conf), json!(addresses)],
        )
        .await
    }

    /// Assemble an unsigned transaction spending `inputs` into `outputs`.
    async fn create_raw_transaction(
        &self,
        inputs: &[Utxo],
        outputs: &BTreeMap<String, Amount>,
    ) -> Result<String> {
        let inputs: Vec<Value> = inputs
            .iter()
            .map(|u| json!({ "txid": u.txid, "vout": u.vout }))
            .collect();
        let mut out = serde_json::Map::new();
        for (address, amount) in outputs {
            out.insert(address.clone(), amount.to_json()?);
        }
        self.call_as(
            "createrawtransaction",
            vec![Value::Array(inputs), Value::Object(out)],
        )
        .await
    }

    /// Sign a raw transaction with the node's wallet.
    async fn sign_raw_transaction(&self, hex: &str) -> Result<SignedTransaction> {
        self.call_as("signrawtransaction", vec![json!(hex)]).await
    }

    /// Broadcast a signed transaction; `allow_high_fees` bypasses the node's
    /// absurd-fee guard.
    async fn send_raw_transaction(&self, hex: &str, allow_high_fees: bool) -> Result<String> {
        self.call_as("sendrawtransaction", vec![json!(hex), json!(allow_high_fees)])
            .await
    }

    /// Ask the node to open or drop a peer link.
    async fn add_node(&self, addr: &str, mode: AddNodeMode) -> Result<()> {
        self.call("addnode", vec![json!(addr), json!(mode.as_str())])
            .await
            .map(|_| ())
    }

    /// Drop an established peer connection.
    async fn disconnect_node(&self, addr: &str) -> Result<()> {
        self.call("disconnectnode", vec![json!(addr)]).await.map(|_| ())
    }

    /// Currently connected peers.
    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>> {
        self.call_as("getpeerinfo", vec![]).await
    }

    /// Create an `n`-of-`keys` multi-signature address in the node's wallet.
    async fn add_multisig_address(&self, required: u32, keys: &[String]) -> Result<String> {
        self.call_as("addmultisigaddress", vec![json!(required), json!(keys)])
            .await
    }

    /// Raw transaction lookup, used for diagnostics.
    async fn get_raw_transaction(&self, txid: &str) -> Result<String> {
        self.call_as("getrawtransaction", vec![json!(txid)]).await
    }

    /// Request a graceful shutdown.
    async fn stop(&self) -> Result<()> {
        self.call("stop", vec![]).await.map(|_| ())
    }
}
