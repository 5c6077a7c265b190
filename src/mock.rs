//! In-memory regtest network for unit tests.
//!
//! Answers the JSON-RPC surface the harness consumes. Links are directed
//! (dialer, target) pairs; blocks and mempool entries spread only inside a
//! connected component, and a lagging node moves one block closer to its
//! component's tip each time its height is polled, so barriers see a few
//! unequal rounds before settling.

use crate::amount::Amount;
use crate::error::{Error, Result};
use crate::rpc::{NodeRpc, Utxo};
use crate::supervisor::{NodeSet, PeerEndpoint};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

const P2P_BASE: u16 = 18_000;
const INBOUND_PORT_BASE: u16 = 40_000;
const PROTOCOL_VERSION: u64 = 70_002;

/// A transaction accepted by `sendrawtransaction`.
#[derive(Debug, Clone)]
pub struct SentTx {
    pub node: usize,
    pub txid: String,
    pub inputs: Vec<Utxo>,
    pub outputs: BTreeMap<String, Amount>,
    pub allow_high_fees: bool,
}

#[derive(Debug, Default)]
struct MockNode {
    height: u64,
    mempool: BTreeSet<String>,
    utxos: Vec<Utxo>,
    next_address: u32,
    stopped: bool,
}

#[derive(Debug)]
struct RawTx {
    inputs: Vec<(String, u32)>,
    outputs: BTreeMap<String, Amount>,
}

#[derive(Debug, Default)]
struct State {
    nodes: Vec<MockNode>,
    // (dialer, target) -> getpeerinfo polls left before the handshake completes
    links: BTreeMap<(usize, usize), u32>,
    handshake_polls: u32,
    owners: BTreeMap<String, usize>,
    raw: BTreeMap<String, RawTx>,
    sent: Vec<SentTx>,
    confirmed: BTreeSet<String>,
    invalid: BTreeSet<String>,
    balances: BTreeMap<(String, u32), (Amount, Amount)>,
    orderbooks: BTreeMap<u32, Vec<Value>>,
    dex_sells: Vec<Value>,
    failures: BTreeMap<String, (i64, String)>,
    calls: Vec<(usize, String, Vec<Value>)>,
    next_id: u64,
}

impl State {
    fn next_txid(&mut self) -> String {
        self.next_id += 1;
        format!("{:064x}", self.next_id)
    }

    fn index_of_addr(&self, addr: &str) -> Option<usize> {
        let port: u16 = addr.rsplit(':').next()?.parse().ok()?;
        let index = usize::from(port.checked_sub(P2P_BASE)?);
        (index < self.nodes.len()).then_some(index)
    }

    fn component(&self, start: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &(a, b) in self.links.keys() {
                let next = if a == node {
                    b
                } else if b == node {
                    a
                } else {
                    continue;
                };
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn submit(&mut self, index: usize) -> String {
        let txid = self.next_txid();
        self.nodes[index].mempool.insert(txid.clone());
        txid
    }
}

/// Shared handle on the simulated network.
#[derive(Debug, Clone)]
pub struct MockNetwork {
    state: Arc<Mutex<State>>,
}

impl MockNetwork {
    /// `count` unconnected nodes at height 0.
    pub fn new(count: usize) -> Self {
        let state = State {
            nodes: (0..count).map(|_| MockNode::default()).collect(),
            handshake_polls: 1,
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn rpc(&self, index: usize) -> MockRpc {
        MockRpc {
            net: self.clone(),
            index,
        }
    }

    pub fn p2p_addr(index: usize) -> String {
        let offset = u16::try_from(index).unwrap_or(u16::MAX - P2P_BASE);
        format!("127.0.0.1:{}", P2P_BASE + offset)
    }

    pub fn height(&self, index: usize) -> u64 {
        self.state.lock().nodes[index].height
    }

    pub fn set_height(&self, index: usize, height: u64) {
        self.state.lock().nodes[index].height = height;
    }

    pub fn mempool(&self, index: usize) -> BTreeSet<String> {
        self.state.lock().nodes[index].mempool.clone()
    }

    /// Credit `address` (owned by node `index`) with a confirmed output.
    pub fn fund(&self, index: usize, address: &str, amount: Amount) -> Utxo {
        let mut state = self.state.lock();
        let txid = state.next_txid();
        let utxo = Utxo {
            txid,
            vout: 0,
            address: address.to_string(),
            amount,
            confirmations: 6,
        };
        state.owners.insert(address.to_string(), index);
        state.nodes[index].utxos.push(utxo.clone());
        utxo
    }

    pub fn utxos(&self, index: usize) -> Vec<Utxo> {
        self.state.lock().nodes[index].utxos.clone()
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.state.lock().sent.clone()
    }

    /// Make every call of `method` fail with a daemon fault.
    pub fn fail(&self, method: &str, code: i64, message: &str) {
        self.state
            .lock()
            .failures
            .insert(method.to_string(), (code, message.to_string()));
    }

    pub fn mark_invalid(&self, txid: &str) {
        self.state.lock().invalid.insert(txid.to_string());
    }

    pub fn set_balance(&self, address: &str, property: u32, balance: Amount, reserved: Amount) {
        self.state
            .lock()
            .balances
            .insert((address.to_string(), property), (balance, reserved));
    }

    /// Offers selling `property`; a `propertyiddesired` field lets lookups
    /// filter by the desired property.
    pub fn set_orderbook(&self, property: u32, offers: Vec<Value>) {
        self.state.lock().orderbooks.insert(property, offers);
    }

    pub fn set_active_dex_sells(&self, offers: Vec<Value>) {
        self.state.lock().dex_sells = offers;
    }

    pub fn set_handshake_polls(&self, polls: u32) {
        self.state.lock().handshake_polls = polls;
    }

    /// Simulate a crashed process.
    pub fn kill(&self, index: usize) {
        self.state.lock().nodes[index].stopped = true;
    }

    pub fn links(&self) -> Vec<(usize, usize)> {
        self.state.lock().links.keys().copied().collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, m, _)| m == method)
            .count()
    }

    pub fn last_params(&self, method: &str) -> Option<Vec<Value>> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find(|(_, m, _)| m == method)
            .map(|(_, _, p)| p.clone())
    }

    fn handle(&self, index: usize, method: &str, params: &[Value]) -> Result<Value> {
        let mut state = self.state.lock();
        if state.nodes.get(index).map_or(true, |n| n.stopped) {
            return Err(Error::Transport(format!("{method} on mock{index}: connection refused")));
        }
        state.calls.push((index, method.to_string(), params.to_vec()));
        if let Some((code, message)) = state.failures.get(method).cloned() {
            return Err(rpc_error(method, code, &message));
        }

        match method {
            "getblockcount" => {
                let tip = state
                    .component(index)
                    .iter()
                    .map(|&i| state.nodes[i].height)
                    .max()
                    .unwrap_or(0);
                let node = &mut state.nodes[index];
                let height = node.height;
                if node.height < tip {
                    node.height += 1;
                }
                Ok(json!(height))
            }
            "getrawmempool" => {
                let current: Vec<String> = state.nodes[index].mempool.iter().cloned().collect();
                let merged: BTreeSet<String> = state
                    .component(index)
                    .iter()
                    .flat_map(|&i| state.nodes[i].mempool.iter().cloned())
                    .filter(|txid| !state.confirmed.contains(txid))
                    .collect();
                state.nodes[index].mempool = merged;
                Ok(json!(current))
            }
            "getnewaddress" => {
                let node = &mut state.nodes[index];
                node.next_address += 1;
                let address = format!("mock{index}addr{}", node.next_address);
                state.owners.insert(address.clone(), index);
                Ok(json!(address))
            }
            "listunspent" => {
                let min = param_u64(method, params, 0)?;
                let max = param_u64(method, params, 1)?;
                let filter: Vec<String> = match params.get(2) {
                    Some(v) => serde_json::from_value(v.clone())?,
                    None => Vec::new(),
                };
                let mut out = Vec::new();
                for u in &state.nodes[index].utxos {
                    if u.confirmations < min || u.confirmations > max {
                        continue;
                    }
                    if !filter.is_empty() && !filter.contains(&u.address) {
                        continue;
                    }
                    out.push(json!({
                        "txid": u.txid,
                        "vout": u.vout,
                        "address": u.address,
                        "amount": u.amount.to_json()?,
                        "confirmations": u.confirmations,
                    }));
                }
                Ok(Value::Array(out))
            }
            "createrawtransaction" => {
                let inputs = params
                    .first()
                    .and_then(Value::as_array)
                    .ok_or_else(|| rpc_error(method, -1, "missing inputs"))?
                    .iter()
                    .map(|i| {
                        let txid = i["txid"].as_str().unwrap_or_default().to_string();
                        let vout = i["vout"].as_u64().unwrap_or_default();
                        (txid, u32::try_from(vout).unwrap_or(u32::MAX))
                    })
                    .collect();
                let mut outputs = BTreeMap::new();
                let map = params
                    .get(1)
                    .and_then(Value::as_object)
                    .ok_or_else(|| rpc_error(method, -1, "missing outputs"))?;
                for (address, value) in map {
                    let amount = Amount::from_json(value)?;
                    if amount.is_negative() {
                        return Err(rpc_error(method, -3, "Invalid amount"));
                    }
                    outputs.insert(address.clone(), amount);
                }
                state.next_id += 1;
                let hex = format!("raw{:04}", state.next_id);
                state.raw.insert(hex.clone(), RawTx { inputs, outputs });
                Ok(json!(hex))
            }
            "signrawtransaction" => {
                let hex = param_str(method, params, 0)?;
                if !state.raw.contains_key(&hex) {
                    return Err(rpc_error(method, -22, "TX decode failed"));
                }
                Ok(json!({ "hex": format!("signed-{hex}"), "complete": true }))
            }
            "sendrawtransaction" => {
                let hex = param_str(method, params, 0)?;
                let allow_high_fees = params.get(1).and_then(Value::as_bool).unwrap_or(false);
                let raw = hex
                    .strip_prefix("signed-")
                    .and_then(|h| state.raw.remove(h))
                    .ok_or_else(|| rpc_error(method, -22, "TX decode failed"))?;

                let wallet = &state.nodes[index].utxos;
                let mut spent = Vec::new();
                for (txid, vout) in &raw.inputs {
                    let utxo = wallet
                        .iter()
                        .find(|u| &u.txid == txid && u.vout == *vout)
                        .ok_or_else(|| rpc_error(method, -25, "Missing inputs"))?;
                    spent.push(utxo.clone());
                }
                state.nodes[index]
                    .utxos
                    .retain(|u| !spent.iter().any(|s| s.txid == u.txid && s.vout == u.vout));

                let txid = state.submit(index);
                for (vout, (address, amount)) in raw.outputs.iter().enumerate() {
                    if let Some(&owner) = state.owners.get(address) {
                        state.nodes[owner].utxos.push(Utxo {
                            txid: txid.clone(),
                            vout: u32::try_from(vout).unwrap_or(u32::MAX),
                            address: address.clone(),
                            amount: *amount,
                            confirmations: 0,
                        });
                    }
                }
                state.sent.push(SentTx {
                    node: index,
                    txid: txid.clone(),
                    inputs: spent,
                    outputs: raw.outputs,
                    allow_high_fees,
                });
                Ok(json!(txid))
            }
            "generate" | "setgenerate" => {
                let count = if method == "generate" {
                    param_u64(method, params, 0)?
                } else {
                    param_u64(method, params, 1)?
                };
                let mined = std::mem::take(&mut state.nodes[index].mempool);
                state.nodes[index].height += count;
                for node in &mut state.nodes {
                    for u in &mut node.utxos {
                        if u.confirmations > 0 {
                            u.confirmations += count;
                        } else if mined.contains(&u.txid) {
                            u.confirmations = count;
                        }
                    }
                }
                state.confirmed.extend(mined);
                if method == "generate" {
                    let hashes: Vec<String> = (0..count).map(|_| state.next_txid()).collect();
                    Ok(json!(hashes))
                } else {
                    Ok(Value::Null)
                }
            }
            "addnode" => {
                let addr = param_str(method, params, 0)?;
                let mode = param_str(method, params, 1)?;
                let target = state
                    .index_of_addr(&addr)
                    .ok_or_else(|| rpc_error(method, -24, "Node not found"))?;
                if mode != "remove"
                    && target != index
                    && !state.links.contains_key(&(index, target))
                    && !state.links.contains_key(&(target, index))
                {
                    let polls = state.handshake_polls;
                    state.links.insert((index, target), polls);
                }
                Ok(Value::Null)
            }
            "disconnectnode" => {
                let addr = param_str(method, params, 0)?;
                let target = state.index_of_addr(&addr);
                match target.and_then(|t| state.links.remove(&(index, t))) {
                    Some(_) => Ok(Value::Null),
                    None => Err(rpc_error(method, -29, "Node not found in connected nodes")),
                }
            }
            "getpeerinfo" => {
                let mut peers = Vec::new();
                for (&(dialer, target), pending) in &mut state.links {
                    let (addr, inbound) = if dialer == index {
                        (Self::p2p_addr(target), false)
                    } else if target == index {
                        let port = INBOUND_PORT_BASE + u16::try_from(dialer).unwrap_or(0);
                        (format!("127.0.0.1:{port}"), true)
                    } else {
                        continue;
                    };
                    let version = if *pending > 0 { 0 } else { PROTOCOL_VERSION };
                    *pending = pending.saturating_sub(1);
                    peers.push(json!({ "addr": addr, "version": version, "inbound": inbound }));
                }
                Ok(Value::Array(peers))
            }
            "addmultisigaddress" => {
                let required = param_u64(method, params, 0)?;
                let node = &mut state.nodes[index];
                node.next_address += 1;
                let address = format!("2Nmock{index}multi{required}of{}", node.next_address);
                state.owners.insert(address.clone(), index);
                Ok(json!(address))
            }
            "getrawtransaction" => {
                let txid = param_str(method, params, 0)?;
                Ok(json!(format!("rawtx-{txid}")))
            }
            "stop" => {
                state.nodes[index].stopped = true;
                Ok(json!("stopping"))
            }
            "omni_getbalance" | "getbalance_MP" => {
                let address = param_str(method, params, 0)?;
                let property = u32::try_from(param_u64(method, params, 1)?).unwrap_or(u32::MAX);
                let (balance, reserved) = state
                    .balances
                    .get(&(address, property))
                    .copied()
                    .ok_or_else(|| rpc_error(method, -8, "Property identifier does not exist"))?;
                Ok(json!({
                    "balance": balance.to_string(),
                    "reserved": reserved.to_string(),
                }))
            }
            "omni_send" | "send_MP" | "omni_sendsto" | "sendtoowners_MP" | "omni_sendtrade"
            | "trade_MP" | "omni_sendrawtx" | "sendrawtx_MP" => Ok(json!(state.submit(index))),
            "omni_gettransaction" | "gettransaction_MP" => {
                let txid = param_str(method, params, 0)?;
                let valid = !state.invalid.contains(&txid);
                let confirmations = u64::from(state.confirmed.contains(&txid));
                Ok(json!({
                    "txid": txid,
                    "valid": valid,
                    "invalidreason": (!valid).then_some("rejected by mock"),
                    "confirmations": confirmations,
                }))
            }
            "omni_getorderbook" | "getorderbook_MP" => {
                let property = u32::try_from(param_u64(method, params, 0)?).unwrap_or(u32::MAX);
                let desired = params.get(1).and_then(Value::as_u64);
                let offers: Vec<Value> = state
                    .orderbooks
                    .get(&property)
                    .into_iter()
                    .flatten()
                    .filter(|offer| {
                        desired.map_or(true, |d| offer["propertyiddesired"].as_u64() == Some(d))
                    })
                    .cloned()
                    .collect();
                Ok(json!(offers))
            }
            "omni_getactivedexsells" | "getactivedexsells_MP" => Ok(json!(state.dex_sells)),
            _ => Err(rpc_error(method, -32601, "Method not found")),
        }
    }
}

impl NodeSet for MockNetwork {
    type Rpc = MockRpc;

    fn indices(&self) -> Vec<usize> {
        (0..self.state.lock().nodes.len()).collect()
    }

    fn endpoint(&self, index: usize) -> Result<PeerEndpoint<MockRpc>> {
        let state = self.state.lock();
        match state.nodes.get(index) {
            None => Err(Error::Setup(format!("Node {index} is not running"))),
            Some(node) if node.stopped => Err(Error::NodeExited {
                index,
                status: "killed".to_string(),
            }),
            Some(_) => Ok(PeerEndpoint {
                index,
                rpc: self.rpc(index),
                p2p_addr: Self::p2p_addr(index),
            }),
        }
    }
}

/// RPC connection to one mock node.
#[derive(Debug, Clone)]
pub struct MockRpc {
    net: MockNetwork,
    index: usize,
}

impl NodeRpc for MockRpc {
    fn label(&self) -> String {
        format!("mock{}", self.index)
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        self.net.handle(self.index, method, &params)
    }
}

fn rpc_error(method: &str, code: i64, message: &str) -> Error {
    Error::Rpc {
        method: method.to_string(),
        code,
        message: message.to_string(),
    }
}

fn param_str(method: &str, params: &[Value], i: usize) -> Result<String> {
    params
        .get(i)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| rpc_error(method, -1, "expected string parameter"))
}

fn param_u64(method: &str, params: &[Value], i: usize) -> Result<u64> {
    params
        .get(i)
        .and_then(Value::as_u64)
        .ok_or_else(|| rpc_error(method, -1, "expected integer parameter"))
}
