//! HTTP JSON-RPC client for a single daemon.

use super::NodeRpc;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Error object of a JSON-RPC response.
#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// JSON-RPC 1.0 response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// JSON-RPC client bound to one daemon endpoint.
///
/// Cloning is cheap and clones share the connection pool.
#[derive(Debug, Clone)]
pub struct RpcClient {
    label: String,
    url: String,
    user: String,
    password: String,
    http: reqwest::Client,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    /// Create a client for `http://127.0.0.1:<port>`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Setup` if the HTTP client cannot be constructed.
    pub fn new(
        label: impl Into<String>,
        port: u16,
        user: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("regnet-harness/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Setup(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            label: label.into(),
            url: format!("http://127.0.0.1:{port}"),
            user: user.to_string(),
            password: password.to_string(),
            http,
            next_id: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl NodeRpc for RpcClient {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!("{} -> {} {}", self.label, method, request["params"]);

        let response = self
            .http
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{method} on {}: {e}", self.label)))?;

        // Daemons answer RPC errors with HTTP 500 and a JSON body, so the
        // status alone does not tell transport failures from faults.
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("{method} on {}: {e}", self.label)))?;

        let decoded: RpcResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                Error::Serialization(format!("{method} on {}: {e}", self.label))
            } else {
                Error::Transport(format!(
                    "{method} on {} returned {status}: {}",
                    self.label,
                    body.trim()
                ))
            }
        })?;

        if let Some(err) = decoded.error {
            trace!("{} <- {} error {} {}", self.label, method, err.code, err.message);
            return Err(Error::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        trace!("{} <- {} {}", self.label, method, decoded.result);
        Ok(decoded.result)
    }
}
