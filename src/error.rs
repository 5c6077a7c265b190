//! Error types for regnet-harness.

use crate::amount::Amount;
use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a regtest network.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Fatal setup error (bad binary path, spawn failure, liveness timeout).
    #[error("setup failed: {0}")]
    Setup(String),

    /// A daemon process exited while the scenario still depended on it.
    #[error("node {index} exited unexpectedly: {status}")]
    NodeExited {
        /// Index of the node whose process died.
        index: usize,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// A convergence barrier ran out of retries.
    #[error("nodes did not converge on {what} after {attempts} attempts: {observed}")]
    ConvergenceTimeout {
        /// What was being compared (block heights, mempools).
        what: &'static str,
        /// Number of polling attempts made.
        attempts: u32,
        /// Last observed per-node values.
        observed: String,
    },

    /// Invalid topology transition or failed peer handshake.
    #[error("topology error: {0}")]
    Topology(String),

    /// The remote daemon answered with a JSON-RPC error.
    #[error("RPC error {code} in {method}: {message}")]
    Rpc {
        /// Method that was called.
        method: String,
        /// JSON-RPC error code.
        code: i64,
        /// Error message reported by the daemon.
        message: String,
    },

    /// HTTP transport failure while talking to a daemon.
    #[error("transport error: {0}")]
    Transport(String),

    /// Harness-observed value mismatch.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Unspent outputs do not cover the requested payment.
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds {
        /// Amount plus fee.
        need: Amount,
        /// Sum of the selected unspent outputs.
        have: Amount,
    },

    /// A value could not be represented as an 8-decimal amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this error aborts the remaining steps of a scenario.
    ///
    /// Fatal errors describe a broken environment rather than a behaviour of
    /// the daemon under test, so continuing would only produce noise.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Setup(_)
                | Self::NodeExited { .. }
                | Self::ConvergenceTimeout { .. }
                | Self::Topology(_)
                | Self::Transport(_)
                | Self::Io(_)
        )
    }

    /// Whether this is a fault reported by the daemon itself.
    #[must_use]
    pub fn is_rpc_fault(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }

    /// The JSON-RPC error code, if this is a daemon fault.
    #[must_use]
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
