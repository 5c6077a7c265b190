//! E2E tests against real regtest daemons.
//!
//! Every test here spawns daemon processes and is ignored by default. Point
//! `REGNET_DAEMON` at a daemon binary and run with `--ignored`:
//!
//! ```text
//! REGNET_DAEMON=/path/to/omnicored cargo test --test e2e -- --ignored
//! ```
//!
//! Set `REGNET_FLAVOR=mastercore` for daemons with the `*_MP` method names.

mod harness;

#[cfg(test)]
mod integration_tests;

pub use harness::TestNetwork;
