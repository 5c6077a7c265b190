//! Scenario execution.
//!
//! [`TestRunner`] owns a whole run: it prepares a fresh directory from the
//! baseline cache, starts the nodes, links them as a chain, hands a
//! [`ScenarioContext`] to the scenario and tears everything down again.
//! [`drive`] is the part that needs nothing but a [`NodeSet`], so scenarios
//! can also be driven against an already running network.

mod context;
mod report;

pub use context::ScenarioContext;
pub use report::{BatchReport, Report, ScenarioStatus};

use crate::baseline;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::supervisor::{NodeSet, NodeSupervisor};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// File written into each run directory describing the running nodes.
pub const MANIFEST_FILE: &str = "manifest.json";

/// A named test body.
#[allow(async_fn_in_trait)]
pub trait Scenario {
    /// Name shown in result lines and the batch summary.
    fn name(&self) -> &str;

    /// Run the steps against a connected network.
    ///
    /// Returning an error aborts the scenario as failed. Step outcomes that
    /// should not abort go through [`ScenarioContext::record`].
    async fn run<N: NodeSet>(&self, ctx: &mut ScenarioContext<'_, N>) -> Result<()>;
}

/// Link `nodes` as a chain and run `scenario` against them.
///
/// The returned status is `Failed` if the scenario aborted or recorded an
/// unexpected failure.
pub async fn drive<N: NodeSet, S: Scenario>(
    nodes: &N,
    config: &HarnessConfig,
    scenario: &S,
    report: &mut Report,
) -> ScenarioStatus {
    let name = scenario.name().to_string();
    info!("Running {name}");

    let mut ctx = ScenarioContext::new(nodes, config, report);
    let outcome = match ctx.connect_chain().await {
        Ok(()) => scenario.run(&mut ctx).await,
        Err(e) => Err(e),
    };

    let successful = match outcome {
        Ok(()) => ctx.is_successful(),
        Err(e) => {
            error!("{name} aborted: {e}");
            ctx.line(format!("{name} aborted: {e}"));
            false
        }
    };

    let status = if successful {
        ScenarioStatus::Successful
    } else {
        ScenarioStatus::Failed
    };
    ctx.line(format!("{name} ... {status}"));
    status
}

/// Runs scenarios against freshly started networks.
pub struct TestRunner {
    config: HarnessConfig,
}

impl TestRunner {
    /// Create a runner.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runner configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    fn new_run_dir(&self) -> PathBuf {
        let suffix: u64 = rand::thread_rng().gen();
        self.config
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("regnet_{suffix:x}"))
    }

    /// Run one scenario on a new network.
    ///
    /// The run directory is removed afterwards if the scenario succeeded and
    /// cleanup is enabled; otherwise it is left for inspection.
    ///
    /// # Errors
    ///
    /// Returns setup errors (baseline, spawn, liveness). Scenario failures
    /// are reported through the status instead.
    pub async fn run_scenario<S: Scenario>(
        &self,
        scenario: &S,
        report: &mut Report,
    ) -> Result<ScenarioStatus> {
        let run_dir = self.new_run_dir();
        info!("Run directory for {}: {}", scenario.name(), run_dir.display());
        tokio::fs::create_dir_all(&run_dir).await?;

        let cache_dir = baseline::ensure(&self.config).await?;
        baseline::install(&cache_dir, &run_dir, self.config.node_count).await?;

        let mut supervisor = NodeSupervisor::new(self.config.supervisor.clone())?;
        let outcome = self
            .run_on(&mut supervisor, &run_dir, scenario, report)
            .await;
        if let Err(e) = supervisor.stop_all().await {
            warn!("Error stopping nodes: {}", e);
        }
        let status = outcome?;

        if status == ScenarioStatus::Successful && !self.config.no_cleanup {
            if let Err(e) = tokio::fs::remove_dir_all(&run_dir).await {
                warn!("Failed to clean up {}: {}", run_dir.display(), e);
            }
        } else {
            info!("Leaving {} in place", run_dir.display());
        }
        Ok(status)
    }

    async fn run_on<S: Scenario>(
        &self,
        supervisor: &mut NodeSupervisor,
        run_dir: &Path,
        scenario: &S,
        report: &mut Report,
    ) -> Result<ScenarioStatus> {
        supervisor
            .start_all(self.config.node_count, run_dir)
            .await?;

        let manifest = serde_json::to_string_pretty(&supervisor.manifest())?;
        tokio::fs::write(run_dir.join(MANIFEST_FILE), manifest).await?;

        Ok(drive(&*supervisor, &self.config, scenario, report).await)
    }

    /// Run `scenarios` in order and append the summary to `report`.
    ///
    /// A setup failure skips everything after it, as does any failure in
    /// fail-hard mode.
    pub async fn run_batch<S: Scenario>(&self, scenarios: &[S], report: &mut Report) -> BatchReport {
        let mut batch = BatchReport::default();
        let mut skip_rest = false;

        if self.config.baseline.clear_cache {
            if let Err(e) = baseline::clear(&self.config.baseline.cache_dir).await {
                error!("Could not clear baseline cache: {e}");
                report.line(format!("Clearing the baseline cache failed: {e}"));
                skip_rest = true;
            }
        }

        for scenario in scenarios {
            if skip_rest {
                batch.push(scenario.name(), ScenarioStatus::Skipped);
                continue;
            }
            let status = match self.run_scenario(scenario, report).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Setup for {} failed: {e}", scenario.name());
                    report.line(format!("{} ... failed: {e}", scenario.name()));
                    if e.is_fatal() {
                        skip_rest = true;
                    }
                    ScenarioStatus::Failed
                }
            };
            if status == ScenarioStatus::Failed && self.config.fail_hard {
                skip_rest = true;
            }
            batch.push(scenario.name(), status);
        }

        for line in batch.summary_lines() {
            report.line(line);
        }
        batch
    }
}
