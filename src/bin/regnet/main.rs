//! regnet CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use regnet_harness::config::HarnessConfig;
use regnet_harness::runner::{Report, TestRunner};
use regnet_harness::scenarios::BuiltinScenario;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => HarnessConfig::default(),
    };
    apply_overrides(&mut config, &cli);

    let default_level = if config.quiet {
        "warn".to_string()
    } else {
        config.log_level.clone()
    };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level));
    if config.trace_rpc {
        filter = filter.add_directive("regnet_harness::rpc=trace".parse()?);
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    info!("regnet v{}", env!("CARGO_PKG_VERSION"));

    let scenarios = if cli.scenario.is_empty() {
        BuiltinScenario::ALL.to_vec()
    } else {
        cli.scenario
            .iter()
            .map(|name| name.parse())
            .collect::<regnet_harness::Result<Vec<BuiltinScenario>>>()?
    };

    let runner = TestRunner::new(config)?;
    let mut report = Report::new(true);
    let batch = runner.run_batch(&scenarios, &mut report).await;

    std::process::exit(batch.exit_code());
}

fn apply_overrides(config: &mut HarnessConfig, cli: &Cli) {
    config.baseline.clear_cache |= cli.clear_cache;
    config.no_cleanup |= cli.no_cleanup;
    config.supervisor.show_stdout |= cli.stdout;
    config.trace_rpc |= cli.trace_rpc;
    config.quiet |= cli.quiet;
    config.fail_hard |= cli.fail_hard;

    if let Some(level) = &cli.log_level {
        config.log_level.clone_from(level);
    }
    if let Some(daemon) = &cli.daemon {
        config.supervisor.daemon.clone_from(daemon);
    }
    if !cli.search_path.is_empty() {
        config.supervisor.search_path.clone_from(&cli.search_path);
    }
    if let Some(dir) = &cli.tmp_dir {
        config.tmp_dir = Some(dir.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config.baseline.cache_dir.clone_from(dir);
    }
    if let Some(count) = cli.nodes {
        config.node_count = count;
    }
    if let Some(flavor) = cli.flavor {
        config.flavor = flavor.into();
    }
}
