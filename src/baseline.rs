//! Baseline chain cache.
//!
//! A set of `node<i>` data directories holding a short pre-mined chain is
//! built once and then copied (never mutated) into every run directory, so
//! concurrent runs can share it.

use crate::barrier::ConvergenceBarrier;
use crate::capability::{BlockGenerator, DaemonAdapter};
use crate::config::{BaselineConfig, HarnessConfig};
use crate::error::{Error, Result};
use crate::supervisor::{node_data_dir, port_pair, NodeSupervisor};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// File written last into a finished cache.
pub const COMPLETE_MARKER: &str = ".complete";

/// Whether `cache_dir` is a finished cache with data directories for nodes
/// `0..count`.
#[must_use]
pub fn is_complete(cache_dir: &Path, count: usize) -> bool {
    cache_dir.join(COMPLETE_MARKER).is_file()
        && (0..count).all(|i| node_data_dir(cache_dir, i).is_dir())
}

/// Remove the cache directory if present.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub async fn clear(cache_dir: &Path) -> Result<()> {
    if cache_dir.exists() {
        info!("Clearing baseline cache {}", cache_dir.display());
        tokio::fs::remove_dir_all(cache_dir).await?;
    }
    Ok(())
}

/// Sibling directory a process builds into before publishing the cache.
fn staging_dir(cache_dir: &Path) -> PathBuf {
    let mut name = cache_dir
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".build-{}", std::process::id()));
    cache_dir.with_file_name(name)
}

/// Build the cache for `config.node_count` nodes unless it already exists.
///
/// Node 0 mines the baseline chain; the others start connected to it and
/// are awaited before everything is stopped and run-specific files are
/// stripped. The build happens in a per-process staging directory that is
/// marked complete and renamed into place, so an interrupted build is never
/// mistaken for a cache and concurrent builders never touch each other's
/// data.
///
/// # Errors
///
/// Returns `Error::Setup` or the underlying failure if the cache cannot be
/// built.
pub async fn ensure(config: &HarnessConfig) -> Result<PathBuf> {
    let cache_dir = config.baseline.cache_dir.clone();
    if is_complete(&cache_dir, config.node_count) {
        debug!("Using baseline cache {}", cache_dir.display());
        return Ok(cache_dir);
    }

    let mut supervisor = NodeSupervisor::new(config.supervisor.clone())?;
    let staging = staging_dir(&cache_dir);
    info!(
        "Building baseline cache for {} node(s) in {}",
        config.node_count,
        staging.display()
    );
    clear(&staging).await?;
    tokio::fs::create_dir_all(&staging).await?;

    let built = build(config, &staging, &mut supervisor).await;
    let stopped = supervisor.stop_all().await;
    let finished = match built.and(stopped) {
        Ok(()) => finish(config, &staging).await,
        Err(e) => Err(e),
    };
    if let Err(e) = finished {
        warn!("Baseline build failed, discarding {}", staging.display());
        if let Err(clear_err) = clear(&staging).await {
            warn!("Failed to remove partial cache: {}", clear_err);
        }
        return Err(e);
    }

    publish(&staging, &cache_dir, config.node_count).await?;
    Ok(cache_dir)
}

async fn finish(config: &HarnessConfig, staging: &Path) -> Result<()> {
    for index in 0..config.node_count {
        strip_volatile(&node_data_dir(staging, index), &config.baseline).await?;
    }
    tokio::fs::write(staging.join(COMPLETE_MARKER), config.node_count.to_string()).await?;
    Ok(())
}

/// Move a finished staging directory to `cache_dir`.
///
/// A complete cache published by another process in the meantime wins and
/// the staging copy is dropped. An incomplete leftover is replaced.
async fn publish(staging: &Path, cache_dir: &Path, count: usize) -> Result<()> {
    if cache_dir.exists() && !is_complete(cache_dir, count) {
        clear(cache_dir).await?;
    }
    match tokio::fs::rename(staging, cache_dir).await {
        Ok(()) => {
            info!("Published baseline cache {}", cache_dir.display());
            Ok(())
        }
        Err(_) if is_complete(cache_dir, count) => {
            debug!("Baseline cache {} built concurrently", cache_dir.display());
            clear(staging).await
        }
        Err(e) => {
            if let Err(clear_err) = clear(staging).await {
                warn!("Failed to remove staging cache: {}", clear_err);
            }
            Err(Error::Setup(format!(
                "cannot publish baseline cache {}: {e}",
                cache_dir.display()
            )))
        }
    }
}

async fn build(
    config: &HarnessConfig,
    cache_dir: &Path,
    supervisor: &mut NodeSupervisor,
) -> Result<()> {
    let seed = port_pair(&config.supervisor, 0)?;
    let connect = vec![format!("-connect=127.0.0.1:{}", seed.p2p)];

    supervisor.start(0, &node_data_dir(cache_dir, 0), &[]).await?;
    for index in 1..config.node_count {
        supervisor
            .start(index, &node_data_dir(cache_dir, index), &connect)
            .await?;
    }

    let miner = DaemonAdapter::new(supervisor.rpc(0)?, config.flavor);
    miner.generate_blocks(config.baseline.block_count).await?;

    let indices: Vec<usize> = (0..config.node_count).collect();
    let rpcs = supervisor.rpcs(&indices)?;
    let height = ConvergenceBarrier::new(config.convergence.clone())
        .await_blocks(&rpcs)
        .await?;
    info!("Baseline chain mined to height {height}");
    Ok(())
}

/// Delete logs, peer lists and token-layer state from a cached node.
///
/// # Errors
///
/// Returns an error if an existing entry cannot be removed.
pub async fn strip_volatile(node_dir: &Path, config: &BaselineConfig) -> Result<()> {
    let regtest = node_dir.join("regtest");
    for name in &config.volatile_files {
        let path = regtest.join(name);
        if path.is_file() {
            tokio::fs::remove_file(&path).await?;
        }
    }
    for name in &config.volatile_dirs {
        let path = regtest.join(name);
        if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await?;
        }
    }
    Ok(())
}

/// Copy cached `node<i>` directories for nodes `0..count` into `run_dir`.
///
/// # Errors
///
/// Returns `Error::Setup` if the cache is incomplete, or an I/O error.
pub async fn install(cache_dir: &Path, run_dir: &Path, count: usize) -> Result<()> {
    if !is_complete(cache_dir, count) {
        return Err(Error::Setup(format!(
            "baseline cache {} does not cover {count} node(s)",
            cache_dir.display()
        )));
    }
    for index in 0..count {
        let from = node_data_dir(cache_dir, index);
        let to = node_data_dir(run_dir, index);
        tokio::task::spawn_blocking(move || copy_dir_all(&from, &to))
            .await
            .map_err(|e| Error::Setup(format!("copy task failed: {e}")))??;
    }
    debug!("Installed baseline for {count} node(s) into {}", run_dir.display());
    Ok(())
}

fn copy_dir_all(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
