//! Window planning and fire-and-forget worker dispatch.
//!
//! The orchestrator never tracks worker outcomes. It recomputes the
//! unprocessed-shard listing, tiles it into fixed-size windows, and launches
//! one job per window. Workers that die mid-window leave their shards
//! unmarked, so the next reconcile simply schedules them again.

use crate::embed::{list_unprocessed_shards, EmbedConfig};
use futures_util::future;
use paperflow_core::{Error, JobLauncher, ObjectStore, Result};
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variables carrying the (offset, count) window to a worker
/// process.
pub const ENV_SHARD_OFFSET: &str = "PAPERFLOW_SHARD_OFFSET";
pub const ENV_SHARDS_PER_JOB: &str = "PAPERFLOW_SHARDS_PER_JOB";

/// Tile `total` shards into `(offset, count)` windows of at most `per_job`.
/// Windows cover [0, total) exactly once; the last window may be short.
pub fn invocation_windows(total: usize, per_job: usize) -> Vec<(usize, usize)> {
    let per_job = per_job.max(1);
    let mut windows = Vec::new();
    let mut offset = 0;
    while offset < total {
        windows.push((offset, per_job.min(total - offset)));
        offset += per_job;
    }
    windows
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorConfig {
    pub shards_per_job: usize,
    /// Launches dispatched between cooldowns.
    pub dispatch_batch: usize,
    #[serde(skip)]
    pub cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            shards_per_job: 10,
            dispatch_batch: 20,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileStats {
    pub unprocessed_shards: usize,
    pub jobs_launched: usize,
    pub jobs_failed: usize,
}

pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    launcher: Arc<dyn JobLauncher>,
    embed_cfg: EmbedConfig,
    cfg: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        launcher: Arc<dyn JobLauncher>,
        embed_cfg: EmbedConfig,
        cfg: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            launcher,
            embed_cfg,
            cfg,
        }
    }

    /// One reconcile pass: list what is left, plan windows, launch a job per
    /// window. Launch failures are logged and counted, not retried here; the
    /// affected windows stay unprocessed and the next pass picks them up.
    pub async fn reconcile(&self) -> Result<ReconcileStats> {
        let unprocessed =
            list_unprocessed_shards(self.store.as_ref(), &self.embed_cfg).await?;
        let windows = invocation_windows(unprocessed.len(), self.cfg.shards_per_job);
        info!(
            unprocessed = unprocessed.len(),
            jobs = windows.len(),
            shards_per_job = self.cfg.shards_per_job,
            "launch plan computed"
        );

        let mut stats = ReconcileStats {
            unprocessed_shards: unprocessed.len(),
            ..ReconcileStats::default()
        };
        for (i, batch) in windows.chunks(self.cfg.dispatch_batch.max(1)).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.cfg.cooldown).await;
            }
            let launches = batch
                .iter()
                .map(|&(offset, count)| self.launcher.launch(offset, count));
            for (result, &(offset, _)) in future::join_all(launches).await.iter().zip(batch) {
                match result {
                    Ok(()) => stats.jobs_launched += 1,
                    Err(e) => {
                        warn!(offset, error = %e, "job launch failed");
                        stats.jobs_failed += 1;
                    }
                }
            }
        }
        info!(
            jobs_launched = stats.jobs_launched,
            jobs_failed = stats.jobs_failed,
            "reconcile pass complete"
        );
        Ok(stats)
    }
}

/// Launches a worker as a detached child process carrying its window through
/// the environment. The child is never awaited; its shards are reconciled by
/// listing, not by exit status.
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

#[async_trait::async_trait]
impl JobLauncher for ProcessLauncher {
    async fn launch(&self, offset: usize, count: usize) -> Result<()> {
        tokio::process::Command::new(&self.program)
            .args(&self.args)
            .env(ENV_SHARD_OFFSET, offset.to_string())
            .env(ENV_SHARDS_PER_JOB, count.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {e}", self.program)))?;
        Ok(())
    }
}
