//! Bulk transform: every record of a sharded gzip corpus through the
//! normalizer and into the papers table.
//!
//! Embarrassingly parallel, record-at-a-time; no ordering guarantee between
//! records or shards. Malformed lines are logged and skipped. Everything else
//! (unreachable store, corrupt archive, sink/schema failure) is fatal and
//! propagates: re-running the whole pipeline on the same input is the
//! recovery mechanism, and re-runs append duplicate rows by design.

use crate::normalize::{id_fragment, normalize_value, RejectReason};
use flate2::read::GzDecoder;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use paperflow_core::{CanonicalPaper, Error, ObjectStore, PaperSink, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Input shards are gzip-compressed newline-delimited JSON.
pub const SHARD_SUFFIX: &str = ".json.gz";

#[derive(Debug, Clone, Serialize)]
pub struct TransformConfig {
    /// Store prefix holding the raw corpus shards.
    pub input_prefix: String,
    /// Bound on concurrently processed shards.
    pub worker_concurrency: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            input_prefix: "works/".to_string(),
            worker_concurrency: 8,
        }
    }
}

/// Outcome counters for one transform run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransformStats {
    pub shards: usize,
    pub records_in: u64,
    pub accepted: u64,
    pub rejected: BTreeMap<&'static str, u64>,
}

impl TransformStats {
    fn absorb(&mut self, other: &TransformStats) {
        self.shards += other.shards;
        self.records_in += other.records_in;
        self.accepted += other.accepted;
        for (reason, n) in &other.rejected {
            *self.rejected.entry(reason).or_insert(0) += n;
        }
    }
}

/// Run the bulk transform over every `.json.gz` shard under
/// `cfg.input_prefix`, appending accepted papers to `sink`.
pub async fn run_transform(
    store: Arc<dyn ObjectStore>,
    sink: Arc<dyn PaperSink>,
    cfg: &TransformConfig,
) -> Result<TransformStats> {
    let keys: Vec<String> = store
        .list(&cfg.input_prefix)
        .await?
        .into_iter()
        .filter(|k| k.ends_with(SHARD_SUFFIX))
        .collect();
    info!(
        shards = keys.len(),
        prefix = %cfg.input_prefix,
        "starting bulk transform"
    );

    let stats = stream::iter(keys.into_iter().map(|key| {
        let store = Arc::clone(&store);
        let sink = Arc::clone(&sink);
        async move { transform_shard(store.as_ref(), sink.as_ref(), &key).await }
    }))
    .buffer_unordered(cfg.worker_concurrency.max(1))
    .try_fold(TransformStats::default(), |mut acc, shard| async move {
        acc.absorb(&shard);
        Ok(acc)
    })
    .await?;

    info!(
        shards = stats.shards,
        records_in = stats.records_in,
        accepted = stats.accepted,
        "bulk transform complete"
    );
    Ok(stats)
}

async fn transform_shard(
    store: &dyn ObjectStore,
    sink: &dyn PaperSink,
    key: &str,
) -> Result<TransformStats> {
    let bytes = store.get(key).await?;
    let shard_key = key.to_string();
    let (papers, stats) =
        tokio::task::spawn_blocking(move || normalize_shard_bytes(&shard_key, &bytes))
            .await
            .map_err(|e| Error::Decode(format!("transform join failed: {e}")))??;
    if !papers.is_empty() {
        sink.append(&papers).await?;
    }
    debug!(shard = %key, accepted = stats.accepted, "shard transformed");
    Ok(stats)
}

fn normalize_shard_bytes(
    key: &str,
    bytes: &[u8],
) -> Result<(Vec<CanonicalPaper>, TransformStats)> {
    let mut papers = Vec::new();
    let mut stats = TransformStats {
        shards: 1,
        ..TransformStats::default()
    };

    let reader = BufReader::new(GzDecoder::new(bytes));
    for line in reader.lines() {
        // An unreadable archive (not a bad record) is fatal for the run.
        let line = line.map_err(|e| Error::Decode(format!("{key}: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        stats.records_in += 1;

        let parsed: std::result::Result<Value, _> = serde_json::from_str(&line);
        let outcome = match &parsed {
            Ok(v) => normalize_value(v),
            Err(_) => Err(RejectReason::MalformedJson),
        };
        match outcome {
            Ok(paper) => {
                papers.push(paper);
                stats.accepted += 1;
            }
            Err(reason) => {
                let id = parsed.as_ref().map(|v| id_fragment(v)).unwrap_or("<unparsed>");
                warn!(shard = %key, reason = reason.as_str(), id = %id, "record rejected");
                *stats.rejected.entry(reason.as_str()).or_insert(0) += 1;
            }
        }
    }
    Ok((papers, stats))
}
