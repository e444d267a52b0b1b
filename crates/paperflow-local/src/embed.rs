//! Embedding extraction over the sharded corpus with a completion-marker
//! ledger.
//!
//! Each input shard maps to at most one parquet output and exactly one marker
//! object once processed. The marker is written strictly after the data file,
//! so a crash between the two leaves the shard unmarked and it is simply
//! redone on the next pass. Progress is recomputed from the two listings on
//! every run; there is no separate job state.

use crate::encode::encode_all;
use crate::normalize::normalize_value;
use arrow::array::{ArrayRef, Float32Builder, ListBuilder, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use flate2::read::GzDecoder;
use futures_util::stream::{self, StreamExt};
use paperflow_core::{
    EmbeddingRecord, EncoderConfig, Error, ObjectStore, Result, SentenceEncoder,
};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::transform::SHARD_SUFFIX;

pub const MARKER_SUFFIX: &str = ".done";
pub const DATA_SUFFIX: &str = ".parquet";

#[derive(Debug, Clone, Serialize)]
pub struct EmbedConfig {
    /// Store prefix holding the raw corpus shards.
    pub input_prefix: String,
    /// Store prefix receiving parquet embedding files.
    pub data_prefix: String,
    /// Store prefix holding per-shard completion markers.
    pub marker_prefix: String,
    /// Bound on concurrently processed shards within one worker.
    pub shard_concurrency: usize,
    pub encoder: EncoderConfig,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            input_prefix: "works/".to_string(),
            data_prefix: "embeddings/".to_string(),
            marker_prefix: "markers/".to_string(),
            shard_concurrency: 2,
            encoder: EncoderConfig::default(),
        }
    }
}

/// Outcome counters for one embedding window.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EmbedStats {
    pub shards_processed: usize,
    pub shards_empty: usize,
    pub shards_skipped: usize,
    pub records_embedded: u64,
}

/// Stable shard identity: the key's basename with the corpus suffix removed.
pub fn shard_id_from_key(key: &str) -> &str {
    let base = key.rsplit('/').next().unwrap_or(key);
    base.strip_suffix(SHARD_SUFFIX).unwrap_or(base)
}

/// Corpus shards with no corresponding completion marker, in the store's
/// lexicographic listing order. Recomputed fresh on every call; this listing
/// is the only progress state the pipeline has.
pub async fn list_unprocessed_shards(
    store: &dyn ObjectStore,
    cfg: &EmbedConfig,
) -> Result<Vec<String>> {
    let done: HashSet<String> = store
        .list(&cfg.marker_prefix)
        .await?
        .into_iter()
        .filter_map(|k| {
            let base = k.rsplit('/').next().unwrap_or(&k);
            base.strip_suffix(MARKER_SUFFIX).map(str::to_string)
        })
        .collect();
    let keys = store
        .list(&cfg.input_prefix)
        .await?
        .into_iter()
        .filter(|k| k.ends_with(SHARD_SUFFIX))
        .filter(|k| !done.contains(shard_id_from_key(k)))
        .collect();
    Ok(keys)
}

/// Pull the embeddable pairs out of one decompressed shard.
///
/// Every line goes through the same acceptance predicate as the papers-table
/// load, so the embedding store only ever holds DOIs the table can resolve.
/// Of the accepted records, only those with both a non-empty `doi` and a
/// non-empty abstract are embedded; everything else, including unparsable
/// lines, is silently irrelevant to this stage.
fn extract_pairs(key: &str, bytes: &[u8]) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let reader = BufReader::new(GzDecoder::new(bytes));
    for line in reader.lines() {
        let line = line.map_err(|e| Error::Decode(format!("{key}: {e}")))?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => {
                warn!(shard = %key, "skipping malformed line during extraction");
                continue;
            }
        };
        let Ok(paper) = normalize_value(&value) else {
            continue;
        };
        let Some(doi) = paper.doi.filter(|d| !d.is_empty()) else {
            continue;
        };
        if paper.abstract_text.is_empty() {
            continue;
        }
        pairs.push((doi, paper.abstract_text));
    }
    Ok(pairs)
}

fn embedding_schema() -> Schema {
    Schema::new(vec![
        Field::new("doi", DataType::Utf8, false),
        Field::new(
            "embedding",
            DataType::List(Arc::new(Field::new("item", DataType::Float32, true))),
            false,
        ),
    ])
}

fn records_to_parquet(records: &[EmbeddingRecord]) -> Result<Vec<u8>> {
    let dois = StringArray::from_iter_values(records.iter().map(|r| r.doi.as_str()));
    let mut vectors = ListBuilder::new(Float32Builder::new());
    for r in records {
        vectors.values().append_slice(&r.embedding);
        vectors.append(true);
    }
    let batch = RecordBatch::try_new(
        Arc::new(embedding_schema()),
        vec![Arc::new(dois) as ArrayRef, Arc::new(vectors.finish()) as ArrayRef],
    )
    .map_err(|e| Error::Sink(e.to_string()))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), Some(props))
        .map_err(|e| Error::Sink(e.to_string()))?;
    writer.write(&batch).map_err(|e| Error::Sink(e.to_string()))?;
    writer.close().map_err(|e| Error::Sink(e.to_string()))?;
    Ok(buf)
}

enum ShardOutcome {
    Embedded(usize),
    Empty,
}

/// Processes one window of the sorted unprocessed-shard list.
pub struct EmbedWorker {
    store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn SentenceEncoder>,
    cfg: EmbedConfig,
}

impl EmbedWorker {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        encoder: Arc<dyn SentenceEncoder>,
        cfg: EmbedConfig,
    ) -> Self {
        Self { store, encoder, cfg }
    }

    /// Process up to `count` shards starting at `offset` into the current
    /// unprocessed listing. A shard that fails to fetch or decode is logged
    /// and left unmarked for a later pass; an encoder failure aborts the
    /// window since every remaining shard would hit it too.
    pub async fn run_window(&self, offset: usize, count: usize) -> Result<EmbedStats> {
        let unprocessed = list_unprocessed_shards(self.store.as_ref(), &self.cfg).await?;
        let end = offset.saturating_add(count).min(unprocessed.len());
        let window: Vec<String> = unprocessed
            .get(offset..end)
            .unwrap_or_default()
            .to_vec();
        info!(
            offset,
            count,
            unprocessed = unprocessed.len(),
            window = window.len(),
            model = self.encoder.model_name(),
            "starting embedding window"
        );

        let started = Instant::now();
        let mut stats = EmbedStats::default();
        let mut work = stream::iter(window.into_iter().map(|key| {
            let outcome = self.process_shard(key.clone());
            async move { (key, outcome.await) }
        }))
        .buffer_unordered(self.cfg.shard_concurrency.max(1));

        while let Some((key, result)) = work.next().await {
            match result {
                Ok(ShardOutcome::Embedded(n)) => {
                    stats.shards_processed += 1;
                    stats.records_embedded += n as u64;
                }
                Ok(ShardOutcome::Empty) => {
                    stats.shards_processed += 1;
                    stats.shards_empty += 1;
                }
                Err(e @ Error::Encode(_)) => return Err(e),
                Err(e) => {
                    warn!(shard = %key, error = %e, "shard left for a later pass");
                    stats.shards_skipped += 1;
                }
            }
        }

        let secs = started.elapsed().as_secs_f64();
        let rate = if secs > 0.0 {
            stats.records_embedded as f64 / secs
        } else {
            0.0
        };
        info!(
            shards_processed = stats.shards_processed,
            shards_empty = stats.shards_empty,
            shards_skipped = stats.shards_skipped,
            records_embedded = stats.records_embedded,
            docs_per_sec = format!("{rate:.1}"),
            "embedding window complete"
        );
        Ok(stats)
    }

    async fn process_shard(&self, key: String) -> Result<ShardOutcome> {
        let shard_id = shard_id_from_key(&key).to_string();
        let bytes = self.store.get(&key).await?;
        let extract_key = key.clone();
        let pairs =
            tokio::task::spawn_blocking(move || extract_pairs(&extract_key, &bytes))
                .await
                .map_err(|e| Error::Decode(format!("extract join failed: {e}")))??;

        // A shard with nothing embeddable is still complete work; mark it so
        // the orchestrator stops rescheduling it.
        if pairs.is_empty() {
            self.put_marker(&shard_id).await?;
            return Ok(ShardOutcome::Empty);
        }

        let encoder = Arc::clone(&self.encoder);
        let encoder_cfg = self.cfg.encoder.clone();
        let (dois, texts): (Vec<String>, Vec<String>) = pairs.into_iter().unzip();
        let vectors = tokio::task::spawn_blocking(move || {
            encode_all(encoder.as_ref(), &encoder_cfg, &texts)
        })
        .await
        .map_err(|e| Error::Encode(format!("encode join failed: {e}")))??;

        let records: Vec<EmbeddingRecord> = dois
            .into_iter()
            .zip(vectors)
            .map(|(doi, embedding)| EmbeddingRecord { doi, embedding })
            .collect();
        let n = records.len();
        let parquet = tokio::task::spawn_blocking(move || records_to_parquet(&records))
            .await
            .map_err(|e| Error::Sink(format!("parquet join failed: {e}")))??;

        let data_key = format!("{}{}{}", self.cfg.data_prefix, shard_id, DATA_SUFFIX);
        self.store.put(&data_key, &parquet).await?;
        // Marker only after the data is durable.
        self.put_marker(&shard_id).await?;
        Ok(ShardOutcome::Embedded(n))
    }

    async fn put_marker(&self, shard_id: &str) -> Result<()> {
        let marker_key = format!("{}{}{}", self.cfg.marker_prefix, shard_id, MARKER_SUFFIX);
        self.store.put(&marker_key, b"").await
    }
}
