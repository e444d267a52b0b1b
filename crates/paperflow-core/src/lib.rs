use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("store error: {0}")]
    Store(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("sink error: {0}")]
    Sink(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One author kept on a normalized paper. Both fields are required; source
/// authorships missing either are dropped before this type is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub id: String,
}

/// Canonical record produced by normalization and persisted to the papers table.
///
/// `paper_id` is always present; `abstract_text` is always a string (empty when
/// reconstruction yielded nothing); the sequence fields are always present,
/// possibly empty, never null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPaper {
    pub paper_id: String,
    pub doi: Option<String>,
    pub title: Option<String>,
    /// Opaque timestamp string from the source corpus; never parsed.
    pub created_date: Option<String>,
    pub cited_by_count: Option<i64>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(default)]
    pub related_works: Vec<String>,
    #[serde(default)]
    pub referenced_works: Vec<String>,
    pub cited_by_api_url: Option<String>,
    pub oa_status: Option<String>,
    pub oa_url: Option<String>,
    #[serde(default)]
    pub authors: Vec<Author>,
}

/// One (doi, vector) pair destined for the embedding store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub doi: String,
    pub embedding: Vec<f32>,
}

/// Batching knobs for encoding. Texts longer than `max_chars` are truncated
/// (never rejected); batches are sized for CPU throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub batch_size: usize,
    pub max_chars: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            batch_size: 512,
            max_chars: 2048,
        }
    }
}

/// Durable object storage holding input shards, embedding output, and the
/// completion-marker ledger.
///
/// `list` MUST return keys sorted lexicographically: the orchestrator-to-worker
/// contract partitions the shard list purely by (offset, count), which is only
/// correct when listings are stable between calls.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Append-only destination for normalized papers. Appends are NOT idempotent
/// at the row level; re-running a load appends duplicate rows by design.
#[async_trait::async_trait]
pub trait PaperSink: Send + Sync {
    async fn append(&self, papers: &[CanonicalPaper]) -> Result<()>;
}

/// Pretrained sentence encoder: text in, fixed-length vector out.
///
/// `encode` is order-preserving (vector i corresponds to text i) and
/// deterministic for a fixed model version. Implementations are constructed
/// once per worker process and shared by reference; they are never reloaded
/// per shard.
pub trait SentenceEncoder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dimension(&self) -> usize;
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Fire-and-forget dispatch of one worker invocation covering the shard
/// window `[offset, offset + count)` of the sorted unprocessed listing.
#[async_trait::async_trait]
pub trait JobLauncher: Send + Sync {
    async fn launch(&self, offset: usize, count: usize) -> Result<()>;
}
