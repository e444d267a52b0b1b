//! Sentence encoders and the batching/truncation wrapper around them.
//!
//! Two backends:
//! - [`HashEncoder`]: deterministic FNV-1a token-hash vectors. No model
//!   assets, always available; the test suite runs on it.
//! - [`FastEmbedEncoder`] (`fastembed` feature): MiniLM-L6-v2 via ONNX for
//!   real semantic vectors.
//!
//! Both are deterministic for a fixed input, as downstream idempotent shard
//! rewrites require.

use paperflow_core::{EncoderConfig, Error, Result, SentenceEncoder};

/// Encode every text through `encoder` in fixed-size batches, truncating each
/// text to `cfg.max_chars` (on a char boundary) first. Order-preserving:
/// output i corresponds to input i. Truncation never drops an input.
pub fn encode_all(
    encoder: &dyn SentenceEncoder,
    cfg: &EncoderConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let truncated: Vec<String> = texts.iter().map(|t| truncate_chars(t, cfg.max_chars)).collect();
    let mut out = Vec::with_capacity(truncated.len());
    for batch in truncated.chunks(cfg.batch_size.max(1)) {
        let vectors = encoder.encode(batch)?;
        if vectors.len() != batch.len() {
            return Err(Error::Encode(format!(
                "encoder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        out.extend(vectors);
    }
    Ok(out)
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h = FNV_OFFSET;
    for b in bytes {
        h ^= u64::from(*b);
        h = h.wrapping_mul(FNV_PRIME);
    }
    h
}

/// Deterministic token-hash encoder: each lowercase alphanumeric token is
/// hashed into one of `dimension` buckets and counted, then the vector is
/// l2-normalized. Not semantic, but fixed-length and stable, which is enough
/// to exercise the whole pipeline without model assets.
#[derive(Debug, Clone)]
pub struct HashEncoder {
    dimension: usize,
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn encode_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let mut token = String::new();
        for ch in text.chars() {
            let c = ch.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                token.push(c);
            } else if !token.is_empty() {
                let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
                v[bucket] += 1.0;
                token.clear();
            }
        }
        if !token.is_empty() {
            let bucket = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        l2_normalize(&mut v);
        v
    }
}

impl Default for HashEncoder {
    fn default() -> Self {
        // Matches the MiniLM output width so either backend fills the same
        // embedding column.
        Self::new(384)
    }
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

impl SentenceEncoder for HashEncoder {
    fn model_name(&self) -> &str {
        "hash-fnv1a"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

#[cfg(feature = "fastembed")]
pub use fastembed_encoder::FastEmbedEncoder;

#[cfg(feature = "fastembed")]
mod fastembed_encoder {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// MiniLM-L6-v2 encoder through `fastembed`. The ONNX session is not safe
    /// for concurrent mutable access, so inference is serialized behind a
    /// mutex; construct once per worker process and share by reference.
    pub struct FastEmbedEncoder {
        model: Mutex<TextEmbedding>,
        model_name: String,
        dimension: usize,
    }

    impl FastEmbedEncoder {
        pub fn new(cache_dir: Option<std::path::PathBuf>) -> Result<Self> {
            let model_type = EmbeddingModel::AllMiniLML6V2;
            let model_name = format!("{model_type:?}");
            let mut init = InitOptions::new(model_type);
            if let Some(dir) = cache_dir {
                init = init.with_cache_dir(dir);
            }
            let model = TextEmbedding::try_new(init)
                .map_err(|e| Error::Encode(format!("fastembed init failed: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
                model_name,
                dimension: 384,
            })
        }
    }

    impl std::fmt::Debug for FastEmbedEncoder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("FastEmbedEncoder")
                .field("model_name", &self.model_name)
                .field("dimension", &self.dimension)
                .finish()
        }
    }

    impl SentenceEncoder for FastEmbedEncoder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let mut model = self
                .model
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| Error::Encode(format!("fastembed inference failed: {e}")))
        }
    }
}
