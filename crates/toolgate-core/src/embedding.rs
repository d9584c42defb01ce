//! Embedding model trait, the deterministic stub model, and vector helpers.
//!
//! Network-backed models (OpenAI, Ollama) live in the `toolgate` app
//! crate; they implement the same [`Embedder`] trait so the retrieval
//! engine never knows which provider produced a vector.

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// An embedding model registered under a stable id.
///
/// The id is part of every collection key, so it must never change for a
/// model whose vectors are already stored.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Catalogue id, e.g. `"stub-256"` or `"text-embedding-3-small"`.
    fn model_id(&self) -> &str;

    /// Declared output dimension. New collections are sized to this.
    fn dims(&self) -> usize;

    /// Preferred number of texts per [`embed`](Embedder::embed) call.
    fn batch_size(&self) -> usize {
        64
    }

    /// Embed a batch, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic offline model: unit vectors seeded from SHA-256 of the text.
///
/// Identical texts map to identical vectors; unrelated texts land close to
/// orthogonal. Used for tests and for deployments without a model server.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    model_id: String,
    dims: usize,
}

impl StubEmbedder {
    pub fn new(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dims,
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());
        let mut out = Vec::with_capacity(self.dims);
        let mut block: u32 = 0;
        while out.len() < self.dims {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(block.to_le_bytes());
            let digest = hasher.finalize();
            for word in digest.chunks_exact(4) {
                if out.len() == self.dims {
                    break;
                }
                let n = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                out.push((n as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32);
            }
            block += 1;
        }
        normalize(&mut out);
        out
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dims == 0 {
            bail!("stub model '{}' declares zero dimensions", self.model_id);
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scale `v` to unit length in place. Zero vectors are left as-is.
pub fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a vector as little-endian `f32` bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form an `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or unequal-length input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b.iter())
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
