//! Multi-corpus retrieval engine.
//!
//! # Ingest
//!
//! ```text
//! chunks ──▶ corpus/model check ──▶ embed (batched, per-item fallback) ──▶ upsert
//! ```
//!
//! The corpus must already exist and be bound to the requested model; the
//! check runs before any embedding call. A batch that fails to embed is
//! retried one text at a time, and texts that still fail, or come back with
//! the wrong number of dimensions, are reported in `failed_ids` instead of
//! aborting the ingest. The points are written in a single upsert after all
//! embedding is done, and a collection already declared at another size is
//! rejected before the first embedding call.
//!
//! # Query
//!
//! The query text is embedded once. Every requested corpus bound to the same
//! model is searched in parallel under one deadline; corpora on another
//! model, unknown, or disabled are reported in `skipped`. Results are merged
//! by [`merge_results`] after every search has finished, failed, or been
//! abandoned at the deadline.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

use toolgate_core::chunk::{build_chunks, DocumentMeta};
use toolgate_core::collection::CollectionKey;
use toolgate_core::embedding::Embedder;
use toolgate_core::error::{GatewayError, GatewayResult};
use toolgate_core::models::{Acl, Chunk, CorpusParams, Identity, SearchResult};
use toolgate_core::search::{merge_results, render_context, CorpusSkip, MergePolicy, SkipReason};
use toolgate_core::store::{AccessFilter, UpsertOutcome, VectorPoint, VectorStore};

use crate::config::RetrievalConfig;
use crate::corpus::{CorpusEntry, CorpusRegistry};
use crate::embedding::EmbeddingCatalog;

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub merge: MergePolicy,
    pub deadline: Duration,
    pub default_k: usize,
    pub default_chunk_size: usize,
    pub default_chunk_overlap: usize,
}

impl RetrievalOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            merge: config.merge_policy(),
            deadline: Duration::from_millis(config.query_deadline_ms),
            default_k: config.default_k,
            default_chunk_size: config.default_chunk_size,
            default_chunk_overlap: config.default_chunk_overlap,
        }
    }
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// A corpus whose search returned an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusFailure {
    pub corpus_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub results: Vec<SearchResult>,
    pub skipped: Vec<CorpusSkip>,
    pub timed_out: Vec<String>,
    pub failed: Vec<CorpusFailure>,
}

/// One document upload: the whole flow from raw text to stored points.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub corpus_id: String,
    pub embedding_model_id: String,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub chunk_overlap: Option<usize>,
    pub source: String,
    #[serde(default)]
    pub source_type: String,
    pub text: String,
    pub uploaded_by: String,
    /// ACL for a corpus created by this upload. Ignored for existing corpora.
    #[serde(default)]
    pub acl: Acl,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub corpus: CorpusEntry,
    pub chunks: usize,
    pub outcome: UpsertOutcome,
}

#[derive(Clone)]
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedders: EmbeddingCatalog,
    corpora: CorpusRegistry,
    options: RetrievalOptions,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedders: EmbeddingCatalog,
        corpora: CorpusRegistry,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            embedders,
            corpora,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn corpora(&self) -> &CorpusRegistry {
        &self.corpora
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    // ── Ingest ───────────────────────────────────────────────────────────

    /// Embed `chunks` with `embedding_model_id` and store them in the corpus.
    pub async fn ingest(
        &self,
        corpus_id: &str,
        chunks: Vec<Chunk>,
        embedding_model_id: &str,
    ) -> GatewayResult<UpsertOutcome> {
        let corpus = self
            .corpora
            .get(corpus_id)
            .await?
            .ok_or_else(|| GatewayError::UnknownCorpus(corpus_id.to_string()))?;
        if corpus.embedding_model_id != embedding_model_id {
            return Err(GatewayError::CorpusConflict {
                corpus_id: corpus_id.to_string(),
                mismatches: vec![format!(
                    "embedding_model_id: {} != {}",
                    corpus.embedding_model_id, embedding_model_id
                )],
            });
        }

        let embedder = self.embedders.get(embedding_model_id)?;
        let key = CollectionKey::new(corpus_id, embedding_model_id);
        let dims = embedder.dims();
        if let Some(existing) = self.store.collection_dims(&key).await? {
            if existing != dims {
                return Err(GatewayError::DimensionMismatch {
                    collection: key.to_string(),
                    expected: existing,
                    actual: dims,
                });
            }
        }

        let mut outcome = UpsertOutcome::default();
        let mut points = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(embedder.batch_size().max(1)) {
            let (embedded, failed) = embed_batch(embedder.as_ref(), batch, corpus_id).await;
            points.extend(embedded);
            outcome.failed_ids.extend(failed);
        }
        // One upsert for the whole document so a store error writes nothing.
        if !points.is_empty() {
            outcome.extend(self.store.upsert(&key, dims, points).await?);
        }

        tracing::info!(
            corpus = corpus_id,
            collection = %key,
            stored = outcome.succeeded_ids.len(),
            failed = outcome.failed_ids.len(),
            "ingest complete"
        );
        Ok(outcome)
    }

    /// Create or reuse the corpus, chunk the text, and ingest it.
    pub async fn ingest_document(&self, request: IngestRequest) -> GatewayResult<IngestReport> {
        let params = CorpusParams {
            embedding_model_id: request.embedding_model_id.clone(),
            chunk_size: request.chunk_size.unwrap_or(self.options.default_chunk_size),
            chunk_overlap: request
                .chunk_overlap
                .unwrap_or(self.options.default_chunk_overlap),
        };
        let entry = self
            .corpora
            .get_or_create(&request.corpus_id, &params, &request.acl)
            .await?;

        let meta = DocumentMeta {
            source: request.source,
            source_type: request.source_type,
            corpus_id: request.corpus_id.clone(),
            embedding_model_id: request.embedding_model_id.clone(),
            uploaded_by: request.uploaded_by,
        };
        let chunks = build_chunks(
            &meta,
            &entry.acl,
            &request.text,
            entry.corpus.chunk_size,
            entry.corpus.chunk_overlap,
        );
        let count = chunks.len();
        let outcome = self
            .ingest(&request.corpus_id, chunks, &request.embedding_model_id)
            .await?;

        Ok(IngestReport {
            corpus: entry,
            chunks: count,
            outcome,
        })
    }

    // ── Query ────────────────────────────────────────────────────────────

    pub async fn query(
        &self,
        corpus_ids: &[String],
        query_text: &str,
        embedding_model_id: &str,
        k: usize,
        identity: &Identity,
    ) -> GatewayResult<QueryOutcome> {
        let embedder = self.embedders.get(embedding_model_id)?;
        let mut outcome = QueryOutcome::default();

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for corpus_id in corpus_ids.iter().filter(|id| seen.insert(id.as_str())) {
            let reason = match self.corpora.get(corpus_id).await? {
                None => Some(SkipReason::UnknownCorpus),
                Some(c) if !c.enabled => Some(SkipReason::Disabled),
                Some(c) if c.embedding_model_id != embedding_model_id => {
                    Some(SkipReason::ModelMismatch {
                        corpus_model: c.embedding_model_id,
                        query_model: embedding_model_id.to_string(),
                    })
                }
                Some(_) => None,
            };
            match reason {
                Some(reason) => {
                    tracing::warn!(corpus = %corpus_id, ?reason, "corpus skipped");
                    outcome.skipped.push(CorpusSkip {
                        corpus_id: corpus_id.clone(),
                        reason,
                    });
                }
                None => targets.push(corpus_id.clone()),
            }
        }

        if targets.is_empty() || k == 0 {
            return Ok(outcome);
        }

        let vector = embedder
            .embed(&[query_text.to_string()])
            .await
            .map_err(|e| GatewayError::EmbeddingFailure(format!("{:#}", e)))?
            .pop()
            .ok_or_else(|| GatewayError::EmbeddingFailure("model returned no vector".into()))?;
        let vector = Arc::new(vector);
        let filter = Arc::new(AccessFilter::for_identity(identity));

        let mut searches = JoinSet::new();
        for corpus_id in &targets {
            let store = Arc::clone(&self.store);
            let vector = Arc::clone(&vector);
            let filter = Arc::clone(&filter);
            let key = CollectionKey::new(corpus_id, embedding_model_id);
            let corpus_id = corpus_id.clone();
            searches.spawn(async move {
                let hits = store.search(&key, &vector, &filter, k).await;
                (corpus_id, hits)
            });
        }

        let mut pending: BTreeSet<String> = targets.into_iter().collect();
        let mut per_corpus = Vec::new();
        let deadline = tokio::time::Instant::now() + self.options.deadline;
        loop {
            match tokio::time::timeout_at(deadline, searches.join_next()).await {
                Ok(Some(Ok((corpus_id, hits)))) => {
                    pending.remove(&corpus_id);
                    match hits {
                        Ok(points) => per_corpus.push(
                            points
                                .into_iter()
                                .map(|p| SearchResult {
                                    chunk: p.payload,
                                    score: p.score,
                                    corpus_id: corpus_id.clone(),
                                })
                                .collect::<Vec<_>>(),
                        ),
                        Err(e) => {
                            tracing::warn!(corpus = %corpus_id, error = %e, "corpus search failed");
                            outcome.failed.push(CorpusFailure {
                                corpus_id,
                                error: e.to_string(),
                            });
                        }
                    }
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "search task aborted");
                }
                Ok(None) => break,
                Err(_) => {
                    searches.abort_all();
                    tracing::warn!(corpora = ?pending, "query deadline reached");
                    outcome.timed_out = std::mem::take(&mut pending).into_iter().collect();
                    break;
                }
            }
        }
        // Tasks that died without reporting back.
        outcome.failed.extend(pending.into_iter().map(|corpus_id| CorpusFailure {
            corpus_id,
            error: "search task aborted".to_string(),
        }));

        outcome.results = merge_results(per_corpus, k, &self.options.merge);
        Ok(outcome)
    }

    /// Render results as the context block for the LLM prompt.
    pub fn build_context(&self, results: &[SearchResult]) -> String {
        render_context(results)
    }
}

/// Embed one batch; on failure fall back to one text per call.
///
/// Returns the embedded points and the ids that could not be embedded.
async fn embed_batch(
    embedder: &dyn Embedder,
    batch: &[Chunk],
    corpus_id: &str,
) -> (Vec<VectorPoint>, Vec<String>) {
    let dims = embedder.dims();
    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
    match embedder.embed(&texts).await {
        Ok(vectors) if vectors.len() == batch.len() => {
            let mut points = Vec::with_capacity(batch.len());
            let mut failed = Vec::new();
            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() == dims {
                    points.push(to_point(chunk, vector, corpus_id, embedder.model_id()));
                } else {
                    tracing::warn!(chunk = %chunk.id, expected = dims, actual = vector.len(), "embedding has wrong size");
                    failed.push(chunk.id.clone());
                }
            }
            return (points, failed);
        }
        Ok(vectors) => {
            tracing::warn!(
                expected = batch.len(),
                got = vectors.len(),
                "embedding batch size mismatch, retrying per item"
            );
        }
        Err(e) => {
            tracing::warn!(error = %e, size = batch.len(), "embedding batch failed, retrying per item");
        }
    }

    let mut points = Vec::new();
    let mut failed = Vec::new();
    for chunk in batch {
        match embedder.embed(std::slice::from_ref(&chunk.text)).await {
            Ok(mut vectors) if vectors.len() == 1 && vectors[0].len() == dims => {
                if let Some(vector) = vectors.pop() {
                    points.push(to_point(chunk, vector, corpus_id, embedder.model_id()));
                }
            }
            Ok(_) => {
                tracing::warn!(chunk = %chunk.id, "chunk embedding has wrong shape");
                failed.push(chunk.id.clone());
            }
            Err(e) => {
                tracing::warn!(chunk = %chunk.id, error = %e, "chunk embedding failed");
                failed.push(chunk.id.clone());
            }
        }
    }
    (points, failed)
}

fn to_point(chunk: &Chunk, vector: Vec<f32>, corpus_id: &str, model_id: &str) -> VectorPoint {
    let mut payload = chunk.clone();
    payload.corpus_id = corpus_id.to_string();
    payload.embedding_model_id = model_id.to_string();
    VectorPoint {
        id: chunk.id.clone(),
        vector,
        payload,
    }
}
