//! Multi-corpus result merging and context rendering.
//!
//! Per-corpus searches each return up to `k` hits. [`merge_results`]
//! combines them into one deterministic ranking:
//!
//! 1. Union all per-corpus lists, dropping duplicate `(corpus_id, chunk_id)` pairs.
//! 2. Sort by score descending.
//! 3. Break ties with the configured [`TieBreak`] (default: `corpus_id`,
//!    then `chunk_id`, both ascending).
//! 4. With `dedupe_text`, drop any hit whose text equals a better-ranked
//!    hit's text, across corpora too.
//! 5. Truncate:
//!    - [`MergeMode::Global`] keeps the overall top `k`, after first
//!      reserving the best `min_per_corpus` hits of every corpus. Reserved
//!      hits may push the total past `k`.
//!    - [`MergeMode::PerCorpus`] keeps up to `k` per corpus.
//!
//! The output depends only on the inputs' contents, never on the order in
//! which concurrent searches finished.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Return the `k` best hits across all corpora.
    #[default]
    Global,
    /// Return up to `k` hits from each corpus, still ranked together.
    PerCorpus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    CorpusThenChunk,
    ChunkThenCorpus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    #[serde(default)]
    pub mode: MergeMode,
    #[serde(default)]
    pub tie_break: TieBreak,
    /// Hits reserved for each corpus in global mode. `0` disables coverage.
    #[serde(default)]
    pub min_per_corpus: usize,
    #[serde(default)]
    pub dedupe_text: bool,
}

/// Why a requested corpus contributed nothing to a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Vectors from different models are not comparable.
    ModelMismatch {
        corpus_model: String,
        query_model: String,
    },
    UnknownCorpus,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSkip {
    pub corpus_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

fn compare(a: &SearchResult, b: &SearchResult, tie_break: TieBreak) -> Ordering {
    let by_score = b
        .score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal);
    let by_corpus = a.corpus_id.cmp(&b.corpus_id);
    let by_chunk = a.chunk.id.cmp(&b.chunk.id);
    match tie_break {
        TieBreak::CorpusThenChunk => by_score.then(by_corpus).then(by_chunk),
        TieBreak::ChunkThenCorpus => by_score.then(by_chunk).then(by_corpus),
    }
}

/// Merge per-corpus result lists into one ranking.
pub fn merge_results(
    per_corpus: Vec<Vec<SearchResult>>,
    k: usize,
    policy: &MergePolicy,
) -> Vec<SearchResult> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut all: Vec<SearchResult> = per_corpus
        .into_iter()
        .flatten()
        .filter(|r| !r.score.is_nan())
        .filter(|r| seen.insert((r.corpus_id.clone(), r.chunk.id.clone())))
        .collect();

    all.sort_by(|a, b| compare(a, b, policy.tie_break));

    if policy.dedupe_text {
        let mut texts: HashSet<String> = HashSet::new();
        all.retain(|r| texts.insert(r.chunk.text.clone()));
    }

    match policy.mode {
        MergeMode::Global if policy.min_per_corpus == 0 => {
            all.truncate(k);
            all
        }
        MergeMode::Global => {
            let mut reserved: HashMap<String, usize> = HashMap::new();
            let mut keep: Vec<bool> = all
                .iter()
                .map(|r| {
                    let n = reserved.entry(r.corpus_id.clone()).or_insert(0);
                    *n += 1;
                    *n <= policy.min_per_corpus
                })
                .collect();
            let mut room = k.saturating_sub(keep.iter().filter(|kept| **kept).count());
            for kept in keep.iter_mut().filter(|kept| !**kept) {
                if room == 0 {
                    break;
                }
                *kept = true;
                room -= 1;
            }
            all.into_iter()
                .zip(keep)
                .filter_map(|(r, kept)| kept.then_some(r))
                .collect()
        }
        MergeMode::PerCorpus => {
            let mut taken: HashMap<String, usize> = HashMap::new();
            all.into_iter()
                .filter(|r| {
                    let n = taken.entry(r.corpus_id.clone()).or_insert(0);
                    *n += 1;
                    *n <= k
                })
                .collect()
        }
    }
}

#[derive(Serialize)]
struct ContextItem<'a> {
    corpus_id: &'a str,
    score: f32,
    source: &'a str,
    chunk_index: i64,
    text: &'a str,
}

/// Render ranked results as the retrieval context block for the LLM prompt.
pub fn render_context(results: &[SearchResult]) -> String {
    let items: Vec<ContextItem> = results
        .iter()
        .map(|r| ContextItem {
            corpus_id: &r.corpus_id,
            score: r.score,
            source: &r.chunk.source,
            chunk_index: r.chunk.chunk_index,
            text: &r.chunk.text,
        })
        .collect();
    let context_json = serde_json::to_string_pretty(&items).unwrap_or_default();

    format!(
        "Answer the user's question using the retrieved context below.\n\n\
         Rules:\n\
         - Items are ranked best-first; prefer higher-score items.\n\
         - Do not repeat the same information twice.\n\
         - If items conflict, say so and attribute each claim to its corpus_id and source.\n\
         - If the answer is not in the context, say it was not found in the selected corpora.\n\n\
         Retrieved context (JSON, best-first):\n{}",
        context_json
    )
}
