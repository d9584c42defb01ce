//! Sliding-window text chunker.
//!
//! Splits a document into overlapping windows of `chunk_size` characters,
//! advancing `chunk_size - overlap` characters per step. Windows are
//! measured in Unicode scalar values so multi-byte text never splits inside
//! a character.
//!
//! # Guarantees
//!
//! - Pieces are trimmed; pieces that trim to nothing are dropped.
//! - Chunk indices are contiguous and start at 1.
//! - Chunk ids depend only on `(source, chunk_index)`, so re-uploading a
//!   source overwrites its previous points instead of duplicating them.

use sha2::{Digest, Sha256};

use crate::models::{Acl, Chunk};

/// Split `text` into overlapping windows.
///
/// `overlap` is clamped to `chunk_size - 1`; a zero `chunk_size` yields no
/// pieces.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if chunk_size == 0 {
        return Vec::new();
    }
    let overlap = overlap.min(chunk_size - 1);
    let step = chunk_size - overlap;
    let chars: Vec<char> = text.chars().collect();

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

/// Stable chunk id: first 16 hex digits of SHA-256(source), then the index.
pub fn chunk_id(source: &str, chunk_index: i64) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    format!("{}-{}", &digest[..16], chunk_index)
}

/// Everything about a document except its text.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    pub source: String,
    pub source_type: String,
    pub corpus_id: String,
    pub embedding_model_id: String,
    pub uploaded_by: String,
}

/// Chunk `text` and attach the payload fields every stored point carries.
pub fn build_chunks(
    meta: &DocumentMeta,
    acl: &Acl,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Vec<Chunk> {
    chunk_text(text, chunk_size, overlap)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            let chunk_index = i as i64 + 1;
            Chunk {
                id: chunk_id(&meta.source, chunk_index),
                text: piece,
                source: meta.source.clone(),
                source_type: meta.source_type.clone(),
                chunk_index,
                allowed_users: acl.users.clone(),
                allowed_roles: acl.roles.clone(),
                uploaded_by: meta.uploaded_by.clone(),
                corpus_id: meta.corpus_id.clone(),
                embedding_model_id: meta.embedding_model_id.clone(),
            }
        })
        .collect()
}
