//! Vector collection naming.
//!
//! A collection is the physical vector-store unit for one corpus embedded
//! with one model. Its name is wire-visible in the store and must stay
//! byte-for-byte `"{corpus_id}__{embedding_model_id}"`:
//!
//! ```rust
//! use toolgate_core::collection::CollectionKey;
//!
//! let key = CollectionKey::new("demo", "stub-256");
//! assert_eq!(key.as_str(), "demo__stub-256");
//! ```
//!
//! Keys are always recomputed from the corpus record, never stored on
//! their own. Corpus ids are validated so that no two `(corpus, model)`
//! pairs can collide on the same key.

use std::fmt;

use crate::error::{GatewayError, GatewayResult};

pub const COLLECTION_SEPARATOR: &str = "__";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionKey(String);

impl CollectionKey {
    pub fn new(corpus_id: &str, embedding_model_id: &str) -> Self {
        Self(format!(
            "{}{}{}",
            corpus_id, COLLECTION_SEPARATOR, embedding_model_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Corpus ids: `^[A-Za-z][A-Za-z0-9_]*$`, no `__` run, no trailing `_`.
///
/// With those two restrictions the first `__` in a key always starts right
/// after the corpus id, so the key is injective.
pub fn validate_corpus_id(corpus_id: &str) -> GatewayResult<()> {
    let mut chars = corpus_id.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !first_ok || !rest_ok {
        return Err(GatewayError::invalid(
            "corpus id",
            format!(
                "'{}' must start with a letter and contain only letters, digits or '_'",
                corpus_id
            ),
        ));
    }
    if corpus_id.contains(COLLECTION_SEPARATOR) || corpus_id.ends_with('_') {
        return Err(GatewayError::invalid(
            "corpus id",
            format!(
                "'{}' may not contain '{}' or end with '_'",
                corpus_id, COLLECTION_SEPARATOR
            ),
        ));
    }
    Ok(())
}
