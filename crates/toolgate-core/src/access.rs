//! Effective-access computation.
//!
//! [`resolve`] is a pure function over an [`AccessSnapshot`]: the enabled
//! backends and corpora an identity may use are the union of its direct
//! user grants and the grants of every role it holds.
//!
//! ```text
//!   grants ──┬── subject = user_id ─────┐
//!            └── subject ∈ roles ───────┼──▶ resource ids ──▶ ∩ enabled ──▶ ResolvedAccess
//!   superadmin role ───────────────────┘        (all enabled)
//! ```
//!
//! An identity with no grants resolves to empty sets. That is a normal
//! outcome, not an error.
//!
//! Granted corpora that are currently disabled are kept apart in
//! `disabled_corpora`: queries may name them and get a `disabled` skip, but
//! nothing can be written to them.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{Corpus, Grant, Identity, ResourceKind, ToolBackendDescriptor};

/// Read-only copy of the access relation at one point in time.
#[derive(Debug, Clone, Default)]
pub struct AccessSnapshot {
    pub backends: Vec<ToolBackendDescriptor>,
    pub corpora: Vec<Corpus>,
    pub grants: Vec<Grant>,
}

/// Resolution knobs that come from configuration.
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    /// Holders of this role see every enabled resource.
    pub superadmin_role: Option<String>,
}

impl AccessPolicy {
    pub fn is_superadmin(&self, identity: &Identity) -> bool {
        self.superadmin_role
            .as_deref()
            .is_some_and(|role| identity.has_role(role))
    }
}

/// The backends and corpora one identity may use, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedAccess {
    pub tool_backends: Vec<ToolBackendDescriptor>,
    pub corpora: Vec<Corpus>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_corpora: Vec<Corpus>,
}

impl ResolvedAccess {
    pub fn backend_ids(&self) -> Vec<&str> {
        self.tool_backends.iter().map(|b| b.id.as_str()).collect()
    }

    pub fn corpus_ids(&self) -> Vec<&str> {
        self.corpora.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn corpus(&self, corpus_id: &str) -> Option<&Corpus> {
        self.corpora.iter().find(|c| c.id == corpus_id)
    }

    pub fn is_empty(&self) -> bool {
        self.tool_backends.is_empty() && self.corpora.is_empty()
    }

    /// A granted corpus, enabled or not.
    pub fn granted_corpus(&self, corpus_id: &str) -> Option<&Corpus> {
        self.corpus(corpus_id)
            .or_else(|| self.disabled_corpora.iter().find(|c| c.id == corpus_id))
    }

    /// Fails with `AccessDenied` on the first requested corpus outside this set.
    pub fn check_corpora<S: AsRef<str>>(
        &self,
        identity: &Identity,
        requested: &[S],
    ) -> GatewayResult<()> {
        deny_first(identity, requested, |id| self.corpus(id).is_some())
    }

    /// Like [`check_corpora`](Self::check_corpora), but also admits granted
    /// corpora that are disabled, for read paths that report them as skipped.
    pub fn check_searchable<S: AsRef<str>>(
        &self,
        identity: &Identity,
        requested: &[S],
    ) -> GatewayResult<()> {
        deny_first(identity, requested, |id| self.granted_corpus(id).is_some())
    }
}

fn deny_first<S: AsRef<str>>(
    identity: &Identity,
    requested: &[S],
    allowed: impl Fn(&str) -> bool,
) -> GatewayResult<()> {
    match requested.iter().find(|id| !allowed(id.as_ref())) {
        Some(denied) => Err(GatewayError::AccessDenied {
            user_id: identity.user_id.clone(),
            resource_kind: ResourceKind::Corpus,
            resource_id: denied.as_ref().to_string(),
        }),
        None => Ok(()),
    }
}

/// Resource ids of one kind reachable by `identity` through any grant.
///
/// Enabled state is not considered here.
pub fn granted_ids(grants: &[Grant], identity: &Identity, kind: ResourceKind) -> BTreeSet<String> {
    grants
        .iter()
        .filter(|g| g.resource_kind == kind && g.applies_to(identity))
        .map(|g| g.resource_id.clone())
        .collect()
}

/// Compute the effective access of `identity`.
pub fn resolve(
    snapshot: &AccessSnapshot,
    identity: &Identity,
    policy: &AccessPolicy,
) -> ResolvedAccess {
    let superadmin = policy.is_superadmin(identity);
    let backend_ids = granted_ids(&snapshot.grants, identity, ResourceKind::ToolBackend);
    let corpus_ids = granted_ids(&snapshot.grants, identity, ResourceKind::Corpus);

    let mut tool_backends: Vec<ToolBackendDescriptor> = snapshot
        .backends
        .iter()
        .filter(|b| b.enabled && (superadmin || backend_ids.contains(&b.id)))
        .cloned()
        .collect();
    tool_backends.sort_by(|a, b| a.id.cmp(&b.id));
    tool_backends.dedup_by(|a, b| a.id == b.id);

    let (mut corpora, mut disabled_corpora): (Vec<Corpus>, Vec<Corpus>) = snapshot
        .corpora
        .iter()
        .filter(|c| superadmin || corpus_ids.contains(&c.id))
        .cloned()
        .partition(|c| c.enabled);
    for list in [&mut corpora, &mut disabled_corpora] {
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list.dedup_by(|a, b| a.id == b.id);
    }

    ResolvedAccess {
        tool_backends,
        corpora,
        disabled_corpora,
    }
}
