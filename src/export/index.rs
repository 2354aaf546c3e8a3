//! Name to identity lookup

use std::collections::{BTreeMap, BTreeSet};

use super::identity::{sanitize_name, ArtifactId};
use super::store::{ArtifactStore, ArtifactSummary, PayloadKind};
use crate::error::{MlError, Result};

/// Snapshot of a store mapping each exact model name to its newest
/// identity. Lookups never match on prefixes.
#[derive(Debug, Clone, Default)]
pub struct ArtifactIndex {
    by_name: BTreeMap<String, ArtifactId>,
    identities: BTreeSet<ArtifactId>,
}

impl ArtifactIndex {
    pub fn build(store: &ArtifactStore, kind: Option<PayloadKind>) -> Result<Self> {
        Ok(Self::from_summaries(&store.list(kind)?))
    }

    /// `summaries` must be ordered newest first, as returned by
    /// [`ArtifactStore::list`]
    pub fn from_summaries(summaries: &[ArtifactSummary]) -> Self {
        let mut index = Self::default();
        for summary in summaries {
            index
                .by_name
                .entry(summary.identity.model_name().to_string())
                .or_insert_with(|| summary.identity.clone());
            index.identities.insert(summary.identity.clone());
        }
        index
    }

    /// Resolve an exact identity, or else a model name to its newest
    /// identity
    pub fn resolve(&self, name_or_identity: &str) -> Result<ArtifactId> {
        let key = name_or_identity.trim();
        if let Ok(id) = ArtifactId::parse(key) {
            if self.identities.contains(&id) {
                return Ok(id);
            }
        }
        self.by_name
            .get(&sanitize_name(key))
            .cloned()
            .ok_or_else(|| MlError::ArtifactNotFound(key.to_string()))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
