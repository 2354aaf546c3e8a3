//! Model persistence
//!
//! Artifacts are a binary payload plus a JSON metadata record stored under a
//! timestamped identity:
//! - `identity`: name sanitizing and identity parsing
//! - `store`: save / load / list / delete
//! - `index`: exact name → newest identity lookup
//! - `metadata`: the metadata record

mod identity;
mod index;
mod metadata;
mod store;

pub use identity::{sanitize_name, ArtifactId, TIMESTAMP_FORMAT};
pub use index::ArtifactIndex;
pub use metadata::{ArtifactMetadata, ModelFamily, Provenance};
pub use store::{ArtifactStore, ArtifactSummary, Payload, PayloadKind, SavedArtifact};
