//! Per-domain persistent state (§3 Data Model, §6 Persistent layout).
//!
//! - [`types`] holds the on-disk record shapes: levels, hash registry,
//!   per-level manifests, probe index, term metadata.
//! - [`store`] resolves those shapes to paths under a domain's namespace
//!   and loads/saves them atomically.

mod store;
mod types;

pub use store::{StateResult, StateStore};
pub use types::{
    DomainState, FileCandidate, HashRecord, HashRegistry, LevelFileManifest, LevelState,
    ManifestEntry, ProbeEntry, ProbeIndex, Signature, SourceObservation, TermMeta, TermMetaMap,
};
