//! Region generation interfaces and the deferred placement tables.
//!
//! The terrain-synthesis algorithm itself lives outside this crate, behind the
//! [`RegionGenerator`] trait. Structure and action replay handlers are resolved
//! through explicit, statically-constructed tables built once at startup and passed
//! by reference into the scheduler, there is no runtime type scanning.

use std::sync::Arc;

use glam::IVec2;
use indexmap::IndexMap;

use crate::directory::RegionDirectory;
use crate::region::{QueuedStructure, RegionRecord};
use crate::serde::tag::TagCompound;


/// Fills a loaded but not yet generated region with content.
///
/// A generator may request neighboring regions from the host directory, creating
/// placeholders as needed, and enqueue deferred structures on them when a placement
/// overflows the region boundary.
pub trait RegionGenerator: Send + Sync {

    /// Generate the given region. Called with the region loaded and the generation
    /// permit held, at most once per region. Runs on whichever thread performed the
    /// load, pool thread for asynchronous loads, caller's thread for synchronous
    /// ones.
    fn generate(&self, region: &Arc<RegionRecord>, host: &dyn GeneratorHost);

}

/// Narrow view of the scheduler given to a running generator.
pub trait GeneratorHost {

    /// The resident-region cache, for fetching or creating neighbors.
    fn directory(&self) -> &RegionDirectory;

    /// Load the given region on the calling thread, without waiting on pool
    /// scheduling. No-op if the region is already loaded or loading.
    fn load_region(&self, pos: IVec2);

    /// Hand a structure part that overflowed into the given region over to it. If
    /// that region is already generated the part is applied immediately, otherwise
    /// it is queued for replay right after the region's generation, whichever order
    /// the two regions end up being generated in.
    fn apply_or_queue_structure(&self, pos: IVec2, queued: QueuedStructure);

}


/// Error returned by structure and action replay handlers. A failing entry is skipped
/// and logged, it never aborts the drain of the rest of the queue.
#[derive(thiserror::Error, Debug)]
pub enum ApplyError {
    #[error("missing or mistyped key: {0}")]
    Key(&'static str),
    #[error("placement out of bounds")]
    OutOfBounds,
    #[error("{0}")]
    Other(String),
}

/// A structure replay handler: re-applies the part of a structure that fell into the
/// given region, deterministically from the queued descriptor and its seed.
pub type StructureFn = fn(&RegionRecord, &QueuedStructure) -> Result<(), ApplyError>;

/// An action replay handler: re-executes an opaque deferred action against a region.
pub type ActionFn = fn(&RegionRecord, &TagCompound) -> Result<(), ApplyError>;


/// Statically-constructed mapping from structure type identifiers to their replay
/// handlers, in registration order.
pub struct StructureTable {
    inner: IndexMap<&'static str, StructureFn>,
}

impl StructureTable {

    pub fn new() -> Self {
        Self { inner: IndexMap::new() }
    }

    /// Register a handler, chainable at startup.
    pub fn with(mut self, kind: &'static str, func: StructureFn) -> Self {
        self.inner.insert(kind, func);
        self
    }

    pub fn get(&self, kind: &str) -> Option<StructureFn> {
        self.inner.get(kind).copied()
    }

}

impl Default for StructureTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Statically-constructed mapping from action identifiers to their replay handlers.
pub struct ActionTable {
    inner: IndexMap<&'static str, ActionFn>,
}

impl ActionTable {

    pub fn new() -> Self {
        Self { inner: IndexMap::new() }
    }

    pub fn with(mut self, kind: &'static str, func: ActionFn) -> Self {
        self.inner.insert(kind, func);
        self
    }

    pub fn get(&self, kind: &str) -> Option<ActionFn> {
        self.inner.get(kind).copied()
    }

}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}
