//! Composable section codecs, each reading and writing one named facet of a region's
//! root container.
//!
//! Codecs are registered as an ordered list and invoked in that order for both read
//! and write. Each codec owns a disjoint set of keys of the root compound, so new
//! persisted facets can be added without touching the existing codecs.

mod slices;
mod structures;
mod actions;

pub use slices::SliceCodec;
pub use structures::StructureQueueCodec;
pub use actions::ActionQueueCodec;

use crate::region::RegionRecord;
use crate::serde::tag::{TagCompound, TagError};


/// Key of the boolean generated flag in a region's root compound, owned by the slice
/// codec but read up-front by the scheduler to parameterize every codec.
pub(crate) const GENERATED_KEY: &str = "generated";

/// Read the generated flag of a region's root compound, absent means ungenerated.
pub fn read_generated(root: &TagCompound) -> bool {
    root.get_boolean(GENERATED_KEY).unwrap_or(false)
}

/// The default codec composition producing the canonical region layout: slice data,
/// queued structures, queued actions.
pub fn default_codecs() -> Vec<Box<dyn SectionCodec>> {
    vec![
        Box::new(SliceCodec),
        Box::new(StructureQueueCodec),
        Box::new(ActionQueueCodec),
    ]
}


/// A stateless reader/writer for one named facet of a region's persisted
/// representation.
pub trait SectionCodec: Send + Sync {

    /// Name of this codec, used for logging.
    fn name(&self) -> &'static str;

    /// Populate the record's facet from the root compound. The `generated` flag lets
    /// a codec decide whether to materialize content at all, slice data is
    /// meaningless for an ungenerated region.
    fn read_section(
        &self,
        region: &RegionRecord,
        root: &TagCompound,
        generated: bool,
    ) -> Result<(), SectionError>;

    /// Write the record's facet into the root compound.
    fn write_section(
        &self,
        region: &RegionRecord,
        root: &mut TagCompound,
        generated: bool,
    ) -> Result<(), SectionError>;

}


/// Error type used together with every call on section codec methods.
#[derive(thiserror::Error, Debug)]
pub enum SectionError {
    #[error("tag: {0}")]
    Tag(#[from] TagError),
    #[error("missing or mistyped key: {0}")]
    Key(String),
}
