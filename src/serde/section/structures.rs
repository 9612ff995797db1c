//! Codec for the deferred cross-region structure queue.

use glam::IVec2;
use tracing::warn;

use crate::region::{QueuedStructure, RegionRecord};
use crate::serde::tag::{Tag, TagCompound};

use super::{SectionCodec, SectionError};


const QUEUE_KEY: &str = "queuedStructures";


/// Persists the not-yet-applied tail of the structure queue, so a structure that
/// overflowed into an unloaded region survives a save/unload/reload cycle. Entries
/// read from storage are merged with any entries already queued in memory.
pub struct StructureQueueCodec;

impl SectionCodec for StructureQueueCodec {

    fn name(&self) -> &'static str {
        "structure queue"
    }

    fn read_section(
        &self,
        region: &RegionRecord,
        root: &TagCompound,
        _generated: bool,
    ) -> Result<(), SectionError> {

        let Some(entries) = root.get_list(QUEUE_KEY) else {
            return Ok(());
        };

        let mut content = region.content();

        for entry in entries {
            // A malformed entry is skipped, never aborting the rest of the queue.
            match entry.as_compound().and_then(structure_from_tag) {
                Some(queued) => content.push_structure(queued),
                None => {
                    let pos = region.pos();
                    warn!("skipping malformed queued structure in region {}/{}", pos.x, pos.y);
                }
            }
        }

        Ok(())

    }

    fn write_section(
        &self,
        region: &RegionRecord,
        root: &mut TagCompound,
        _generated: bool,
    ) -> Result<(), SectionError> {

        let content = region.content();

        let entries = content.queued_structures().iter()
            .map(|queued| Tag::Compound(structure_to_tag(queued)))
            .collect();

        root.insert(QUEUE_KEY, Tag::List(entries));
        Ok(())

    }

}

fn structure_from_tag(compound: &TagCompound) -> Option<QueuedStructure> {
    Some(QueuedStructure {
        kind: compound.get_string("id")?.to_string(),
        anchor_slice: IVec2::new(
            compound.get_int("anchorSliceX")?,
            compound.get_int("anchorSliceY")?,
        ),
        anchor_tile: IVec2::new(
            compound.get_int("anchorTileX")?,
            compound.get_int("anchorTileY")?,
        ),
        offset: IVec2::new(
            compound.get_int("offsetX")?,
            compound.get_int("offsetY")?,
        ),
        seed: compound.get_long("seed")?,
    })
}

fn structure_to_tag(queued: &QueuedStructure) -> TagCompound {

    let mut compound = TagCompound::new();
    compound.insert("id", Tag::String(queued.kind.clone()));
    compound.insert("anchorSliceX", Tag::Int(queued.anchor_slice.x));
    compound.insert("anchorSliceY", Tag::Int(queued.anchor_slice.y));
    compound.insert("anchorTileX", Tag::Int(queued.anchor_tile.x));
    compound.insert("anchorTileY", Tag::Int(queued.anchor_tile.y));
    compound.insert("offsetX", Tag::Int(queued.offset.x));
    compound.insert("offsetY", Tag::Int(queued.offset.y));
    compound.insert("seed", Tag::Long(queued.seed));

    compound

}
