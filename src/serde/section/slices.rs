//! Codec for the generated flag, the slice grids and their tile entities.

use glam::IVec2;

use crate::region::RegionRecord;
use crate::slice::{REGION_SIZE, SLICE_AREA, TileEntity};
use crate::serde::tag::{Tag, TagCompound};

use super::{SectionCodec, SectionError, GENERATED_KEY};


/// Reads and writes the `generated` flag and one `slice{x}_{y}` sub-compound per
/// slice, each holding `tiles`, `walls`, `light` arrays and an optional
/// `tileEntities` list. Slice data is only materialized for generated regions.
pub struct SliceCodec;

impl SectionCodec for SliceCodec {

    fn name(&self) -> &'static str {
        "slices"
    }

    fn read_section(
        &self,
        region: &RegionRecord,
        root: &TagCompound,
        generated: bool,
    ) -> Result<(), SectionError> {

        if !generated {
            // Slices are meaningless for an ungenerated region.
            return Ok(());
        }

        {
            let mut content = region.content();

            for sy in 0..REGION_SIZE as i32 {
                for sx in 0..REGION_SIZE as i32 {

                    let key = slice_key(sx, sy);
                    let compound = root.get_compound(&key)
                        .ok_or_else(|| SectionError::Key(key.clone()))?;

                    let slice = content.ensure_slice(IVec2::new(sx, sy));

                    let tiles = compound.get_byte_array("tiles")
                        .filter(|buf| buf.len() == SLICE_AREA * 2)
                        .ok_or_else(|| SectionError::Key(format!("{key}/tiles")))?;
                    for (i, pair) in tiles.chunks_exact(2).enumerate() {
                        slice.tiles[i] = u16::from_be_bytes([pair[0], pair[1]]);
                    }

                    let walls = compound.get_byte_array("walls")
                        .filter(|buf| buf.len() == SLICE_AREA)
                        .ok_or_else(|| SectionError::Key(format!("{key}/walls")))?;
                    slice.walls.copy_from_slice(walls);

                    let light = compound.get_byte_array("light")
                        .filter(|buf| buf.len() == SLICE_AREA)
                        .ok_or_else(|| SectionError::Key(format!("{key}/light")))?;
                    slice.light.copy_from_slice(light);

                    slice.tile_entities.clear();
                    if let Some(entities) = compound.get_list("tileEntities") {
                        for entity in entities {
                            let entity = entity.as_compound()
                                .ok_or_else(|| SectionError::Key(format!("{key}/tileEntities/[]")))?;
                            slice.tile_entities.push(tile_entity_from_tag(&key, entity)?);
                        }
                    }

                }
            }
        }

        // All slices are populated at this point, the flag can be published.
        region.mark_generated();
        Ok(())

    }

    fn write_section(
        &self,
        region: &RegionRecord,
        root: &mut TagCompound,
        generated: bool,
    ) -> Result<(), SectionError> {

        root.insert(GENERATED_KEY, Tag::Byte(generated as i8));

        if !generated {
            return Ok(());
        }

        let content = region.content();

        for sy in 0..REGION_SIZE as i32 {
            for sx in 0..REGION_SIZE as i32 {

                let key = slice_key(sx, sy);
                let slice = content.slice(IVec2::new(sx, sy))
                    .ok_or_else(|| SectionError::Key(key.clone()))?;

                let mut tiles = Vec::with_capacity(SLICE_AREA * 2);
                for tile in slice.tiles {
                    tiles.extend_from_slice(&tile.to_be_bytes());
                }

                let mut compound = TagCompound::new();
                compound.insert("tiles", Tag::ByteArray(tiles));
                compound.insert("walls", Tag::ByteArray(slice.walls.to_vec()));
                compound.insert("light", Tag::ByteArray(slice.light.to_vec()));

                if !slice.tile_entities.is_empty() {
                    let entities = slice.tile_entities.iter()
                        .map(|entity| Tag::Compound(tile_entity_to_tag(entity)))
                        .collect();
                    compound.insert("tileEntities", Tag::List(entities));
                }

                root.insert(key, Tag::Compound(compound));

            }
        }

        Ok(())

    }

}

#[inline]
fn slice_key(sx: i32, sy: i32) -> String {
    format!("slice{sx}_{sy}")
}

fn tile_entity_from_tag(slice_key: &str, compound: &TagCompound) -> Result<TileEntity, SectionError> {

    let key_err = |field| SectionError::Key(format!("{slice_key}/tileEntities/{field}"));

    Ok(TileEntity {
        x: compound.get_byte("x").ok_or_else(|| key_err("x"))? as u8,
        y: compound.get_byte("y").ok_or_else(|| key_err("y"))? as u8,
        kind: compound.get_string("id").ok_or_else(|| key_err("id"))?.to_string(),
        data: compound.get_compound("data").cloned().unwrap_or_default(),
    })

}

fn tile_entity_to_tag(entity: &TileEntity) -> TagCompound {

    let mut compound = TagCompound::new();
    compound.insert("x", Tag::Byte(entity.x as i8));
    compound.insert("y", Tag::Byte(entity.y as i8));
    compound.insert("id", Tag::String(entity.kind.clone()));
    if !entity.data.is_empty() {
        compound.insert("data", Tag::Compound(entity.data.clone()));
    }

    compound

}
