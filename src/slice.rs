//! A slice storing tiles, walls and light levels, the smallest addressable sub-unit
//! of a region.

use glam::IVec2;

use crate::serde::tag::TagCompound;


/// Slice size in tiles, in both X and Y directions.
pub const SLICE_SIZE: usize = 32;
/// Number of tiles in a single slice.
pub const SLICE_AREA: usize = SLICE_SIZE * SLICE_SIZE;
/// Region size in slices, in both X and Y directions.
pub const REGION_SIZE: usize = 8;
/// Number of slices in a single region.
pub const REGION_AREA: usize = REGION_SIZE * REGION_SIZE;
/// Region size in tiles, in both X and Y directions.
pub const REGION_TILES: usize = REGION_SIZE * SLICE_SIZE;


/// Calculate the index in the slice's arrays for the given slice-local position. Only
/// the relevant low bits of each component are taken.
#[inline]
fn calc_index(pos: IVec2) -> usize {
    let x = pos.x as u32 & 0b11111;
    let y = pos.y as u32 & 0b11111;
    ((y << 5) | x) as usize
}

/// Calculate the slice position corresponding to the given region-local tile position.
#[inline]
pub fn calc_slice_pos(pos: IVec2) -> IVec2 {
    IVec2::new(pos.x >> 5, pos.y >> 5)
}


/// Data structure storing every slice-local data, slices are a region subdivision of
/// 32x32 tiles.
pub struct Slice {
    /// The numeric identifier of each foreground tile.
    pub(crate) tiles: [u16; SLICE_AREA],
    /// The numeric identifier of each background wall.
    pub(crate) walls: [u8; SLICE_AREA],
    /// Light level for each tile.
    pub(crate) light: [u8; SLICE_AREA],
    /// Auxiliary per-tile records, present only for tiles that need one.
    pub(crate) tile_entities: Vec<TileEntity>,
}

impl Slice {

    /// Create a new empty slice, full of air tiles and dark.
    pub fn new() -> Box<Self> {
        Box::new(Self {
            tiles: [0; SLICE_AREA],
            walls: [0; SLICE_AREA],
            light: [0; SLICE_AREA],
            tile_entities: Vec::new(),
        })
    }

    /// Get the tile id at the given slice-local position.
    #[inline]
    pub fn tile(&self, pos: IVec2) -> u16 {
        self.tiles[calc_index(pos)]
    }

    /// Set the tile id at the given slice-local position.
    #[inline]
    pub fn set_tile(&mut self, pos: IVec2, tile: u16) {
        self.tiles[calc_index(pos)] = tile;
    }

    /// Get the wall id at the given slice-local position.
    #[inline]
    pub fn wall(&self, pos: IVec2) -> u8 {
        self.walls[calc_index(pos)]
    }

    /// Set the wall id at the given slice-local position.
    #[inline]
    pub fn set_wall(&mut self, pos: IVec2, wall: u8) {
        self.walls[calc_index(pos)] = wall;
    }

    /// Get the light level at the given slice-local position.
    #[inline]
    pub fn light(&self, pos: IVec2) -> u8 {
        self.light[calc_index(pos)]
    }

    /// Set the light level at the given slice-local position.
    #[inline]
    pub fn set_light(&mut self, pos: IVec2, level: u8) {
        self.light[calc_index(pos)] = level;
    }

    /// The tile entities recorded in this slice.
    #[inline]
    pub fn tile_entities(&self) -> &[TileEntity] {
        &self.tile_entities
    }

    /// Record a tile entity in this slice.
    pub fn add_tile_entity(&mut self, tile_entity: TileEntity) {
        self.tile_entities.push(tile_entity);
    }

}

/// An auxiliary record attached to a single tile of a slice, its payload is an opaque
/// container interpreted by the tile registries, outside of this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct TileEntity {
    /// Slice-local X position of the owning tile.
    pub x: u8,
    /// Slice-local Y position of the owning tile.
    pub y: u8,
    /// Identifier of the tile entity kind.
    pub kind: String,
    /// Opaque payload.
    pub data: TagCompound,
}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn index_layout() {

        let mut slice = Slice::new();
        slice.set_tile(IVec2::new(0, 0), 1);
        slice.set_tile(IVec2::new(31, 0), 2);
        slice.set_tile(IVec2::new(0, 31), 3);
        slice.set_tile(IVec2::new(31, 31), 4);

        assert_eq!(slice.tiles[0], 1);
        assert_eq!(slice.tiles[31], 2);
        assert_eq!(slice.tiles[31 * 32], 3);
        assert_eq!(slice.tiles[SLICE_AREA - 1], 4);

    }

    #[test]
    fn slice_pos() {
        assert_eq!(calc_slice_pos(IVec2::new(0, 0)), IVec2::new(0, 0));
        assert_eq!(calc_slice_pos(IVec2::new(31, 31)), IVec2::new(0, 0));
        assert_eq!(calc_slice_pos(IVec2::new(32, 63)), IVec2::new(1, 1));
        assert_eq!(calc_slice_pos(IVec2::new(255, 255)), IVec2::new(7, 7));
    }

}
