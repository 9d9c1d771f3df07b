//! Extent-sized palette-index buffer shared by the dense encoders.
//!
//! Dense formats (VXL, Sponge, Litematica, MCEdit) cannot emit a single
//! body byte before every cell is known, so they collect blocks into an
//! [`IndexGrid`]: one `u32` palette id per cell, never a full `BlockState`.
//! Id 0 is always air.  Writing a cell twice keeps the last write.
//!
//! A grid never holds more than [`MAX_GRID_CELLS`] cells; larger boxes are
//! refused with [`VoxelError::RegionTooLarge`] before anything is allocated.
//!
//! [`IndexGrid::compact`] renumbers the palette by first appearance in a
//! given cell order, so output bytes do not depend on how the caller
//! batched or ordered its writes.

use std::collections::HashMap;
use std::sync::Arc;

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::model::{Block, BlockState};

/// Upper bound on buffered cells (4 GiB of ids).
pub const MAX_GRID_CELLS: u64 = 1 << 30;

pub struct IndexGrid {
    boundary: Boundary,
    order:    AxisOrder,
    cells:    Vec<u32>,
    palette:  Vec<Arc<BlockState>>,
    lookup:   HashMap<Arc<BlockState>, u32>,
    written:  u64,
}

/// Palette renumbered by first appearance plus the old→new id table.
pub struct CompactPalette {
    pub states: Vec<Arc<BlockState>>,
    pub remap:  Vec<u32>,
}

impl IndexGrid {
    pub fn new(boundary: Boundary, order: AxisOrder) -> Result<Self> {
        let too_large = || VoxelError::RegionTooLarge { boundary, limit: MAX_GRID_CELLS };
        let volume = boundary
            .checked_volume()
            .filter(|&v| v <= MAX_GRID_CELLS)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(too_large)?;
        let mut cells = Vec::new();
        cells.try_reserve_exact(volume).map_err(|_| too_large())?;
        cells.resize(volume, 0);
        let air = BlockState::air();
        let mut lookup = HashMap::new();
        lookup.insert(air.clone(), 0);
        Ok(Self {
            boundary,
            order,
            cells,
            palette: vec![air],
            lookup,
            written: 0,
        })
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    pub fn order(&self) -> AxisOrder {
        self.order
    }

    pub fn blocks_written(&self) -> u64 {
        self.written
    }

    /// Raw palette id of every cell, in `order()`.
    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    fn id_of(&mut self, state: &Arc<BlockState>) -> u32 {
        if state.is_air() {
            return 0;
        }
        if let Some(&id) = self.lookup.get(state) {
            return id;
        }
        let id = self.palette.len() as u32;
        self.palette.push(state.clone());
        self.lookup.insert(state.clone(), id);
        id
    }

    fn cell_of(&self, block: &Block) -> Result<usize> {
        self.boundary
            .index_of(block.position, self.order)
            .map(|i| i as usize)
            .ok_or(VoxelError::PositionOutOfBounds {
                position: block.position,
                boundary: self.boundary,
            })
    }

    pub fn place(&mut self, block: &Block) -> Result<()> {
        self.place_all(std::slice::from_ref(block))
    }

    /// Place a whole batch, or nothing: every position is checked before
    /// the first cell changes.
    pub fn place_all(&mut self, blocks: &[Block]) -> Result<()> {
        let cells = blocks.iter().map(|b| self.cell_of(b)).collect::<Result<Vec<_>>>()?;
        for (block, cell) in blocks.iter().zip(cells) {
            let id = self.id_of(&block.state);
            self.cells[cell] = id;
        }
        self.written += blocks.len() as u64;
        Ok(())
    }

    /// Drop palette entries no cell references and number the rest by first
    /// appearance in cell order.  Air keeps id 0.
    pub fn compact(&self) -> CompactPalette {
        const UNSEEN: u32 = u32::MAX;
        let mut remap = vec![UNSEEN; self.palette.len()];
        let mut states = vec![self.palette[0].clone()];
        remap[0] = 0;
        for &id in &self.cells {
            let slot = &mut remap[id as usize];
            if *slot == UNSEEN {
                *slot = states.len() as u32;
                states.push(self.palette[id as usize].clone());
            }
        }
        CompactPalette { states, remap }
    }
}

/// Walk a dense body cell by cell, emitting non-air blocks into `out`.
///
/// `cursor` is the next cell to visit and survives across calls;
/// `state_at` resolves one cell index to its state.
pub fn drain_dense<F>(
    boundary: Boundary,
    order:    AxisOrder,
    cursor:   &mut u64,
    out:      &mut [Block],
    mut state_at: F,
) -> Result<usize>
where
    F: FnMut(u64) -> Result<Arc<BlockState>>,
{
    let volume = boundary.volume();
    let mut filled = 0;
    while filled < out.len() && *cursor < volume {
        let index = *cursor;
        let state = state_at(index)?;
        *cursor += 1;
        if state.is_air() {
            continue;
        }
        out[filled] = Block::new(boundary.position_at(index, order), state);
        filled += 1;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Position;

    fn block(x: i32, y: i32, z: i32, name: &str) -> Block {
        Block::new(Position::new(x, y, z), Arc::new(BlockState::from_name(name)))
    }

    #[test]
    fn last_write_wins_and_unused_entries_are_dropped() {
        let b = Boundary::new(Position::new(0, 0, 0), 2, 1, 1);
        let mut grid = IndexGrid::new(b, AxisOrder::YZX).unwrap();
        grid.place(&block(1, 0, 0, "minecraft:stone")).unwrap();
        grid.place(&block(1, 0, 0, "minecraft:dirt")).unwrap();
        grid.place(&block(0, 0, 0, "minecraft:glass")).unwrap();

        let compact = grid.compact();
        let names: Vec<_> = compact.states.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["minecraft:air", "minecraft:glass", "minecraft:dirt"]);
        assert_eq!(grid.blocks_written(), 3);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let b = Boundary::new(Position::new(0, 0, 0), 1, 1, 1);
        let mut grid = IndexGrid::new(b, AxisOrder::YZX).unwrap();
        let err = grid.place(&block(0, 1, 0, "minecraft:stone")).unwrap_err();
        assert!(matches!(err, VoxelError::PositionOutOfBounds { .. }));
    }

    #[test]
    fn rejected_batch_leaves_the_grid_untouched() {
        let b = Boundary::new(Position::new(0, 0, 0), 2, 1, 1);
        let mut grid = IndexGrid::new(b, AxisOrder::YZX).unwrap();
        grid.place(&block(0, 0, 0, "minecraft:glass")).unwrap();

        let batch = [
            block(0, 0, 0, "minecraft:stone"),
            block(1, 0, 0, "minecraft:dirt"),
            block(2, 0, 0, "minecraft:sand"),
        ];
        let err = grid.place_all(&batch).unwrap_err();
        assert!(matches!(err, VoxelError::PositionOutOfBounds { position, .. } if position == Position::new(2, 0, 0)));
        assert_eq!(grid.blocks_written(), 1);
        let compact = grid.compact();
        let names: Vec<_> = compact.states.iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["minecraft:air", "minecraft:glass"]);
        assert_eq!(grid.cells()[1], 0);
    }

    #[test]
    fn oversized_grids_are_refused_before_allocating() {
        let wide = Boundary::new(Position::new(0, 0, 0), 1 << 16, 1 << 16, 1);
        let err = IndexGrid::new(wide, AxisOrder::YZX).err().unwrap();
        assert!(matches!(err, VoxelError::RegionTooLarge { limit: MAX_GRID_CELLS, .. }));

        let overflowing = Boundary::new(Position::new(0, 0, 0), u64::MAX, 2, 2);
        let err = IndexGrid::new(overflowing, AxisOrder::YZX).err().unwrap();
        assert!(matches!(err, VoxelError::RegionTooLarge { .. }));
    }

    #[test]
    fn drain_skips_air_and_resumes() {
        let b = Boundary::new(Position::new(0, 0, 0), 4, 1, 1);
        let stone = Arc::new(BlockState::from_name("minecraft:stone"));
        let ids = [1u32, 0, 1, 1];
        let lookup = |i: u64| -> Result<Arc<BlockState>> {
            Ok(if ids[i as usize] == 0 { BlockState::air() } else { stone.clone() })
        };
        let mut cursor = 0;
        let mut out = vec![Block::default(); 2];
        assert_eq!(drain_dense(b, AxisOrder::YZX, &mut cursor, &mut out, lookup).unwrap(), 2);
        assert_eq!(out[1].position, Position::new(2, 0, 0));
        assert_eq!(drain_dense(b, AxisOrder::YZX, &mut cursor, &mut out, lookup).unwrap(), 1);
        assert_eq!(drain_dense(b, AxisOrder::YZX, &mut cursor, &mut out, lookup).unwrap(), 0);
    }
}
