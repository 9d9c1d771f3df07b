//! Legacy MCEdit / Schematica `.schematic` format.
//!
//! A dense YZX body split across three byte arrays: `Blocks` holds the low
//! eight bits of each id, `AddBlocks` (optional) the high nibble packed two
//! cells per byte, `Data` the 4-bit metadata.  Ids only mean something
//! through a mapping:
//!   - `SchematicaMapping` (state string → short id), written by us and by
//!     Schematica, round-trips full states;
//!   - `BlockIds` (state string → id as string), as some editors write it;
//!   - otherwise the numeric-era table in [`legacy`](super::legacy), which
//!     decodes the metadata nibble into modern properties.  An id that was
//!     never assigned decodes to air.
//!
//! `WEOriginX/Y/Z` carry the minimum corner when present.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use quartz_nbt::{NbtCompound, NbtTag};

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::format::legacy::legacy_state;
use crate::format::{nbt, ByteOutput, Decoder, Encoder, SchematicFormat, WriteOptions};
use crate::grid::{drain_dense, IndexGrid};
use crate::model::{Block, BlockState, Position};

/// Largest id `Blocks` + `AddBlocks` can express.
const MAX_ID: usize = 0x0FFF;

pub fn probe(root: &NbtCompound) -> bool {
    matches!(nbt::opt_tag(root, "Blocks"), Some(NbtTag::ByteArray(_)))
        && matches!(nbt::opt_tag(root, "Data"), Some(NbtTag::ByteArray(_)))
        && nbt::opt_tag(root, "Width").is_some()
}

/// Id → state from `SchematicaMapping` or `BlockIds`, whichever is present.
fn read_mapping(root: &NbtCompound) -> Result<Option<HashMap<u16, Arc<BlockState>>>> {
    let (key, entries) = match (nbt::opt_tag(root, "SchematicaMapping"), nbt::opt_tag(root, "BlockIds")) {
        (Some(NbtTag::Compound(c)), _) => ("SchematicaMapping", c),
        (_, Some(NbtTag::Compound(c))) => ("BlockIds", c),
        _ => return Ok(None),
    };
    let mut mapping = HashMap::new();
    for (text, id) in entries.inner() {
        let id = match id {
            NbtTag::Short(v)  => u16::try_from(*v).ok(),
            NbtTag::Int(v)    => u16::try_from(*v).ok(),
            NbtTag::String(s) => s.parse::<u16>().ok(),
            _ => None,
        }
        .ok_or_else(|| VoxelError::invalid(format!("MCEdit: bad {key} id for '{text}'")))?;
        mapping.insert(id, Arc::new(BlockState::parse(text)?));
    }
    Ok(Some(mapping))
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct McEditDecoder {
    boundary: Boundary,
    blocks:   Vec<u8>,
    add:      Option<Vec<u8>>,
    data:     Vec<u8>,
    mapping:  Option<HashMap<u16, Arc<BlockState>>>,
    resolved: HashMap<(u16, u8), Arc<BlockState>>,
    cell:     u64,
}

impl McEditDecoder {
    pub fn from_root(root: NbtCompound) -> Result<Self> {
        let width  = nbt::dimension(&root, "Width")?;
        let height = nbt::dimension(&root, "Height")?;
        let length = nbt::dimension(&root, "Length")?;
        let origin = Position::new(
            nbt::opt_int(&root, "WEOriginX").unwrap_or(0),
            nbt::opt_int(&root, "WEOriginY").unwrap_or(0),
            nbt::opt_int(&root, "WEOriginZ").unwrap_or(0),
        );
        let boundary = Boundary::try_new(origin, width, height, length).ok_or_else(|| {
            VoxelError::invalid(format!("MCEdit: {width}x{height}x{length} at {origin} leaves the coordinate range"))
        })?;
        let volume = usize::try_from(boundary.volume())
            .map_err(|_| VoxelError::invalid(format!("MCEdit: {boundary} is too large")))?;

        let blocks = nbt::to_u8(nbt::byte_array(&root, "Blocks")?);
        let data = nbt::to_u8(nbt::byte_array(&root, "Data")?);
        if blocks.len() != volume || data.len() != volume {
            return Err(VoxelError::invalid(format!(
                "MCEdit: expected {volume} cells, found {} ids and {} data values",
                blocks.len(),
                data.len()
            )));
        }
        let add = match nbt::opt_tag(&root, "AddBlocks") {
            Some(_) => {
                let add = nbt::to_u8(nbt::byte_array(&root, "AddBlocks")?);
                if add.len() < volume.div_ceil(2) {
                    return Err(VoxelError::invalid("MCEdit: AddBlocks shorter than the body"));
                }
                Some(add)
            }
            None => None,
        };
        let mapping = read_mapping(&root)?;
        debug!(
            "MCEdit: {boundary}, mapping: {}",
            mapping.as_ref().map_or("legacy table".to_string(), |m| format!("{} entries", m.len()))
        );
        Ok(Self { boundary, blocks, add, data, mapping, resolved: HashMap::new(), cell: 0 })
    }
}

fn resolve(mapping: Option<&HashMap<u16, Arc<BlockState>>>, id: u16, data: u8) -> Arc<BlockState> {
    if id == 0 {
        return BlockState::air();
    }
    if let Some(state) = mapping.and_then(|m| m.get(&id)) {
        return state.clone();
    }
    match legacy_state(id, data) {
        Some(state) => Arc::new(state),
        None => {
            warn!("MCEdit: unknown block id {id}:{data}, treating as air");
            BlockState::air()
        }
    }
}

impl Decoder for McEditDecoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::McEdit
    }

    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn native_order(&self) -> Option<AxisOrder> {
        Some(AxisOrder::YZX)
    }

    fn decode(&mut self, out: &mut [Block]) -> Result<usize> {
        let Self { boundary, blocks, add, data, mapping, resolved, cell } = self;
        drain_dense(*boundary, AxisOrder::YZX, cell, out, |index| {
            let i = index as usize;
            let mut id = blocks[i] as u16;
            if let Some(add) = add.as_deref() {
                let nibble = if i % 2 == 0 { add[i / 2] & 0x0F } else { add[i / 2] >> 4 };
                id |= (nibble as u16) << 8;
            }
            let meta = data[i] & 0x0F;
            let state = resolved
                .entry((id, meta))
                .or_insert_with(|| resolve(mapping.as_ref(), id, meta));
            Ok(state.clone())
        })
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct McEditEncoder {
    output:      ByteOutput,
    grid:        IndexGrid,
    compression: flate2::Compression,
}

impl McEditEncoder {
    pub fn new(output: ByteOutput, boundary: Boundary, options: &WriteOptions) -> Result<Self> {
        let limit = u16::MAX as u64;
        if boundary.d_x > limit || boundary.d_y > limit || boundary.d_z > limit {
            return Err(VoxelError::invalid(format!("MCEdit: {boundary} exceeds 65535 on an axis")));
        }
        Ok(Self {
            output,
            grid: IndexGrid::new(boundary, AxisOrder::YZX)?,
            compression: options.compression,
        })
    }
}

impl Encoder for McEditEncoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::McEdit
    }

    fn encode(&mut self, blocks: &[Block]) -> Result<()> {
        self.grid.place_all(blocks)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let McEditEncoder { mut output, grid, compression } = *self;
        let boundary = grid.boundary();
        let compact = grid.compact();
        if compact.states.len() > MAX_ID + 1 {
            return Err(VoxelError::invalid(format!(
                "MCEdit: {} distinct states exceed the {MAX_ID} id limit",
                compact.states.len() - 1
            )));
        }

        let cells = grid.cells();
        let ids: Vec<u32> = cells.iter().map(|&c| compact.remap[c as usize]).collect();
        let needs_add = compact.states.len() > 0x100;
        let mut low = Vec::with_capacity(ids.len());
        let mut add = if needs_add { vec![0u8; ids.len().div_ceil(2)] } else { Vec::new() };
        for (i, &id) in ids.iter().enumerate() {
            low.push((id & 0xFF) as u8);
            if needs_add {
                let high = ((id >> 8) & 0x0F) as u8;
                add[i / 2] |= if i % 2 == 0 { high } else { high << 4 };
            }
        }

        let mut mapping = NbtCompound::new();
        for (id, state) in compact.states.iter().enumerate() {
            mapping.insert(state.to_string(), NbtTag::Short(id as i16));
        }
        let min = boundary.min();

        let mut root = NbtCompound::new();
        root.insert("Width",     NbtTag::Short(boundary.d_x as u16 as i16));
        root.insert("Height",    NbtTag::Short(boundary.d_y as u16 as i16));
        root.insert("Length",    NbtTag::Short(boundary.d_z as u16 as i16));
        root.insert("Materials", NbtTag::String("Alpha".to_string()));
        root.insert("WEOriginX", NbtTag::Int(min.x));
        root.insert("WEOriginY", NbtTag::Int(min.y));
        root.insert("WEOriginZ", NbtTag::Int(min.z));
        root.insert("Blocks",    NbtTag::ByteArray(nbt::to_i8(low)));
        root.insert("Data",      NbtTag::ByteArray(vec![0; cells.len()]));
        if needs_add {
            root.insert("AddBlocks", NbtTag::ByteArray(nbt::to_i8(add)));
        }
        root.insert("SchematicaMapping", NbtTag::Compound(mapping));
        root.insert("Entities",     NbtTag::List(quartz_nbt::NbtList::new()));
        root.insert("TileEntities", NbtTag::List(quartz_nbt::NbtList::new()));
        nbt::write_root(&mut output, Some("Schematic"), &root, compression)?;
        debug!(
            "MCEdit finished: {boundary}, {} ids, AddBlocks: {needs_add}, {} blocks written",
            compact.states.len(),
            grid.blocks_written()
        );
        Ok(())
    }
}
