//! Sponge schematic, versions 1 to 3.
//!
//! v1/v2 keep everything at the root (`Palette`, `PaletteMax`, `BlockData`);
//! v2 adds `DataVersion`.  v3 nests under `Schematic` with
//! `Blocks { Palette, Data }`.  The body is a varint array of palette ids in
//! YZX order relative to `Offset`.

use std::sync::Arc;

use log::debug;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::format::{nbt, ByteOutput, Decoder, Encoder, SchematicFormat, WriteOptions};
use crate::grid::{drain_dense, IndexGrid};
use crate::model::{Block, BlockState, Position};
use crate::varint;

fn format_for(version: i32) -> SchematicFormat {
    match version {
        1 => SchematicFormat::SpongeV1,
        2 => SchematicFormat::SpongeV2,
        _ => SchematicFormat::SpongeV3,
    }
}

/// The compound holding the schematic fields for `version`.
fn body(root: &NbtCompound, version: i32) -> Option<&NbtCompound> {
    if version == 3 {
        nbt::compound(root, "Schematic").ok()
    } else {
        Some(root)
    }
}

pub fn probe(root: &NbtCompound, version: i32) -> bool {
    let Some(schematic) = body(root, version) else { return false };
    let declared = nbt::opt_int(schematic, "Version");
    match version {
        3 => declared == Some(3) || (declared.is_none() && nbt::opt_tag(schematic, "Blocks").is_some()),
        v => {
            let has_body = nbt::opt_tag(schematic, "Palette").is_some()
                && nbt::opt_tag(schematic, "BlockData").is_some();
            has_body && (declared == Some(v) || (v == 1 && declared.is_none()))
        }
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct SpongeDecoder {
    format:   SchematicFormat,
    boundary: Boundary,
    palette:  Vec<Option<Arc<BlockState>>>,
    data:     Vec<u8>,
    byte_pos: usize,
    cell:     u64,
}

impl SpongeDecoder {
    pub fn from_root(root: NbtCompound, version: i32) -> Result<Self> {
        let schematic = body(&root, version)
            .ok_or_else(|| VoxelError::invalid("Sponge: missing 'Schematic' compound"))?;
        let width  = nbt::dimension(schematic, "Width")?;
        let height = nbt::dimension(schematic, "Height")?;
        let length = nbt::dimension(schematic, "Length")?;
        let offset = match nbt::opt_tag(schematic, "Offset") {
            Some(_) => nbt::xyz_array(schematic, "Offset")?,
            None    => Position::default(),
        };
        let boundary = Boundary::try_new(offset, width, height, length).ok_or_else(|| {
            VoxelError::invalid(format!("Sponge: {width}x{height}x{length} at {offset} leaves the coordinate range"))
        })?;

        let (palette_tag, data) = if version == 3 {
            let blocks = nbt::compound(schematic, "Blocks")?;
            (nbt::compound(blocks, "Palette")?, nbt::byte_array(blocks, "Data")?)
        } else {
            (nbt::compound(schematic, "Palette")?, nbt::byte_array(schematic, "BlockData")?)
        };

        // Ids are dense, so none may reach the entry count.
        let entries = palette_tag.inner().len();
        let mut palette: Vec<Option<Arc<BlockState>>> = vec![None; entries];
        for (text, id) in palette_tag.inner() {
            let id = match id {
                NbtTag::Int(v) if *v >= 0 && (*v as usize) < entries => *v as usize,
                _ => return Err(VoxelError::invalid(format!(
                    "Sponge: palette id for '{text}' is not below the palette size {entries}"
                ))),
            };
            palette[id] = Some(Arc::new(BlockState::parse(text)?));
        }
        debug!("Sponge v{version}: {boundary}, {} palette entries", palette.len());
        Ok(Self {
            format: format_for(version),
            boundary,
            palette,
            data: nbt::to_u8(data),
            byte_pos: 0,
            cell: 0,
        })
    }
}

impl Decoder for SpongeDecoder {
    fn format(&self) -> SchematicFormat {
        self.format
    }

    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn native_order(&self) -> Option<AxisOrder> {
        Some(AxisOrder::YZX)
    }

    fn decode(&mut self, out: &mut [Block]) -> Result<usize> {
        let Self { boundary, palette, data, byte_pos, cell, .. } = self;
        drain_dense(*boundary, AxisOrder::YZX, cell, out, |_| {
            let id = varint::decode_at(data, byte_pos)? as usize;
            palette
                .get(id)
                .and_then(Option::clone)
                .ok_or_else(|| VoxelError::invalid(format!("Sponge: unknown palette id {id}")))
        })
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct SpongeEncoder {
    output:       ByteOutput,
    version:      i32,
    grid:         IndexGrid,
    compression:  flate2::Compression,
    data_version: i32,
}

impl SpongeEncoder {
    pub fn new(output: ByteOutput, boundary: Boundary, version: i32, options: &WriteOptions) -> Result<Self> {
        let limit = u16::MAX as u64;
        if boundary.d_x > limit || boundary.d_y > limit || boundary.d_z > limit {
            return Err(VoxelError::invalid(format!("Sponge: {boundary} exceeds 65535 on an axis")));
        }
        Ok(Self {
            output,
            version,
            grid: IndexGrid::new(boundary, AxisOrder::YZX)?,
            compression:  options.compression,
            data_version: options.data_version,
        })
    }
}

impl Encoder for SpongeEncoder {
    fn format(&self) -> SchematicFormat {
        format_for(self.version)
    }

    fn encode(&mut self, blocks: &[Block]) -> Result<()> {
        self.grid.place_all(blocks)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let SpongeEncoder { mut output, version, grid, compression, data_version } = *self;
        let boundary = grid.boundary();
        let compact = grid.compact();

        let mut data = Vec::with_capacity(grid.cells().len());
        for &id in grid.cells() {
            varint::push_u32(&mut data, compact.remap[id as usize]);
        }
        let mut palette = NbtCompound::new();
        for (id, state) in compact.states.iter().enumerate() {
            palette.insert(state.to_string(), NbtTag::Int(id as i32));
        }
        let min = boundary.min();

        let mut schematic = NbtCompound::new();
        schematic.insert("Version", NbtTag::Int(version));
        if version >= 2 {
            schematic.insert("DataVersion", NbtTag::Int(data_version));
        }
        schematic.insert("Width",  NbtTag::Short(boundary.d_x as u16 as i16));
        schematic.insert("Height", NbtTag::Short(boundary.d_y as u16 as i16));
        schematic.insert("Length", NbtTag::Short(boundary.d_z as u16 as i16));
        schematic.insert("Offset", NbtTag::IntArray(vec![min.x, min.y, min.z]));

        let written = grid.blocks_written();
        let palette_len = compact.states.len();
        if version == 3 {
            let mut blocks = NbtCompound::new();
            blocks.insert("Palette", NbtTag::Compound(palette));
            blocks.insert("Data", NbtTag::ByteArray(nbt::to_i8(data)));
            blocks.insert("BlockEntities", NbtTag::List(NbtList::new()));
            schematic.insert("Blocks", NbtTag::Compound(blocks));
            let mut root = NbtCompound::new();
            root.insert("Schematic", NbtTag::Compound(schematic));
            nbt::write_root(&mut output, None, &root, compression)?;
        } else {
            schematic.insert("PaletteMax", NbtTag::Int(palette_len as i32));
            schematic.insert("Palette", NbtTag::Compound(palette));
            schematic.insert("BlockData", NbtTag::ByteArray(nbt::to_i8(data)));
            schematic.insert("BlockEntities", NbtTag::List(NbtList::new()));
            nbt::write_root(&mut output, Some("Schematic"), &schematic, compression)?;
        }
        debug!("Sponge v{version} finished: {boundary}, {palette_len} palette entries, {written} blocks written");
        Ok(())
    }
}
