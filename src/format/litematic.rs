//! Litematica (`.litematic`).
//!
//! A `Regions` compound maps region names to boxes with their own palette
//! and a packed `BlockStates` long array.  Sizes are signed: a negative
//! extent grows from `Position` towards smaller coordinates.  Regions are
//! decoded in file order, each in YZX order over its normalised box.
//!
//! The format is not auto-detectable; callers must name it.

use std::sync::Arc;

use log::debug;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::format::{nbt, ByteOutput, Decoder, Encoder, SchematicFormat, WriteOptions};
use crate::grid::{drain_dense, IndexGrid};
use crate::model::{Block, BlockState, Position};

const LITEMATIC_VERSION: i32 = 6;
const REGION_NAME:       &str = "main";

// ── Packed bit array ─────────────────────────────────────────────────────────

/// Fixed-width unsigned entries packed into 64-bit words, low bits first.
/// Entries may straddle two words.
pub struct PackedArray {
    size:  usize,
    nbits: usize,
    mask:  u64,
    words: Vec<u64>,
}

impl PackedArray {
    /// Litematica width for a palette of `len` entries: `max(2, ceil(log2 len))`.
    pub fn bits_for(len: usize) -> usize {
        let max = len.saturating_sub(1);
        let width = (usize::BITS - max.leading_zeros()) as usize;
        width.max(2)
    }

    fn word_count(size: usize, nbits: usize) -> Option<usize> {
        size.checked_mul(nbits).map(|bits| bits.div_ceil(64))
    }

    pub fn new(size: usize, nbits: usize) -> Self {
        let words = size.saturating_mul(nbits).div_ceil(64);
        Self { size, nbits, mask: (1u64 << nbits) - 1, words: vec![0; words] }
    }

    pub fn from_longs(longs: &[i64], size: usize, nbits: usize) -> Result<Self> {
        let expected = Self::word_count(size, nbits)
            .ok_or_else(|| VoxelError::invalid(format!("Litematica: {size} cells of {nbits} bits overflow")))?;
        if longs.len() != expected {
            return Err(VoxelError::invalid(format!(
                "Litematica: BlockStates has {} longs, expected {expected}",
                longs.len()
            )));
        }
        Ok(Self {
            size,
            nbits,
            mask: (1u64 << nbits) - 1,
            words: longs.iter().map(|&w| w as u64).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn get(&self, index: usize) -> u64 {
        let start = index * self.nbits;
        let word = start >> 6;
        let end_word = ((index + 1) * self.nbits - 1) >> 6;
        let shift = start & 0x3F;
        if word == end_word {
            (self.words[word] >> shift) & self.mask
        } else {
            ((self.words[word] >> shift) | (self.words[end_word] << (64 - shift))) & self.mask
        }
    }

    pub fn set(&mut self, index: usize, value: u64) {
        let value = value & self.mask;
        let start = index * self.nbits;
        let word = start >> 6;
        let end_word = ((index + 1) * self.nbits - 1) >> 6;
        let shift = start & 0x3F;
        self.words[word] = (self.words[word] & !(self.mask << shift)) | (value << shift);
        if word != end_word {
            let spill = 64 - shift;
            let high_bits = self.nbits - spill;
            self.words[end_word] = (self.words[end_word] >> high_bits << high_bits) | (value >> spill);
        }
    }

    pub fn into_longs(self) -> Vec<i64> {
        self.words.into_iter().map(|w| w as i64).collect()
    }
}

// ── Region geometry ──────────────────────────────────────────────────────────

/// Normalise a signed Litematica `(Position, Size)` pair.  `None` when the
/// box leaves the coordinate range.
fn region_box(pos: Position, size: Position) -> Option<Boundary> {
    let axis = |p: i32, s: i32| -> Option<(i32, u64)> {
        if s >= 0 {
            Some((p, s as u64))
        } else {
            let lo = i32::try_from(p as i64 + s as i64 + 1).ok()?;
            Some((lo, s.unsigned_abs() as u64))
        }
    };
    let (x, dx) = axis(pos.x, size.x)?;
    let (y, dy) = axis(pos.y, size.y)?;
    let (z, dz) = axis(pos.z, size.z)?;
    Boundary::try_new(Position::new(x, y, z), dx, dy, dz)
}

pub fn probe(root: &NbtCompound) -> bool {
    matches!(nbt::opt_tag(root, "Regions"), Some(NbtTag::Compound(_)))
}

// ── Decoder ──────────────────────────────────────────────────────────────────

struct Region {
    boundary: Boundary,
    palette:  Vec<Arc<BlockState>>,
    states:   PackedArray,
}

pub struct LitematicDecoder {
    boundary: Boundary,
    regions:  Vec<Region>,
    current:  usize,
    cell:     u64,
}

impl LitematicDecoder {
    pub fn from_root(root: NbtCompound) -> Result<Self> {
        let regions_tag = nbt::compound(&root, "Regions")?;
        let mut regions = Vec::new();
        let mut boundary = Boundary::empty();
        for (name, tag) in regions_tag.inner() {
            let NbtTag::Compound(region) = tag else {
                return Err(VoxelError::invalid(format!("Litematica: region '{name}' is not a compound")));
            };
            let (pos, size) = (nbt::xyz_compound(region, "Position")?, nbt::xyz_compound(region, "Size")?);
            let region_boundary = region_box(pos, size).ok_or_else(|| {
                VoxelError::invalid(format!("Litematica: region '{name}' at {pos} with size {size} is out of range"))
            })?;
            let palette = nbt::list(region, "BlockStatePalette")?
                .iter()
                .map(|entry| match entry {
                    NbtTag::Compound(c) => nbt::state_from_compound(c).map(Arc::new),
                    _ => Err(VoxelError::invalid("Litematica: palette entry is not a compound")),
                })
                .collect::<Result<Vec<_>>>()?;
            if palette.is_empty() {
                return Err(VoxelError::invalid(format!("Litematica: region '{name}' has an empty palette")));
            }
            let volume = usize::try_from(region_boundary.volume())
                .map_err(|_| VoxelError::invalid("Litematica: region too large"))?;
            let states = PackedArray::from_longs(
                nbt::long_array(region, "BlockStates")?,
                volume,
                PackedArray::bits_for(palette.len()),
            )?;
            debug!("Litematica region '{name}': {region_boundary}, {} palette entries", palette.len());
            boundary = boundary.union(&region_boundary);
            regions.push(Region { boundary: region_boundary, palette, states });
        }
        Ok(Self { boundary, regions, current: 0, cell: 0 })
    }
}

impl Decoder for LitematicDecoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Litematic
    }

    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn native_order(&self) -> Option<AxisOrder> {
        // several regions interleave, so only a lone one keeps YZX order
        (self.regions.len() <= 1).then_some(AxisOrder::YZX)
    }

    fn decode(&mut self, out: &mut [Block]) -> Result<usize> {
        let mut filled = 0;
        while filled < out.len() {
            let Some(region) = self.regions.get(self.current) else { break };
            let Region { boundary, palette, states } = region;
            filled += drain_dense(*boundary, AxisOrder::YZX, &mut self.cell, &mut out[filled..], |i| {
                let id = states.get(i as usize) as usize;
                palette
                    .get(id)
                    .cloned()
                    .ok_or_else(|| VoxelError::invalid(format!("Litematica: palette id {id} out of range")))
            })?;
            if self.cell >= boundary.volume() {
                self.current += 1;
                self.cell = 0;
            }
        }
        Ok(filled)
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct LitematicEncoder {
    output:       ByteOutput,
    grid:         IndexGrid,
    compression:  flate2::Compression,
    data_version: i32,
}

impl LitematicEncoder {
    pub fn new(output: ByteOutput, boundary: Boundary, options: &WriteOptions) -> Result<Self> {
        if [boundary.d_x, boundary.d_y, boundary.d_z].iter().any(|&d| d > i32::MAX as u64) {
            return Err(VoxelError::invalid(format!("Litematica: {boundary} is too large")));
        }
        Ok(Self {
            output,
            grid: IndexGrid::new(boundary, AxisOrder::YZX)?,
            compression:  options.compression,
            data_version: options.data_version,
        })
    }
}

impl Encoder for LitematicEncoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Litematic
    }

    fn encode(&mut self, blocks: &[Block]) -> Result<()> {
        self.grid.place_all(blocks)
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let LitematicEncoder { mut output, grid, compression, data_version } = *self;
        let boundary = grid.boundary();
        let compact = grid.compact();
        let cells = grid.cells();

        let mut states = PackedArray::new(cells.len(), PackedArray::bits_for(compact.states.len()));
        let mut non_air = 0i32;
        for (i, &id) in cells.iter().enumerate() {
            let id = compact.remap[id as usize];
            if id != 0 {
                non_air += 1;
            }
            states.set(i, id as u64);
        }
        let size = Position::new(boundary.d_x as i32, boundary.d_y as i32, boundary.d_z as i32);

        let mut region = NbtCompound::new();
        region.insert("Position", nbt::xyz_compound_tag(boundary.min()));
        region.insert("Size", nbt::xyz_compound_tag(size));
        region.insert(
            "BlockStatePalette",
            NbtTag::List(NbtList::from(
                compact.states.iter().map(|s| nbt::state_to_compound(s)).collect::<Vec<NbtTag>>(),
            )),
        );
        region.insert("BlockStates", NbtTag::LongArray(states.into_longs()));
        region.insert("Entities", NbtTag::List(NbtList::new()));
        region.insert("TileEntities", NbtTag::List(NbtList::new()));
        region.insert("PendingBlockTicks", NbtTag::List(NbtList::new()));
        region.insert("PendingFluidTicks", NbtTag::List(NbtList::new()));

        let mut regions = NbtCompound::new();
        regions.insert(REGION_NAME, NbtTag::Compound(region));

        let mut metadata = NbtCompound::new();
        metadata.insert("Name", NbtTag::String(REGION_NAME.to_string()));
        metadata.insert("Author", NbtTag::String(String::new()));
        metadata.insert("Description", NbtTag::String(String::new()));
        metadata.insert("RegionCount", NbtTag::Int(1));
        metadata.insert("TotalBlocks", NbtTag::Int(non_air));
        metadata.insert("TotalVolume", NbtTag::Int(boundary.volume().min(i32::MAX as u64) as i32));
        metadata.insert("EnclosingSize", nbt::xyz_compound_tag(size));
        metadata.insert("TimeCreated", NbtTag::Long(0));
        metadata.insert("TimeModified", NbtTag::Long(0));

        let mut root = NbtCompound::new();
        root.insert("Metadata", NbtTag::Compound(metadata));
        root.insert("Regions", NbtTag::Compound(regions));
        root.insert("Version", NbtTag::Int(LITEMATIC_VERSION));
        root.insert("MinecraftDataVersion", NbtTag::Int(data_version));
        nbt::write_root(&mut output, None, &root, compression)?;
        debug!(
            "Litematica finished: {boundary}, {} palette entries, {} blocks written",
            compact.states.len(),
            grid.blocks_written()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testutil;
    use crate::format::FormatHint;

    #[test]
    fn packed_entries_straddle_words() {
        // 5 bits per entry: entry 12 spans bits 60..65
        let mut arr = PackedArray::new(40, 5);
        for i in 0..40 {
            arr.set(i, (i as u64 * 7) % 32);
        }
        for i in 0..40 {
            assert_eq!(arr.get(i), (i as u64 * 7) % 32, "entry {i}");
        }
        let longs = arr.into_longs();
        assert_eq!(longs.len(), 4);
        let back = PackedArray::from_longs(&longs, 40, 5).unwrap();
        assert_eq!(back.get(12), (12 * 7) % 32);
        assert!(PackedArray::from_longs(&longs[..3], 40, 5).is_err());
    }

    #[test]
    fn width_is_at_least_two_bits() {
        assert_eq!(PackedArray::bits_for(1), 2);
        assert_eq!(PackedArray::bits_for(4), 2);
        assert_eq!(PackedArray::bits_for(5), 3);
        assert_eq!(PackedArray::bits_for(17), 5);
    }

    #[test]
    fn negative_sizes_are_normalised() {
        let b = region_box(Position::new(5, 0, 5), Position::new(-3, 2, -1));
        assert_eq!(b, Some(Boundary::new(Position::new(3, 0, 5), 3, 2, 1)));
        assert_eq!(region_box(Position::new(i32::MIN, 0, 0), Position::new(-5, 1, 1)), None);
        assert_eq!(region_box(Position::new(i32::MAX, 0, 0), Position::new(2, 1, 1)), None);
    }

    #[test]
    fn oversized_region_headers_are_invalid() {
        let mut region = NbtCompound::new();
        region.insert("Position", nbt::xyz_compound_tag(Position::new(0, 0, 0)));
        region.insert("Size", nbt::xyz_compound_tag(Position::new(i32::MAX, i32::MAX, 2)));
        region.insert(
            "BlockStatePalette",
            NbtTag::List(NbtList::from(vec![nbt::state_to_compound(&BlockState::air())])),
        );
        region.insert("BlockStates", NbtTag::LongArray(vec![0; 4]));
        let mut regions = NbtCompound::new();
        regions.insert("huge", NbtTag::Compound(region));
        let mut root = NbtCompound::new();
        root.insert("Regions", NbtTag::Compound(regions));

        let err = LitematicDecoder::from_root(root).err().unwrap();
        assert!(matches!(err, VoxelError::InvalidFormat(_)));
    }

    #[test]
    fn round_trip_requires_explicit_hint() {
        let b = Boundary::new(Position::new(-4, 0, 0), 4, 2, 3);
        let glass = Arc::new(BlockState::from_name("minecraft:glass"));
        let blocks: Vec<Block> = b
            .iter(AxisOrder::YZX)
            .filter(|p| (p.x + p.z) % 2 == 0)
            .map(|p| Block::new(p, glass.clone()))
            .collect();
        let bytes = testutil::encode(SchematicFormat::Litematic, Some(b), &blocks);

        let (boundary, decoded) = testutil::decode(bytes.clone(), FormatHint::Exact(SchematicFormat::Litematic)).unwrap();
        assert_eq!(boundary, b);
        assert_eq!(decoded, blocks);

        assert!(matches!(
            testutil::decode(bytes, FormatHint::AutoDetect),
            Err(VoxelError::UnrecognizedFormat)
        ));
    }
}
