//! Vanilla structure file (`.nbt`, structure block format).
//!
//! The body is a list of positioned entries, so the encoder needs no
//! boundary up front: it tracks one from the blocks it receives.  Entries
//! are keyed by position; a later write to the same cell replaces the
//! earlier one in place, and a later air write removes it.
//!
//! # Anchoring
//! Structure files are anchored at the origin.  Positions are written
//! relative to the minimum corner of the tracked boundary (widened by the
//! boundary hint, if the sink was given one) and read back as stored.  A
//! schematic whose boundary does not start at the origin therefore comes
//! back translated; this is the format's documented lossy normalisation.
//!
//! # Boundary on read
//! `size` declares the box.  Without it, the decoder widens its boundary as
//! entries are read and only reports it final once the list is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use quartz_nbt::{NbtCompound, NbtList, NbtTag};

use crate::boundary::Boundary;
use crate::error::{Result, VoxelError};
use crate::format::{nbt, ByteOutput, Decoder, Encoder, SchematicFormat, WriteOptions};
use crate::model::{Block, BlockState, Position};

pub fn probe(root: &NbtCompound) -> bool {
    let has_list = |key| matches!(nbt::opt_tag(root, key), Some(NbtTag::List(_)));
    has_list("blocks") && (has_list("palette") || has_list("palettes"))
}

fn xyz_list(p: Position) -> NbtTag {
    NbtTag::List(NbtList::from(vec![NbtTag::Int(p.x), NbtTag::Int(p.y), NbtTag::Int(p.z)]))
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct StructureDecoder {
    root:     NbtCompound,
    palette:  Vec<Arc<BlockState>>,
    boundary: Boundary,
    sized:    bool,
    cursor:   usize,
    total:    usize,
}

impl StructureDecoder {
    pub fn from_root(root: NbtCompound) -> Result<Self> {
        let palette_list = match nbt::opt_tag(&root, "palette") {
            Some(NbtTag::List(l)) => l,
            _ => match nbt::list(&root, "palettes")?.iter().next() {
                Some(NbtTag::List(first)) => first,
                _ => return Err(VoxelError::invalid("structure: 'palettes' holds no palette")),
            },
        };
        let palette = palette_list
            .iter()
            .map(|entry| match entry {
                NbtTag::Compound(c) => nbt::state_from_compound(c).map(Arc::new),
                _ => Err(VoxelError::invalid("structure: palette entry is not a compound")),
            })
            .collect::<Result<Vec<_>>>()?;
        let total = nbt::list(&root, "blocks")?.len();

        let (boundary, sized) = match nbt::opt_tag(&root, "size") {
            Some(_) => {
                let size = nbt::xyz_array(&root, "size")?;
                let extent = |v: i32| {
                    u64::try_from(v).map_err(|_| VoxelError::invalid(format!("structure: negative size {v}")))
                };
                let b = Boundary::try_new(Position::default(), extent(size.x)?, extent(size.y)?, extent(size.z)?)
                    .ok_or_else(|| VoxelError::invalid(format!("structure: size {size} is out of range")))?;
                (b, true)
            }
            None => (Boundary::empty(), false),
        };
        debug!("structure: {total} entries, {} palette states, size declared: {sized}", palette.len());
        Ok(Self { root, palette, boundary, sized, cursor: 0, total })
    }
}

impl Decoder for StructureDecoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Structure
    }

    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn boundary_is_final(&self) -> bool {
        self.sized || self.cursor >= self.total
    }

    fn decode(&mut self, out: &mut [Block]) -> Result<usize> {
        let blocks = nbt::list(&self.root, "blocks")?;
        let mut filled = 0;
        for entry in blocks.iter().skip(self.cursor) {
            if filled == out.len() {
                break;
            }
            self.cursor += 1;
            let NbtTag::Compound(entry) = entry else {
                return Err(VoxelError::invalid("structure: block entry is not a compound"));
            };
            let id = nbt::int(entry, "state")?;
            let state = usize::try_from(id)
                .ok()
                .and_then(|i| self.palette.get(i))
                .cloned()
                .ok_or_else(|| VoxelError::invalid(format!("structure: unknown palette index {id}")))?;
            if state.is_air() {
                continue;
            }
            let position = nbt::xyz_array(entry, "pos")?;
            if !self.sized {
                self.boundary = self.boundary.expand_to_include(position);
            }
            out[filled] = Block::new(position, state);
            filled += 1;
        }
        Ok(filled)
    }
}

// ── Encoder ──────────────────────────────────────────────────────────────────

pub struct StructureEncoder {
    output:       ByteOutput,
    hint:         Option<Boundary>,
    boundary:     Boundary,
    /// First-write order; `None` once a cell has been overwritten with air.
    entries:      Vec<(Position, Option<Arc<BlockState>>)>,
    slots:        HashMap<Position, usize>,
    written:      u64,
    compression:  flate2::Compression,
    data_version: i32,
}

impl StructureEncoder {
    /// `hint`, when given, only widens the anchoring box.
    pub fn new(output: ByteOutput, hint: Option<Boundary>, options: &WriteOptions) -> Self {
        Self {
            output,
            hint,
            boundary:     Boundary::empty(),
            entries:      Vec::new(),
            slots:        HashMap::new(),
            written:      0,
            compression:  options.compression,
            data_version: options.data_version,
        }
    }

}

impl Encoder for StructureEncoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Structure
    }

    fn encode(&mut self, blocks: &[Block]) -> Result<()> {
        for block in blocks {
            self.written += 1;
            let state = (!block.state.is_air()).then(|| block.state.clone());
            if let Some(&slot) = self.slots.get(&block.position) {
                self.entries[slot].1 = state;
                continue;
            }
            if state.is_none() {
                continue;
            }
            self.boundary = self.boundary.expand_to_include(block.position);
            self.slots.insert(block.position, self.entries.len());
            self.entries.push((block.position, state));
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let StructureEncoder { mut output, hint, boundary, entries, written, compression, data_version, .. } = *self;
        let anchor = match hint {
            Some(h) => h.union(&boundary),
            None    => boundary,
        };
        let size = |d: u64| {
            i32::try_from(d).map_err(|_| VoxelError::invalid(format!("structure: {anchor} is too large to store")))
        };
        let origin = anchor.min();
        let size = if anchor.is_empty() {
            Position::default()
        } else {
            Position::new(size(anchor.d_x)?, size(anchor.d_y)?, size(anchor.d_z)?)
        };

        let mut palette: Vec<Arc<BlockState>> = Vec::new();
        let mut lookup: HashMap<Arc<BlockState>, i32> = HashMap::new();
        let mut blocks: Vec<NbtTag> = Vec::with_capacity(entries.len());
        for (p, state) in &entries {
            let Some(state) = state else { continue };
            let index = *lookup.entry(state.clone()).or_insert_with(|| {
                palette.push(state.clone());
                palette.len() as i32 - 1
            });
            let mut c = NbtCompound::new();
            c.insert("pos", xyz_list(Position::new(p.x - origin.x, p.y - origin.y, p.z - origin.z)));
            c.insert("state", NbtTag::Int(index));
            blocks.push(NbtTag::Compound(c));
        }

        let mut root = NbtCompound::new();
        root.insert("DataVersion", NbtTag::Int(data_version));
        root.insert("size", xyz_list(size));
        root.insert(
            "palette",
            NbtTag::List(NbtList::from(palette.iter().map(|s| nbt::state_to_compound(s)).collect::<Vec<NbtTag>>())),
        );
        let block_count = blocks.len();
        root.insert("blocks", NbtTag::List(NbtList::from(blocks)));
        root.insert("entities", NbtTag::List(NbtList::new()));
        nbt::write_root(&mut output, None, &root, compression)?;
        debug!(
            "structure finished: {anchor}, {} palette entries, {} entries of {written} blocks written",
            palette.len(),
            block_count
        );
        Ok(())
    }
}
