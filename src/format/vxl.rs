//! VXL: the compact custom format.
//!
//! # Layout
//! ```text
//! magic      6 bytes   "VXLDRM"
//! version    u16 BE    2
//! boundary   6 × zig-zag varint   min x, y, z, extent x, y, z
//! axis order u8        see AxisOrder::to_byte
//! body       instruction stream covering exactly `volume` cells
//! crc        u32 BE    CRC-32 of the body bytes
//! ```
//!
//! # Instructions
//! Each instruction starts with a varint `op`:
//!   - `0`: define the next palette entry from a full state string.
//!   - `1`: define the next palette entry as an existing id plus property
//!     overrides (`k=v,k=v`).
//!   - even `op ≥ 2`: one cell of palette entry `op`.
//!   - odd `op ≥ 3`: a run of entry `op - 1`; a varint run length follows.
//!
//! Palette entries get ids 2, 4, 6, ... in definition order.  Air cells are
//! encoded like any other state but never surface as decoded blocks.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::format::{ByteInput, ByteOutput, Decoder, Encoder, SchematicFormat, WriteOptions};
use crate::grid::IndexGrid;
use crate::model::{Block, BlockState, Position};
use crate::varint;

pub const MAGIC:   &[u8; 6] = b"VXLDRM";
pub const VERSION: u16      = 2;

const OP_DEFINE:  u32 = 0;
const OP_DERIVE:  u32 = 1;

// ── CRC plumbing ─────────────────────────────────────────────────────────────

struct CrcReader<R> {
    inner:  R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

struct CrcWriter<W> {
    inner:  W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = varint::read_u32(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(VoxelError::from_read)?;
    String::from_utf8(buf).map_err(|e| VoxelError::invalid(format!("VXL: bad UTF-8 string: {e}")))
}

fn write_string<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    varint::write_u32(w, s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn parse_overrides(base: &BlockState, diff: &str) -> Result<BlockState> {
    let mut state = base.clone();
    for pair in diff.split(',').filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| VoxelError::invalid(format!("VXL: malformed override '{pair}'")))?;
        state = state.with_property(k, v);
    }
    Ok(state)
}

/// Overrides turning `base` into `target`, if `target` only changes or adds
/// properties of the same block type.
fn overrides(base: &BlockState, target: &BlockState) -> Option<BTreeMap<String, String>> {
    if base.name() != target.name() {
        return None;
    }
    if base.properties().keys().any(|k| !target.properties().contains_key(k)) {
        return None;
    }
    Some(
        target
            .properties()
            .iter()
            .filter(|(k, v)| base.property(k) != Some(v.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

// ── Decoder ──────────────────────────────────────────────────────────────────

pub struct VxlDecoder {
    reader:    CrcReader<BufReader<ByteInput>>,
    boundary:  Boundary,
    order:     AxisOrder,
    palette:   Vec<Arc<BlockState>>,
    run_state: Option<Arc<BlockState>>,
    run_left:  u64,
    cell:      u64,
    verified:  bool,
}

impl VxlDecoder {
    /// Parse the header; the body is decoded lazily.
    pub fn new(input: ByteInput) -> Result<Self> {
        let mut r = BufReader::new(input);
        let mut magic = [0u8; 6];
        r.read_exact(&mut magic).map_err(VoxelError::from_read)?;
        if &magic != MAGIC {
            return Err(VoxelError::invalid("VXL: bad magic"));
        }
        let version = r.read_u16::<BigEndian>().map_err(VoxelError::from_read)?;
        if version != VERSION {
            return Err(VoxelError::invalid(format!("VXL: unsupported version {version}")));
        }
        let min = Position::new(varint::read_i32(&mut r)?, varint::read_i32(&mut r)?, varint::read_i32(&mut r)?);
        let mut extent = [0u64; 3];
        for e in &mut extent {
            let v = varint::read_i32(&mut r)?;
            *e = u64::try_from(v).map_err(|_| VoxelError::invalid(format!("VXL: negative extent {v}")))?;
        }
        let order_byte = r.read_u8().map_err(VoxelError::from_read)?;
        let order = AxisOrder::from_byte(order_byte)
            .ok_or_else(|| VoxelError::invalid(format!("VXL: unknown axis order {order_byte}")))?;
        let boundary = Boundary::try_new(min, extent[0], extent[1], extent[2]).ok_or_else(|| {
            VoxelError::invalid(format!(
                "VXL: {}x{}x{} at {min} leaves the coordinate range",
                extent[0], extent[1], extent[2]
            ))
        })?;
        debug!("VXL header: {boundary}, order {order}");
        Ok(Self {
            reader: CrcReader { inner: r, hasher: crc32fast::Hasher::new() },
            boundary,
            order,
            palette:   Vec::new(),
            run_state: None,
            run_left:  0,
            cell:      0,
            verified:  false,
        })
    }

    fn lookup(&self, id: u32) -> Result<Arc<BlockState>> {
        (id / 2)
            .checked_sub(1)
            .and_then(|slot| self.palette.get(slot as usize))
            .cloned()
            .ok_or_else(|| VoxelError::invalid(format!("VXL: unknown palette id {id}")))
    }

    /// Consume definitions until the next cell instruction.
    fn next_run(&mut self) -> Result<()> {
        loop {
            let op = varint::read_u32(&mut self.reader)?;
            match op {
                OP_DEFINE => {
                    let text = read_string(&mut self.reader)?;
                    self.palette.push(Arc::new(BlockState::parse(&text)?));
                }
                OP_DERIVE => {
                    let base_id = varint::read_u32(&mut self.reader)?;
                    let base = self.lookup(base_id)?;
                    let diff = read_string(&mut self.reader)?;
                    self.palette.push(Arc::new(parse_overrides(&base, &diff)?));
                }
                id => {
                    let (id, len) = if id & 1 == 1 {
                        (id - 1, varint::read_u32(&mut self.reader)? as u64)
                    } else {
                        (id, 1)
                    };
                    if len == 0 || self.cell + len > self.boundary.volume() {
                        return Err(VoxelError::invalid("VXL: run overflows the declared volume"));
                    }
                    self.run_state = Some(self.lookup(id)?);
                    self.run_left = len;
                    return Ok(());
                }
            }
        }
    }

    fn verify_trailer(&mut self) -> Result<()> {
        if self.verified {
            return Ok(());
        }
        let expected = self.reader.inner.read_u32::<BigEndian>().map_err(VoxelError::from_read)?;
        let actual = self.reader.hasher.clone().finalize();
        if expected != actual {
            return Err(VoxelError::invalid(format!(
                "VXL: body CRC mismatch (stored {expected:08x}, computed {actual:08x})"
            )));
        }
        trace!("VXL body CRC ok ({actual:08x})");
        self.verified = true;
        Ok(())
    }
}

impl Decoder for VxlDecoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Vxl
    }

    fn boundary(&self) -> Boundary {
        self.boundary
    }

    fn native_order(&self) -> Option<AxisOrder> {
        Some(self.order)
    }

    fn decode(&mut self, out: &mut [Block]) -> Result<usize> {
        let volume = self.boundary.volume();
        let mut filled = 0;
        while filled < out.len() {
            if self.run_left == 0 {
                if self.cell == volume {
                    self.verify_trailer()?;
                    break;
                }
                self.next_run()?;
            }
            let state = match &self.run_state {
                Some(s) => s.clone(),
                None => return Err(VoxelError::invalid("VXL: cell before any palette entry")),
            };
            if state.is_air() {
                self.cell += self.run_left;
                self.run_left = 0;
                continue;
            }
            let take = self.run_left.min((out.len() - filled) as u64);
            for _ in 0..take {
                out[filled] = Block::new(self.boundary.position_at(self.cell, self.order), state.clone());
                self.cell += 1;
                filled += 1;
            }
            self.run_left -= take;
        }
        Ok(filled)
    }
}

// ── Body writer ──────────────────────────────────────────────────────────────

/// Run-length body emitter shared by both encoder modes.  Equal neighbours
/// merge into one run; a state is defined the first time a run uses it.
struct BodyWriter<W: Write> {
    out:     CrcWriter<W>,
    defined: Vec<Arc<BlockState>>,
    ids:     HashMap<Arc<BlockState>, u32>,
    pending: Option<(Arc<BlockState>, u64)>,
}

impl<W: Write> BodyWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            out:     CrcWriter { inner, hasher: crc32fast::Hasher::new() },
            defined: Vec::new(),
            ids:     HashMap::new(),
            pending: None,
        }
    }

    fn push(&mut self, state: &Arc<BlockState>, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if let Some((current, n)) = &mut self.pending {
            if current == state {
                *n += count;
                return Ok(());
            }
        }
        if let Some((current, n)) = self.pending.take() {
            self.emit(&current, n)?;
        }
        self.pending = Some((state.clone(), count));
        Ok(())
    }

    /// Palette id of `state`, writing its definition on first use.
    fn id_of(&mut self, state: &Arc<BlockState>) -> Result<u32> {
        if let Some(&id) = self.ids.get(state) {
            return Ok(id);
        }
        let base = self
            .defined
            .iter()
            .enumerate()
            .filter_map(|(i, d)| overrides(d, state).map(|o| (i, o)))
            .min_by_key(|(_, o)| o.len());
        match base {
            Some((i, diff)) if diff.len() < state.properties().len() => {
                let text = diff
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join(",");
                varint::write_u32(&mut self.out, OP_DERIVE)?;
                varint::write_u32(&mut self.out, (i as u32 + 1) * 2)?;
                write_string(&mut self.out, &text)?;
            }
            _ => {
                varint::write_u32(&mut self.out, OP_DEFINE)?;
                write_string(&mut self.out, &state.to_string())?;
            }
        }
        let id = (self.defined.len() as u32 + 1) * 2;
        self.defined.push(state.clone());
        self.ids.insert(state.clone(), id);
        Ok(id)
    }

    fn emit(&mut self, state: &Arc<BlockState>, mut count: u64) -> Result<()> {
        let id = self.id_of(state)?;
        while count > 0 {
            let run = count.min(u32::MAX as u64);
            if run == 1 {
                varint::write_u32(&mut self.out, id)?;
            } else {
                varint::write_u32(&mut self.out, id + 1)?;
                varint::write_u32(&mut self.out, run as u32)?;
            }
            count -= run;
        }
        Ok(())
    }

    /// Flush the open run and append the CRC trailer.  Returns the number
    /// of palette entries defined.
    fn finish(mut self) -> Result<usize> {
        if let Some((current, n)) = self.pending.take() {
            self.emit(&current, n)?;
        }
        let crc = self.out.hasher.finalize();
        let mut w = self.out.inner;
        w.write_u32::<BigEndian>(crc)?;
        w.flush()?;
        Ok(self.defined.len())
    }
}

fn write_header<W: Write>(w: &mut W, boundary: Boundary, order: AxisOrder) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_u16::<BigEndian>(VERSION)?;
    let min = boundary.min();
    for v in [min.x, min.y, min.z] {
        varint::write_i32(w, v)?;
    }
    for d in [boundary.d_x, boundary.d_y, boundary.d_z] {
        varint::write_i32(w, d as i32)?;
    }
    w.write_u8(order.to_byte())?;
    Ok(())
}

// ── Encoder ──────────────────────────────────────────────────────────────────

/// Body strategy.  Ordered input streams straight to the output; anything
/// else is collected in a grid and emitted at finish.
enum Mode {
    Buffered { output: ByteOutput, grid: IndexGrid },
    Streaming { body: BodyWriter<BufWriter<ByteOutput>>, next: u64, written: u64 },
}

pub struct VxlEncoder {
    boundary: Boundary,
    order:    AxisOrder,
    mode:     Mode,
}

impl VxlEncoder {
    /// With `options.ordered_input` the header is written immediately and
    /// each batch is emitted as it arrives.
    pub fn new(output: ByteOutput, boundary: Boundary, options: &WriteOptions) -> Result<Self> {
        let fits = [boundary.d_x, boundary.d_y, boundary.d_z].iter().all(|&d| d <= i32::MAX as u64);
        if !fits || boundary.checked_volume().is_none() {
            return Err(VoxelError::invalid(format!("VXL: {boundary} does not fit the header")));
        }
        let order = options.axis_order;
        let mode = if options.ordered_input {
            let mut w = BufWriter::new(output);
            write_header(&mut w, boundary, order)?;
            debug!("VXL streaming body for {boundary}, order {order}");
            Mode::Streaming { body: BodyWriter::new(w), next: 0, written: 0 }
        } else {
            Mode::Buffered { output, grid: IndexGrid::new(boundary, order)? }
        };
        Ok(Self { boundary, order, mode })
    }
}

impl Encoder for VxlEncoder {
    fn format(&self) -> SchematicFormat {
        SchematicFormat::Vxl
    }

    fn encode(&mut self, blocks: &[Block]) -> Result<()> {
        let VxlEncoder { boundary, order, mode } = self;
        match mode {
            Mode::Buffered { grid, .. } => grid.place_all(blocks),
            Mode::Streaming { body, next, written } => {
                // validate the whole batch before emitting any of it
                let mut cursor = *next;
                let mut cells = Vec::with_capacity(blocks.len());
                for block in blocks {
                    let index = boundary.index_of(block.position, *order).ok_or(
                        VoxelError::PositionOutOfBounds { position: block.position, boundary: *boundary },
                    )?;
                    if index < cursor {
                        return Err(VoxelError::invalid(format!(
                            "VXL: {} arrives out of {order} order",
                            block.position
                        )));
                    }
                    cells.push(index);
                    cursor = index + 1;
                }
                let air = BlockState::air();
                for (block, index) in blocks.iter().zip(cells) {
                    body.push(&air, index - *next)?;
                    // every air variant shares the canonical entry, as in the grid
                    body.push(if block.state.is_air() { &air } else { &block.state }, 1)?;
                    *next = index + 1;
                }
                *written += blocks.len() as u64;
                Ok(())
            }
        }
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let VxlEncoder { boundary, order, mode } = *self;
        let (entries, written) = match mode {
            Mode::Buffered { output, grid } => {
                let mut w = BufWriter::new(output);
                write_header(&mut w, boundary, order)?;
                let compact = grid.compact();
                let mut body = BodyWriter::new(w);
                let cells = grid.cells();
                let mut i = 0;
                while i < cells.len() {
                    let id = cells[i];
                    let mut run = 1;
                    while i + run < cells.len() && cells[i + run] == id {
                        run += 1;
                    }
                    body.push(&compact.states[compact.remap[id as usize] as usize], run as u64)?;
                    i += run;
                }
                (body.finish()?, grid.blocks_written())
            }
            Mode::Streaming { mut body, next, written } => {
                body.push(&BlockState::air(), boundary.volume() - next)?;
                (body.finish()?, written)
            }
        };
        debug!("VXL finished: {boundary}, {entries} palette entries, {written} blocks written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testutil;
    use crate::format::FormatHint;
    use std::io::Cursor;

    fn encode(boundary: Boundary, blocks: &[Block]) -> Vec<u8> {
        testutil::encode(SchematicFormat::Vxl, Some(boundary), blocks)
    }

    fn decode_all(bytes: Vec<u8>) -> Result<Vec<Block>> {
        testutil::decode(bytes, FormatHint::Exact(SchematicFormat::Vxl)).map(|(_, blocks)| blocks)
    }

    fn log(axis: &str) -> Arc<BlockState> {
        Arc::new(BlockState::from_name("minecraft:oak_log").with_property("axis", axis))
    }

    #[test]
    fn round_trip_with_derived_entries() {
        let b = Boundary::new(Position::new(-1, 0, 2), 3, 3, 1);
        let blocks = vec![
            Block::new(Position::new(0, 0, 2), log("y")),
            Block::new(Position::new(0, 1, 2), log("x")),
            Block::new(Position::new(0, 2, 2), log("z")),
            Block::new(Position::new(1, 2, 2), log("z")),
        ];
        let bytes = encode(b, &blocks);
        assert_eq!(&bytes[..6], MAGIC);
        let decoded = decode_all(bytes).unwrap();
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn empty_volume_has_only_a_trailer() {
        let bytes = encode(Boundary::empty(), &[]);
        assert!(decode_all(bytes).unwrap().is_empty());
    }

    #[test]
    fn corrupt_body_fails_crc() {
        let b = Boundary::new(Position::new(0, 0, 0), 2, 1, 1);
        let stone = Arc::new(BlockState::from_name("minecraft:stone"));
        let mut bytes = encode(b, &[Block::new(Position::new(0, 0, 0), stone)]);
        // flip a byte inside the state string
        let at = bytes.windows(5).position(|w| w == b"stone").unwrap();
        bytes[at] = b'x';
        assert!(matches!(decode_all(bytes), Err(VoxelError::InvalidFormat(_))));
    }

    #[test]
    fn bad_magic_and_version() {
        assert!(matches!(
            VxlDecoder::new(Box::new(Cursor::new(b"VXLDRX\0\x02".to_vec()))),
            Err(VoxelError::InvalidFormat(_))
        ));
        assert!(matches!(
            VxlDecoder::new(Box::new(Cursor::new(b"VXLDRM\0\x09".to_vec()))),
            Err(VoxelError::InvalidFormat(_))
        ));
    }

    fn encode_with(boundary: Boundary, blocks: &[Block], options: WriteOptions) -> Result<Vec<u8>> {
        let out = testutil::SharedBuf::default();
        let mut enc = crate::format::open_encoder(Box::new(out.clone()), SchematicFormat::Vxl, Some(boundary), &options)?;
        for batch in blocks.chunks(3) {
            enc.encode(batch)?;
        }
        enc.finish()?;
        Ok(out.bytes())
    }

    #[test]
    fn streaming_and_buffered_bodies_are_identical() {
        let b = Boundary::new(Position::new(-3, 0, 4), 5, 4, 3);
        let cave_air = Arc::new(BlockState::from_name("minecraft:cave_air"));
        let glass = Arc::new(BlockState::from_name("minecraft:glass"));
        for axis_order in AxisOrder::ALL {
            let blocks: Vec<Block> = b
                .iter(axis_order)
                .enumerate()
                .filter(|(i, _)| i % 7 != 3)
                .map(|(i, p)| {
                    let state = match i % 5 {
                        0 => log("x"),
                        1 => log("z"),
                        2 => cave_air.clone(),
                        _ => glass.clone(),
                    };
                    Block::new(p, state)
                })
                .collect();
            let buffered = encode_with(b, &blocks, WriteOptions { axis_order, ..WriteOptions::default() }).unwrap();
            let streamed = encode_with(
                b,
                &blocks,
                WriteOptions { axis_order, ordered_input: true, ..WriteOptions::default() },
            )
            .unwrap();
            assert_eq!(streamed, buffered, "{axis_order}");
        }
    }

    #[test]
    fn streaming_rejects_out_of_order_blocks() {
        let b = Boundary::new(Position::new(0, 0, 0), 4, 1, 1);
        let stone = Arc::new(BlockState::from_name("minecraft:stone"));
        let options = WriteOptions { ordered_input: true, ..WriteOptions::default() };
        let blocks = [
            Block::new(Position::new(2, 0, 0), stone.clone()),
            Block::new(Position::new(1, 0, 0), stone),
        ];
        let err = encode_with(b, &blocks, options).unwrap_err();
        assert!(matches!(err, VoxelError::InvalidFormat(_)));
    }

    #[test]
    fn oversized_header_is_invalid() {
        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&VERSION.to_be_bytes());
        for v in [0, 0, 0, i32::MAX, i32::MAX, i32::MAX] {
            varint::write_i32(&mut header, v).unwrap();
        }
        header.push(AxisOrder::YZX.to_byte());
        assert!(matches!(VxlDecoder::new(Box::new(Cursor::new(header))), Err(VoxelError::InvalidFormat(_))));

        let mut header = MAGIC.to_vec();
        header.extend_from_slice(&VERSION.to_be_bytes());
        for v in [i32::MAX, 0, 0, 2, 1, 1] {
            varint::write_i32(&mut header, v).unwrap();
        }
        header.push(AxisOrder::YZX.to_byte());
        assert!(matches!(VxlDecoder::new(Box::new(Cursor::new(header))), Err(VoxelError::InvalidFormat(_))));
    }

    #[test]
    fn encoder_refuses_extents_the_header_cannot_hold() {
        let wide = Boundary::from_min_and_max(Position::new(i32::MIN, 0, 0), Position::new(i32::MAX, 0, 0));
        let options = WriteOptions { ordered_input: true, ..WriteOptions::default() };
        assert!(matches!(
            VxlEncoder::new(Box::new(Vec::new()), wide, &options),
            Err(VoxelError::InvalidFormat(_))
        ));
    }

    #[test]
    fn overrides_only_within_one_type() {
        let base = BlockState::from_name("minecraft:oak_log").with_property("axis", "y");
        let target = BlockState::from_name("minecraft:oak_log").with_property("axis", "x");
        assert_eq!(overrides(&base, &target).unwrap().len(), 1);
        assert!(overrides(&base, &BlockState::from_name("minecraft:stone")).is_none());
        assert!(overrides(&base, &BlockState::from_name("minecraft:oak_log")).is_none());
    }
}
