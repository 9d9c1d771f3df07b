//! Read and write sessions over a single schematic byte stream.
//!
//! # Source
//! [`BlockSource`] wraps one [`Decoder`].  `read` fills a caller-owned slot
//! range and returns `Some(n)` with `n ≥ 1` while data remains, then `None`.
//! The total block sequence does not depend on the slot counts chosen.
//!
//! # Sink
//! [`BlockSink`] wraps one [`Encoder`].  Nothing is durable until `close`,
//! which finalizes the encoder exactly once.
//!
//! # Close
//! Both sessions keep their codec behind a `Mutex<Option<..>>`.  `close`
//! takes the codec out under the lock, so the underlying stream is released
//! once no matter how many threads call it; later calls only log.  `read`
//! and `write` after close are [`VoxelError::AlreadyClosed`].

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::format::{
    open_decoder, open_encoder, Decoder, Encoder, FormatHint, SchematicFormat, WriteOptions,
};
use crate::model::Block;

/// Default slot count for the pump and [`BlockSource::read_to_end`].
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

fn slot_range(buffer_len: usize, offset: usize, count: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= buffer_len => Ok(offset..end),
        _ => Err(VoxelError::BufferRange { offset, count, len: buffer_len }),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Source ───────────────────────────────────────────────────────────────────

struct SourceState {
    decoder:   Option<Box<dyn Decoder>>,
    exhausted: bool,
    boundary:  Boundary,
    is_final:  bool,
}

pub struct BlockSource {
    format: SchematicFormat,
    order:  Option<AxisOrder>,
    state:  Mutex<SourceState>,
}

impl BlockSource {
    /// Open a read session, sniffing the format when `hint` is auto-detect.
    pub fn open<R: Read + Send + 'static>(input: R, hint: FormatHint) -> Result<Self> {
        let decoder = open_decoder(Box::new(input), hint)?;
        Ok(Self {
            format: decoder.format(),
            order:  decoder.native_order(),
            state:  Mutex::new(SourceState {
                boundary:  decoder.boundary(),
                is_final:  decoder.boundary_is_final(),
                decoder:   Some(decoder),
                exhausted: false,
            }),
        })
    }

    pub fn open_path(path: impl AsRef<Path>, hint: FormatHint) -> Result<Self> {
        Self::open(File::open(path)?, hint)
    }

    pub fn format(&self) -> SchematicFormat {
        self.format
    }

    /// Boundary known so far; exact from the start unless
    /// [`boundary_is_final`](Self::boundary_is_final) says otherwise.
    pub fn boundary(&self) -> Boundary {
        lock(&self.state).boundary
    }

    pub fn boundary_is_final(&self) -> bool {
        lock(&self.state).is_final
    }

    /// Cell order blocks are delivered in, if the format has one.
    pub fn native_order(&self) -> Option<AxisOrder> {
        self.order
    }

    /// Fill `buffer[offset..offset + max_count]` from the front.
    ///
    /// Returns `Some(n)` with `1 ≤ n ≤ max_count`, or `None` once every
    /// block has been delivered.  A `max_count` of zero is a
    /// [`VoxelError::BufferRange`]: it could never make progress.
    pub fn read(&self, buffer: &mut [Block], offset: usize, max_count: usize) -> Result<Option<usize>> {
        if max_count == 0 {
            return Err(VoxelError::BufferRange { offset, count: 0, len: buffer.len() });
        }
        let range = slot_range(buffer.len(), offset, max_count)?;
        let mut state = lock(&self.state);
        let SourceState { decoder, exhausted, boundary, is_final } = &mut *state;
        let decoder = decoder.as_mut().ok_or(VoxelError::AlreadyClosed)?;
        if *exhausted {
            return Ok(None);
        }
        let n = decoder.decode(&mut buffer[range])?;
        *boundary = decoder.boundary();
        *is_final = decoder.boundary_is_final();
        if n == 0 {
            *exhausted = true;
            debug!("{} source exhausted, {boundary}", self.format);
            return Ok(None);
        }
        Ok(Some(n))
    }

    /// Drain every remaining block into memory.
    pub fn read_to_end(&self) -> Result<Vec<Block>> {
        let mut buffer = vec![Block::default(); DEFAULT_BUFFER_SIZE];
        let mut all = Vec::new();
        while let Some(n) = self.read(&mut buffer, 0, DEFAULT_BUFFER_SIZE)? {
            all.extend_from_slice(&buffer[..n]);
        }
        Ok(all)
    }

    /// Release the decoder and its input.  Repeated calls are no-ops.
    pub fn close(&self) {
        let decoder = lock(&self.state).decoder.take();
        match decoder {
            Some(d) => drop(d),
            None    => trace!("{} source already closed", self.format),
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).decoder.is_none()
    }
}

// ── Sink ─────────────────────────────────────────────────────────────────────

struct SinkState {
    encoder: Option<Box<dyn Encoder>>,
    written: u64,
}

pub struct BlockSink {
    format: SchematicFormat,
    state:  Mutex<SinkState>,
}

impl BlockSink {
    /// Open a write session with default [`WriteOptions`].
    pub fn open<W: Write + Send + 'static>(
        output:   W,
        format:   SchematicFormat,
        boundary: Option<Boundary>,
    ) -> Result<Self> {
        Self::with_options(output, format, boundary, &WriteOptions::default())
    }

    /// `MissingBoundary` is raised here, before `output` sees a byte.
    pub fn with_options<W: Write + Send + 'static>(
        output:   W,
        format:   SchematicFormat,
        boundary: Option<Boundary>,
        options:  &WriteOptions,
    ) -> Result<Self> {
        let encoder = open_encoder(Box::new(output), format, boundary, options)?;
        Ok(Self {
            format,
            state: Mutex::new(SinkState { encoder: Some(encoder), written: 0 }),
        })
    }

    /// Create `path` and open a buffered sink on it.  The boundary
    /// requirement is checked before the file is created.
    pub fn create_path(
        path:     impl AsRef<Path>,
        format:   SchematicFormat,
        boundary: Option<Boundary>,
        options:  &WriteOptions,
    ) -> Result<Self> {
        if format.writer_requires_boundary() && boundary.is_none() {
            return Err(VoxelError::MissingBoundary(format));
        }
        let file = BufWriter::new(File::create(path)?);
        Self::with_options(file, format, boundary, options)
    }

    pub fn format(&self) -> SchematicFormat {
        self.format
    }

    /// Forward `buffer[offset..offset + count]` to the encoder, in order.
    pub fn write(&self, buffer: &[Block], offset: usize, count: usize) -> Result<()> {
        let range = slot_range(buffer.len(), offset, count)?;
        let mut state = lock(&self.state);
        let encoder = state.encoder.as_mut().ok_or(VoxelError::AlreadyClosed)?;
        encoder.encode(&buffer[range])?;
        state.written += count as u64;
        Ok(())
    }

    pub fn blocks_written(&self) -> u64 {
        lock(&self.state).written
    }

    /// Finalize the encoder and flush the output.  Only the first call does
    /// anything; the encoder is gone afterwards even if finalization failed.
    pub fn close(&self) -> Result<()> {
        let (encoder, written) = {
            let mut state = lock(&self.state);
            (state.encoder.take(), state.written)
        };
        match encoder {
            Some(e) => {
                e.finish()?;
                debug!("{} sink closed after {written} blocks", self.format);
                Ok(())
            }
            None => {
                trace!("{} sink already closed", self.format);
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).encoder.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testutil::SharedBuf;
    use crate::model::{BlockState, Position};
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample() -> (Boundary, Vec<Block>) {
        let b = Boundary::new(Position::new(0, 0, 0), 3, 3, 3);
        let glass = Arc::new(BlockState::from_name("minecraft:glass"));
        let blocks = b.iter(crate::boundary::AxisOrder::YZX)
            .filter(|p| (p.x + p.y + p.z) % 2 == 0)
            .map(|p| Block::new(p, glass.clone()))
            .collect();
        (b, blocks)
    }

    fn vxl_bytes() -> Vec<u8> {
        let (b, blocks) = sample();
        let out = SharedBuf::default();
        let sink = BlockSink::open(out.clone(), SchematicFormat::Vxl, Some(b)).unwrap();
        sink.write(&blocks, 0, blocks.len()).unwrap();
        sink.close().unwrap();
        out.bytes()
    }

    #[test]
    fn read_honours_offset_and_signals_end_once_data_is_gone() {
        let source = BlockSource::open(Cursor::new(vxl_bytes()), FormatHint::AutoDetect).unwrap();
        assert_eq!(source.format(), SchematicFormat::Vxl);
        let mut buffer = vec![Block::default(); 10];
        let mut total = 0;
        while let Some(n) = source.read(&mut buffer, 3, 4).unwrap() {
            assert!((1..=4).contains(&n));
            assert_eq!(buffer[0], Block::default());
            total += n;
        }
        assert_eq!(total, sample().1.len());
        assert_eq!(source.read(&mut buffer, 0, 10).unwrap(), None);
    }

    #[test]
    fn bad_slot_range_is_rejected() {
        let source = BlockSource::open(Cursor::new(vxl_bytes()), FormatHint::AutoDetect).unwrap();
        let mut buffer = vec![Block::default(); 4];
        let err = source.read(&mut buffer, 2, 3).unwrap_err();
        assert!(matches!(err, VoxelError::BufferRange { offset: 2, count: 3, len: 4 }));
        let err = source.read(&mut buffer, 4, 0).unwrap_err();
        assert!(matches!(err, VoxelError::BufferRange { offset: 4, count: 0, len: 4 }));
        let err = source.read(&mut buffer, 0, 0).unwrap_err();
        assert!(matches!(err, VoxelError::BufferRange { count: 0, .. }));
        // the rejected calls consumed nothing
        let mut buffer = vec![Block::default(); 64];
        assert_eq!(source.read(&mut buffer, 0, 64).unwrap(), Some(sample().1.len()));
    }

    #[test]
    fn close_is_idempotent_and_blocks_io() {
        let source = BlockSource::open(Cursor::new(vxl_bytes()), FormatHint::AutoDetect).unwrap();
        source.close();
        source.close();
        assert!(source.is_closed());
        let mut buffer = vec![Block::default(); 4];
        assert!(matches!(source.read(&mut buffer, 0, 4), Err(VoxelError::AlreadyClosed)));

        let (b, blocks) = sample();
        let out = SharedBuf::default();
        let sink = BlockSink::open(out.clone(), SchematicFormat::SpongeV3, Some(b)).unwrap();
        sink.write(&blocks, 0, blocks.len()).unwrap();
        sink.close().unwrap();
        let len = out.bytes().len();
        sink.close().unwrap();
        assert_eq!(out.bytes().len(), len);
        assert!(matches!(sink.write(&blocks, 0, 1), Err(VoxelError::AlreadyClosed)));
        assert_eq!(sink.blocks_written(), blocks.len() as u64);
    }

    #[test]
    fn concurrent_close_finalizes_once() {
        let (b, blocks) = sample();
        let out = SharedBuf::default();
        let sink = Arc::new(BlockSink::open(out.clone(), SchematicFormat::Vxl, Some(b)).unwrap());
        sink.write(&blocks, 0, blocks.len()).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || sink.close())
            })
            .collect();
        for h in handles {
            h.join().unwrap().unwrap();
        }
        assert_eq!(out.bytes(), vxl_bytes());
    }

    #[test]
    fn concurrent_source_close_races_readers_safely() {
        let total = sample().1.len();
        let source = Arc::new(BlockSource::open(Cursor::new(vxl_bytes()), FormatHint::AutoDetect).unwrap());
        let threads: Vec<_> = (0..6)
            .map(|i| {
                let source = source.clone();
                std::thread::spawn(move || -> Result<usize> {
                    if i % 2 == 0 {
                        source.close();
                        return Ok(0);
                    }
                    let mut buffer = vec![Block::default(); 2];
                    let mut seen = 0;
                    loop {
                        match source.read(&mut buffer, 0, 2) {
                            Ok(Some(n)) => seen += n,
                            Ok(None) | Err(VoxelError::AlreadyClosed) => return Ok(seen),
                            Err(e) => return Err(e),
                        }
                    }
                })
            })
            .collect();
        let mut delivered = 0;
        for t in threads {
            delivered += t.join().unwrap().unwrap();
        }
        assert!(delivered <= total);
        assert!(source.is_closed());
        let mut buffer = vec![Block::default(); 2];
        assert!(matches!(source.read(&mut buffer, 0, 2), Err(VoxelError::AlreadyClosed)));
    }

    #[test]
    fn rejected_batch_leaves_the_sink_as_it_was() {
        let (b, blocks) = sample();
        let stray = Block::new(Position::new(9, 9, 9), Arc::new(BlockState::from_name("minecraft:stone")));
        let mut batch = blocks[4..8].to_vec();
        batch.push(stray);

        for format in [SchematicFormat::Vxl, SchematicFormat::SpongeV3, SchematicFormat::Litematic, SchematicFormat::McEdit] {
            for ordered_input in [false, true] {
                let options = WriteOptions { ordered_input, ..WriteOptions::default() };
                let clean = SharedBuf::default();
                let sink = BlockSink::with_options(clean.clone(), format, Some(b), &options).unwrap();
                sink.write(&blocks, 0, 4).unwrap();
                sink.close().unwrap();

                let out = SharedBuf::default();
                let sink = BlockSink::with_options(out.clone(), format, Some(b), &options).unwrap();
                sink.write(&blocks, 0, 4).unwrap();
                let err = sink.write(&batch, 0, batch.len()).unwrap_err();
                assert!(matches!(err, VoxelError::PositionOutOfBounds { .. }), "{format}");
                assert_eq!(sink.blocks_written(), 4, "{format}");
                sink.close().unwrap();
                assert_eq!(out.bytes(), clean.bytes(), "{format} ordered={ordered_input}");
            }
        }
    }
}
