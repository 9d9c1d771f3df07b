//! Conversion pump: drain a [`BlockSource`] into a [`BlockSink`] through one
//! reusable slot buffer.
//!
//! # Memory
//! The pump itself holds `buffer_size` blocks.  Dense encoders add their
//! extent-sized index grid; nothing else grows with the schematic.
//!
//! # Two-pass conversion
//! A source whose boundary is only known after a full read (a structure file
//! without `size`) cannot feed a boundary-requiring sink directly.
//! [`convert`] then drains the source once to learn the boundary, seeks the
//! input back to where it started, and streams a second pass into a sink
//! opened with the learned boundary.
//!
//! # Ordered sinks
//! When the source yields blocks in the same cell order the sink lays out,
//! the sink is told so through [`WriteOptions::ordered_input`] and VXL
//! output streams instead of buffering a grid.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;
use serde::Serialize;

use crate::boundary::Boundary;
use crate::error::Result;
use crate::format::{FormatHint, SchematicFormat, WriteOptions};
use crate::io_stream::{BlockSink, BlockSource};
use crate::model::Block;

/// Per-conversion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PumpStats {
    pub blocks:  u64,
    /// Non-empty reads.
    pub batches: u64,
}

/// Drain `source` into `sink`, then close the source and finalize the sink.
///
/// On error the source is closed and the sink is left unfinalized; its
/// output must be discarded.
pub fn pump(source: &BlockSource, sink: &BlockSink, buffer_size: usize) -> Result<PumpStats> {
    let size = buffer_size.max(1);
    let mut buffer = vec![Block::default(); size];
    let mut stats = PumpStats::default();
    loop {
        let step = source.read(&mut buffer, 0, size).and_then(|n| match n {
            Some(n) => sink.write(&buffer, 0, n).map(|()| Some(n)),
            None    => Ok(None),
        });
        match step {
            Ok(Some(n)) => {
                stats.blocks += n as u64;
                stats.batches += 1;
            }
            Ok(None) => break,
            Err(e) => {
                source.close();
                return Err(e);
            }
        }
    }
    source.close();
    sink.close()?;
    debug!(
        "pumped {} blocks in {} batches, {} -> {}",
        stats.blocks,
        stats.batches,
        source.format(),
        sink.format()
    );
    Ok(stats)
}

/// Read `source` to the end without keeping anything.
fn drain(source: &BlockSource, buffer_size: usize) -> Result<u64> {
    let size = buffer_size.max(1);
    let mut buffer = vec![Block::default(); size];
    let mut blocks = 0;
    while let Some(n) = source.read(&mut buffer, 0, size)? {
        blocks += n as u64;
    }
    Ok(blocks)
}

/// Reader a source can own while we keep a handle to rewind it.
struct SharedReader<R>(Arc<Mutex<R>>);

impl<R: Read> Read for SharedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).read(buf)
    }
}

fn convert_with<R, F>(
    input:       R,
    hint:        FormatHint,
    target:      SchematicFormat,
    options:     &WriteOptions,
    buffer_size: usize,
    open_sink:   F,
) -> Result<PumpStats>
where
    R: Read + Seek + Send + 'static,
    F: FnOnce(Option<Boundary>, &WriteOptions) -> Result<BlockSink>,
{
    let reader = Arc::new(Mutex::new(input));
    let start = reader.lock().unwrap_or_else(PoisonError::into_inner).stream_position()?;
    let mut source = BlockSource::open(SharedReader(reader.clone()), hint)?;

    let boundary = if source.boundary_is_final() {
        Some(source.boundary())
    } else if target.writer_requires_boundary() {
        let seen = match drain(&source, buffer_size) {
            Ok(n) => n,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };
        let learned = source.boundary();
        let format = source.format();
        source.close();
        debug!("two-pass conversion to {target}: first pass read {seen} blocks, {learned}");
        reader.lock().unwrap_or_else(PoisonError::into_inner).seek(SeekFrom::Start(start))?;
        source = BlockSource::open(SharedReader(reader), FormatHint::Exact(format))?;
        Some(learned)
    } else {
        None
    };

    let options = WriteOptions {
        ordered_input: source.native_order() == Some(options.axis_order),
        ..*options
    };
    let sink = match open_sink(boundary, &options) {
        Ok(sink) => sink,
        Err(e) => {
            source.close();
            return Err(e);
        }
    };
    pump(&source, &sink, buffer_size)
}

/// Convert `input` to `target`, writing to `output`.
///
/// The sink is opened with the source boundary when that boundary is final;
/// otherwise a boundary-requiring target triggers a two-pass conversion.
pub fn convert<R, W>(
    input:       R,
    hint:        FormatHint,
    output:      W,
    target:      SchematicFormat,
    options:     &WriteOptions,
    buffer_size: usize,
) -> Result<PumpStats>
where
    R: Read + Seek + Send + 'static,
    W: Write + Send + 'static,
{
    convert_with(input, hint, target, options, buffer_size, |boundary, options| {
        BlockSink::with_options(output, target, boundary, options)
    })
}

/// File-to-file [`convert`].  The output file is only created once the
/// source has been opened and its boundary resolved.
pub fn convert_path(
    input:       impl AsRef<Path>,
    output:      impl AsRef<Path>,
    hint:        FormatHint,
    target:      SchematicFormat,
    options:     &WriteOptions,
    buffer_size: usize,
) -> Result<PumpStats> {
    let file = File::open(input)?;
    let output = output.as_ref();
    convert_with(file, hint, target, options, buffer_size, |boundary, options| {
        BlockSink::create_path(output, target, boundary, options)
    })
}

/// Convert several files, one result per `(input, output)` pair in order.
pub fn convert_many(
    jobs:        &[(PathBuf, PathBuf)],
    hint:        FormatHint,
    target:      SchematicFormat,
    options:     &WriteOptions,
    buffer_size: usize,
) -> Vec<Result<PumpStats>> {
    // Independent files share nothing, so each job can run on its own thread.
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;

        jobs.par_iter()
            .map(|(input, output)| convert_path(input, output, hint, target, options, buffer_size))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        jobs.iter()
            .map(|(input, output)| convert_path(input, output, hint, target, options, buffer_size))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VoxelError;
    use crate::format::testutil::{self, SharedBuf};
    use crate::model::{BlockState, Position};
    use std::io::Cursor;

    fn region() -> (Boundary, Vec<Block>) {
        let b = Boundary::new(Position::new(-2, 0, 5), 4, 2, 3);
        let dirt = Arc::new(BlockState::from_name("minecraft:dirt"));
        let blocks = b
            .iter(crate::boundary::AxisOrder::YZX)
            .filter(|p| p.y == 0 || p.x == 1)
            .map(|p| Block::new(p, dirt.clone()))
            .collect();
        (b, blocks)
    }

    #[test]
    fn pump_counts_blocks_and_batches() {
        let (b, blocks) = region();
        let bytes = testutil::encode(SchematicFormat::Vxl, Some(b), &blocks);
        let source = BlockSource::open(Cursor::new(bytes), FormatHint::AutoDetect).unwrap();
        let out = SharedBuf::default();
        let sink = BlockSink::open(out.clone(), SchematicFormat::SpongeV2, Some(source.boundary())).unwrap();
        let stats = pump(&source, &sink, 5).unwrap();
        assert_eq!(stats.blocks, blocks.len() as u64);
        assert_eq!(stats.batches, (blocks.len() as u64).div_ceil(5));
        assert!(source.is_closed() && sink.is_closed());

        let (boundary, decoded) = testutil::decode(out.bytes(), FormatHint::AutoDetect).unwrap();
        assert_eq!(boundary, b);
        assert_eq!(decoded, blocks);
    }

    #[test]
    fn two_pass_learns_the_boundary() {
        // Structure output declares its size, so strip it to force a
        // progressive boundary on the way back in.
        let (_, blocks) = region();
        let bytes = testutil::encode(SchematicFormat::Structure, None, &blocks);
        let root = crate::format::nbt::read_root(Box::new(Cursor::new(bytes))).unwrap();
        let mut unsized_root = quartz_nbt::NbtCompound::new();
        for (key, tag) in root.inner().iter().filter(|(key, _)| key.as_str() != "size") {
            unsized_root.insert(key.clone(), tag.clone());
        }
        let mut raw = Vec::new();
        quartz_nbt::io::write_nbt(&mut raw, None, &unsized_root, quartz_nbt::io::Flavor::Uncompressed).unwrap();

        let out = SharedBuf::default();
        let stats = convert(
            Cursor::new(raw),
            FormatHint::AutoDetect,
            out.clone(),
            SchematicFormat::SpongeV3,
            &WriteOptions::default(),
            3,
        )
        .unwrap();
        assert_eq!(stats.blocks, blocks.len() as u64);
        let (boundary, decoded) = testutil::decode(out.bytes(), FormatHint::AutoDetect).unwrap();
        assert_eq!(boundary, Boundary::new(Position::default(), 4, 2, 3));
        assert_eq!(decoded.len(), blocks.len());
    }

    #[test]
    fn ordered_sources_stream_into_vxl_unchanged() {
        let (b, blocks) = region();
        let original = testutil::encode(SchematicFormat::Vxl, Some(b), &blocks);
        let source = BlockSource::open(Cursor::new(original.clone()), FormatHint::AutoDetect).unwrap();
        assert_eq!(source.native_order(), Some(crate::boundary::AxisOrder::YZX));
        source.close();

        for buffer_size in [1, 4, 64] {
            let out = SharedBuf::default();
            convert(
                Cursor::new(original.clone()),
                FormatHint::AutoDetect,
                out.clone(),
                SchematicFormat::Vxl,
                &WriteOptions::default(),
                buffer_size,
            )
            .unwrap();
            assert_eq!(out.bytes(), original, "buffer {buffer_size}");
        }

        // a different target order cannot stream and falls back to the grid
        let options = WriteOptions { axis_order: crate::boundary::AxisOrder::XZY, ..WriteOptions::default() };
        let out = SharedBuf::default();
        convert(Cursor::new(original), FormatHint::AutoDetect, out.clone(), SchematicFormat::Vxl, &options, 8).unwrap();
        let (boundary, decoded) = testutil::decode(out.bytes(), FormatHint::AutoDetect).unwrap();
        assert_eq!(boundary, b);
        assert_eq!(decoded.len(), blocks.len());
    }

    #[test]
    fn unknown_input_never_touches_the_output() {
        let out = SharedBuf::default();
        let err = convert(
            Cursor::new(b"not a schematic".to_vec()),
            FormatHint::AutoDetect,
            out.clone(),
            SchematicFormat::Vxl,
            &WriteOptions::default(),
            16,
        )
        .unwrap_err();
        assert!(matches!(err, VoxelError::UnrecognizedFormat));
        assert!(out.bytes().is_empty());
    }
}
