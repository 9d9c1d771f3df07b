//! Format registry: the closed set of schematic formats and their dispatch.
//!
//! # Capability bits
//! Every format carries exactly two flags the streaming engine cares about:
//!   - `writer_requires_boundary`: the on-disk header declares the full
//!     extent before any body data, so an encoder cannot be opened without
//!     a [`Boundary`].
//!   - `auto_detectable`: the decoder can be chosen by sniffing the input.
//!
//! Nothing else format-specific crosses this module boundary: a decoder is
//! a [`Decoder`] trait object, an encoder an [`Encoder`] trait object.
//!
//! # Detection order
//! VXL is recognised by its raw magic.  Everything else is NBT; the root
//! compound is parsed once and probed in [`SchematicFormat::DETECTION_ORDER`]
//! without decoding any block data.  Litematica is deliberately not probed
//! and must be named explicitly.

pub mod legacy;
pub mod litematic;
pub mod mcedit;
pub mod nbt;
pub mod sponge;
pub mod structure;
pub mod vxl;

use std::fmt;
use std::io::{Cursor, Read, Write};

use flate2::Compression;
use log::debug;
use serde::Serialize;

use crate::boundary::{AxisOrder, Boundary};
use crate::error::{Result, VoxelError};
use crate::model::Block;

/// Boxed byte source handed to a decoder.
pub type ByteInput  = Box<dyn Read + Send>;
/// Boxed byte sink handed to an encoder.
pub type ByteOutput = Box<dyn Write + Send>;

/// DataVersion written into NBT formats (Minecraft 1.20.1).
pub const DEFAULT_DATA_VERSION: i32 = 3465;

// ── SchematicFormat ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SchematicFormat {
    Vxl,
    SpongeV1,
    SpongeV2,
    SpongeV3,
    Litematic,
    Structure,
    McEdit,
}

impl SchematicFormat {
    pub const ALL: [SchematicFormat; 7] = [
        SchematicFormat::Vxl,
        SchematicFormat::SpongeV1,
        SchematicFormat::SpongeV2,
        SchematicFormat::SpongeV3,
        SchematicFormat::Litematic,
        SchematicFormat::Structure,
        SchematicFormat::McEdit,
    ];

    /// Probe priority for auto-detection.
    pub const DETECTION_ORDER: [SchematicFormat; 6] = [
        SchematicFormat::Vxl,
        SchematicFormat::SpongeV3,
        SchematicFormat::SpongeV2,
        SchematicFormat::SpongeV1,
        SchematicFormat::Structure,
        SchematicFormat::McEdit,
    ];

    #[inline]
    pub fn writer_requires_boundary(self) -> bool {
        !matches!(self, SchematicFormat::Structure)
    }

    #[inline]
    pub fn auto_detectable(self) -> bool {
        !matches!(self, SchematicFormat::Litematic)
    }

    pub fn name(self) -> &'static str {
        match self {
            SchematicFormat::Vxl       => "vxl",
            SchematicFormat::SpongeV1  => "sponge_v1",
            SchematicFormat::SpongeV2  => "sponge_v2",
            SchematicFormat::SpongeV3  => "sponge_v3",
            SchematicFormat::Litematic => "litematic",
            SchematicFormat::Structure => "structure",
            SchematicFormat::McEdit    => "mcedit",
        }
    }

    /// Conventional file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            SchematicFormat::Vxl       => "vxl",
            SchematicFormat::SpongeV1
            | SchematicFormat::SpongeV2
            | SchematicFormat::SpongeV3 => "schem",
            SchematicFormat::Litematic => "litematic",
            SchematicFormat::Structure => "nbt",
            SchematicFormat::McEdit    => "schematic",
        }
    }

    /// Parse from a CLI / binding string.  `sponge` means the current version.
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "vxl"                        => Some(SchematicFormat::Vxl),
            "sponge_v1" | "sponge1"      => Some(SchematicFormat::SpongeV1),
            "sponge_v2" | "sponge2"      => Some(SchematicFormat::SpongeV2),
            "sponge_v3" | "sponge3"
            | "sponge" | "schem"         => Some(SchematicFormat::SpongeV3),
            "litematic" | "litematica"   => Some(SchematicFormat::Litematic),
            "structure" | "mojang" | "nbt" => Some(SchematicFormat::Structure),
            "mcedit" | "schematic"       => Some(SchematicFormat::McEdit),
            _                            => None,
        }
    }
}

impl fmt::Display for SchematicFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── FormatHint ───────────────────────────────────────────────────────────────

/// Decode-time format selection.  `AutoDetect` is never an encode target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatHint {
    #[default]
    AutoDetect,
    Exact(SchematicFormat),
}

impl FormatHint {
    pub fn from_name(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "auto" | "detect" => Ok(FormatHint::AutoDetect),
            other => SchematicFormat::from_name(other)
                .map(FormatHint::Exact)
                .ok_or_else(|| VoxelError::UnknownFormatName(s.to_string())),
        }
    }

    /// The concrete format to encode to; auto-detect is rejected.
    pub fn encode_target(self) -> Result<SchematicFormat> {
        match self {
            FormatHint::Exact(f)   => Ok(f),
            FormatHint::AutoDetect => Err(VoxelError::NotWritable("auto")),
        }
    }
}

impl From<SchematicFormat> for FormatHint {
    fn from(f: SchematicFormat) -> Self {
        FormatHint::Exact(f)
    }
}

// ── WriteOptions ─────────────────────────────────────────────────────────────

/// Encoder settings.  Defaults produce gzip level 6 NBT at DataVersion 3465.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Gzip level for NBT containers.
    pub compression:   Compression,
    pub data_version:  i32,
    /// Body order of VXL output.
    pub axis_order:    AxisOrder,
    /// Blocks will arrive in strictly increasing `axis_order` position, so
    /// VXL can stream its body instead of buffering an index grid.
    pub ordered_input: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            compression:   Compression::default(),
            data_version:  DEFAULT_DATA_VERSION,
            axis_order:    AxisOrder::YZX,
            ordered_input: false,
        }
    }
}

// ── Decoder / Encoder traits ─────────────────────────────────────────────────

/// Bytes → blocks, resumable across bounded calls.
pub trait Decoder: Send {
    fn format(&self) -> SchematicFormat;

    /// Boundary known so far.
    fn boundary(&self) -> Boundary;

    /// Whether [`boundary`](Decoder::boundary) can still grow.
    fn boundary_is_final(&self) -> bool {
        true
    }

    /// Cell order in which `decode` yields blocks, when it follows one.
    fn native_order(&self) -> Option<AxisOrder> {
        None
    }

    /// Fill a prefix of `out` with the next blocks in native order.
    /// Returns 0 only when no data remains.
    fn decode(&mut self, out: &mut [Block]) -> Result<usize>;
}

/// Blocks → bytes.  Nothing is guaranteed on disk until `finish`.
pub trait Encoder: Send {
    fn format(&self) -> SchematicFormat;

    fn encode(&mut self, blocks: &[Block]) -> Result<()>;

    /// Emit header, buffered body and trailer, then flush.
    fn finish(self: Box<Self>) -> Result<()>;
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

/// Read up to `n` bytes without losing them: the returned reader replays
/// the prefix before continuing with `input`.
pub(crate) fn peek_prefix(mut input: ByteInput, n: usize) -> Result<(Vec<u8>, ByteInput)> {
    let mut prefix = Vec::with_capacity(n);
    (&mut input).take(n as u64).read_to_end(&mut prefix)?;
    let replay = Cursor::new(prefix.clone()).chain(input);
    Ok((prefix, Box::new(replay)))
}

/// Open a decoder for `input`, sniffing the format when `hint` is auto-detect.
pub fn open_decoder(input: ByteInput, hint: FormatHint) -> Result<Box<dyn Decoder>> {
    let decoder: Box<dyn Decoder> = match hint {
        FormatHint::Exact(SchematicFormat::Vxl) => Box::new(vxl::VxlDecoder::new(input)?),
        FormatHint::Exact(format) => {
            let root = nbt::read_root(input)?;
            if !probe(format, &root) {
                return Err(VoxelError::invalid(format!("input is not a {format} schematic")));
            }
            decoder_from_root(format, root)?
        }
        FormatHint::AutoDetect => detect(input)?,
    };
    debug!("opened {} decoder, {}", decoder.format(), decoder.boundary());
    Ok(decoder)
}

fn detect(input: ByteInput) -> Result<Box<dyn Decoder>> {
    let (prefix, input) = peek_prefix(input, vxl::MAGIC.len())?;
    if prefix == vxl::MAGIC {
        return Ok(Box::new(vxl::VxlDecoder::new(input)?));
    }
    if nbt::sniff(&prefix).is_none() {
        return Err(VoxelError::UnrecognizedFormat);
    }
    let root = match nbt::read_root(input) {
        Ok(root) => root,
        Err(VoxelError::InvalidFormat(msg)) => {
            debug!("auto-detect: NBT parse failed: {msg}");
            return Err(VoxelError::UnrecognizedFormat);
        }
        Err(e) => return Err(e),
    };
    for format in SchematicFormat::DETECTION_ORDER {
        if format != SchematicFormat::Vxl && probe(format, &root) {
            debug!("auto-detect: matched {format}");
            return decoder_from_root(format, root);
        }
    }
    Err(VoxelError::UnrecognizedFormat)
}

fn probe(format: SchematicFormat, root: &quartz_nbt::NbtCompound) -> bool {
    match format {
        SchematicFormat::Vxl       => false,
        SchematicFormat::SpongeV1  => sponge::probe(root, 1),
        SchematicFormat::SpongeV2  => sponge::probe(root, 2),
        SchematicFormat::SpongeV3  => sponge::probe(root, 3),
        SchematicFormat::Litematic => litematic::probe(root),
        SchematicFormat::Structure => structure::probe(root),
        SchematicFormat::McEdit    => mcedit::probe(root),
    }
}

fn decoder_from_root(format: SchematicFormat, root: quartz_nbt::NbtCompound) -> Result<Box<dyn Decoder>> {
    Ok(match format {
        SchematicFormat::SpongeV1  => Box::new(sponge::SpongeDecoder::from_root(root, 1)?),
        SchematicFormat::SpongeV2  => Box::new(sponge::SpongeDecoder::from_root(root, 2)?),
        SchematicFormat::SpongeV3  => Box::new(sponge::SpongeDecoder::from_root(root, 3)?),
        SchematicFormat::Litematic => Box::new(litematic::LitematicDecoder::from_root(root)?),
        SchematicFormat::Structure => Box::new(structure::StructureDecoder::from_root(root)?),
        SchematicFormat::McEdit    => Box::new(mcedit::McEditDecoder::from_root(root)?),
        SchematicFormat::Vxl       => {
            return Err(VoxelError::invalid("VXL is not an NBT format"));
        }
    })
}

/// Open an encoder.  Configuration errors are raised before `output` is touched.
pub fn open_encoder(
    output:   ByteOutput,
    format:   SchematicFormat,
    boundary: Option<Boundary>,
    options:  &WriteOptions,
) -> Result<Box<dyn Encoder>> {
    let required = match (format.writer_requires_boundary(), boundary) {
        (true, None)     => return Err(VoxelError::MissingBoundary(format)),
        (true, Some(b))  => Some(b),
        (false, _)       => None,
    };
    let encoder: Box<dyn Encoder> = match (format, required) {
        (SchematicFormat::Structure, _) => {
            Box::new(structure::StructureEncoder::new(output, boundary, options))
        }
        (SchematicFormat::Vxl, Some(b)) => Box::new(vxl::VxlEncoder::new(output, b, options)?),
        (SchematicFormat::SpongeV1, Some(b)) => Box::new(sponge::SpongeEncoder::new(output, b, 1, options)?),
        (SchematicFormat::SpongeV2, Some(b)) => Box::new(sponge::SpongeEncoder::new(output, b, 2, options)?),
        (SchematicFormat::SpongeV3, Some(b)) => Box::new(sponge::SpongeEncoder::new(output, b, 3, options)?),
        (SchematicFormat::Litematic, Some(b)) => Box::new(litematic::LitematicEncoder::new(output, b, options)?),
        (SchematicFormat::McEdit, Some(b)) => Box::new(mcedit::McEditEncoder::new(output, b, options)?),
        (_, None) => return Err(VoxelError::MissingBoundary(format)),
    };
    debug!("opened {format} encoder");
    Ok(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits() {
        for f in SchematicFormat::ALL {
            assert_eq!(f.writer_requires_boundary(), f != SchematicFormat::Structure, "{f}");
            assert_eq!(f.auto_detectable(), f != SchematicFormat::Litematic, "{f}");
        }
        assert!(SchematicFormat::DETECTION_ORDER.iter().all(|f| f.auto_detectable()));
    }

    #[test]
    fn names_round_trip() {
        for f in SchematicFormat::ALL {
            assert_eq!(SchematicFormat::from_name(f.name()), Some(f));
        }
        assert_eq!(SchematicFormat::from_name("Mojang"), Some(SchematicFormat::Structure));
        assert_eq!(SchematicFormat::from_name("zip"), None);
    }

    #[test]
    fn auto_detect_is_not_an_encode_target() {
        let hint = FormatHint::from_name("auto").unwrap();
        assert_eq!(hint, FormatHint::AutoDetect);
        assert!(matches!(hint.encode_target(), Err(VoxelError::NotWritable(_))));
        assert!(matches!(FormatHint::from_name("nope"), Err(VoxelError::UnknownFormatName(_))));
    }

    #[test]
    fn missing_boundary_is_rejected_before_output() {
        for f in SchematicFormat::ALL.into_iter().filter(|f| f.writer_requires_boundary()) {
            let out: ByteOutput = Box::new(Vec::<u8>::new());
            let err = open_encoder(out, f, None, &WriteOptions::default()).err();
            assert!(matches!(err, Some(VoxelError::MissingBoundary(g)) if g == f));
        }
        let out: ByteOutput = Box::new(Vec::<u8>::new());
        assert!(open_encoder(out, SchematicFormat::Structure, None, &WriteOptions::default()).is_ok());
    }

    #[test]
    fn garbage_is_unrecognized() {
        let input: ByteInput = Box::new(Cursor::new(b"PK\x03\x04 definitely not a schematic".to_vec()));
        assert!(matches!(open_decoder(input, FormatHint::AutoDetect), Err(VoxelError::UnrecognizedFormat)));
        let empty: ByteInput = Box::new(Cursor::new(Vec::new()));
        assert!(matches!(open_decoder(empty, FormatHint::AutoDetect), Err(VoxelError::UnrecognizedFormat)));
    }
}
