//! Shared NBT plumbing for the Sponge, Litematica, structure and MCEdit formats.
//!
//! Decompression is done here with flate2 rather than by quartz_nbt so the
//! container (gzip, zlib, raw) can be sniffed from the first byte and so
//! output gzip framing stays under our control.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::GzEncoder;
use flate2::Compression;
use quartz_nbt::io::{read_nbt, write_nbt, Flavor, NbtIoError};
use quartz_nbt::{NbtCompound, NbtList, NbtTag};
use std::collections::BTreeMap;

use crate::error::{Result, VoxelError};
use crate::format::{peek_prefix, ByteInput, ByteOutput};
use crate::model::{BlockState, Position};

const TAG_COMPOUND: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Gzip,
    Zlib,
    Raw,
}

pub fn sniff(prefix: &[u8]) -> Option<Container> {
    match prefix {
        [0x1F, 0x8B, ..]          => Some(Container::Gzip),
        [0x78, ..]                => Some(Container::Zlib),
        [TAG_COMPOUND, ..]        => Some(Container::Raw),
        _                         => None,
    }
}

fn map_nbt_err(e: NbtIoError) -> VoxelError {
    match e {
        NbtIoError::StdIo(io) => VoxelError::from_read(io),
        other => VoxelError::invalid(format!("NBT: {other}")),
    }
}

fn parse<R: Read>(mut reader: R) -> Result<NbtCompound> {
    read_nbt(&mut reader, Flavor::Uncompressed)
        .map(|(root, _name)| root)
        .map_err(map_nbt_err)
}

/// Parse the root compound of an NBT stream in any supported container.
pub fn read_root(input: ByteInput) -> Result<NbtCompound> {
    let (prefix, input) = peek_prefix(input, 2)?;
    match sniff(&prefix) {
        Some(Container::Gzip) => parse(GzDecoder::new(input)),
        Some(Container::Zlib) => parse(ZlibDecoder::new(input)),
        Some(Container::Raw)  => parse(input),
        None => Err(VoxelError::invalid("input is not an NBT stream")),
    }
}

/// Write `root` gzip-compressed and flush.
pub fn write_root(
    output:      &mut ByteOutput,
    root_name:   Option<&str>,
    root:        &NbtCompound,
    compression: Compression,
) -> Result<()> {
    let mut gz = GzEncoder::new(&mut *output, compression);
    write_nbt(&mut gz, root_name, root, Flavor::Uncompressed).map_err(map_nbt_err)?;
    gz.finish()?;
    output.flush()?;
    Ok(())
}

// ── Typed getters ────────────────────────────────────────────────────────────

pub fn tag<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a NbtTag> {
    c.get::<_, &NbtTag>(key)
        .map_err(|_| VoxelError::invalid(format!("missing '{key}' tag")))
}

pub fn opt_tag<'a>(c: &'a NbtCompound, key: &str) -> Option<&'a NbtTag> {
    c.get::<_, &NbtTag>(key).ok()
}

fn wrong_type(key: &str, expected: &str) -> VoxelError {
    VoxelError::invalid(format!("'{key}' is not {expected}"))
}

/// Any integral tag widened to i32.
pub fn int(c: &NbtCompound, key: &str) -> Result<i32> {
    match tag(c, key)? {
        NbtTag::Byte(v)  => Ok(*v as i32),
        NbtTag::Short(v) => Ok(*v as i32),
        NbtTag::Int(v)   => Ok(*v),
        _ => Err(wrong_type(key, "an integer")),
    }
}

pub fn opt_int(c: &NbtCompound, key: &str) -> Option<i32> {
    int(c, key).ok()
}

/// Dimension stored as an unsigned short (Sponge/MCEdit `Width` etc.).
pub fn dimension(c: &NbtCompound, key: &str) -> Result<u64> {
    match tag(c, key)? {
        NbtTag::Short(v) => Ok(*v as u16 as u64),
        NbtTag::Int(v) if *v >= 0 => Ok(*v as u64),
        _ => Err(wrong_type(key, "a dimension")),
    }
}

pub fn string<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a str> {
    match tag(c, key)? {
        NbtTag::String(s) => Ok(s.as_str()),
        _ => Err(wrong_type(key, "a string")),
    }
}

pub fn compound<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a NbtCompound> {
    match tag(c, key)? {
        NbtTag::Compound(v) => Ok(v),
        _ => Err(wrong_type(key, "a compound")),
    }
}

pub fn list<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a NbtList> {
    match tag(c, key)? {
        NbtTag::List(v) => Ok(v),
        _ => Err(wrong_type(key, "a list")),
    }
}

pub fn byte_array<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a [i8]> {
    match tag(c, key)? {
        NbtTag::ByteArray(v) => Ok(v.as_slice()),
        _ => Err(wrong_type(key, "a byte array")),
    }
}

pub fn long_array<'a>(c: &'a NbtCompound, key: &str) -> Result<&'a [i64]> {
    match tag(c, key)? {
        NbtTag::LongArray(v) => Ok(v.as_slice()),
        _ => Err(wrong_type(key, "a long array")),
    }
}

/// `[x, y, z]` stored as an int array or a list of ints.
pub fn xyz_array(c: &NbtCompound, key: &str) -> Result<Position> {
    let values: Vec<i32> = match tag(c, key)? {
        NbtTag::IntArray(v) => v.clone(),
        NbtTag::List(l) => l
            .iter()
            .map(|t| match t {
                NbtTag::Int(v) => Ok(*v),
                _ => Err(wrong_type(key, "a list of ints")),
            })
            .collect::<Result<_>>()?,
        _ => return Err(wrong_type(key, "an [x, y, z] triple")),
    };
    match values.as_slice() {
        [x, y, z] => Ok(Position::new(*x, *y, *z)),
        _ => Err(wrong_type(key, "an [x, y, z] triple")),
    }
}

/// `{x: .., y: .., z: ..}` compound (Litematica `Position`/`Size`).
pub fn xyz_compound(c: &NbtCompound, key: &str) -> Result<Position> {
    let inner = compound(c, key)?;
    Ok(Position::new(int(inner, "x")?, int(inner, "y")?, int(inner, "z")?))
}

pub fn xyz_compound_tag(p: Position) -> NbtTag {
    let mut c = NbtCompound::new();
    c.insert("x", NbtTag::Int(p.x));
    c.insert("y", NbtTag::Int(p.y));
    c.insert("z", NbtTag::Int(p.z));
    NbtTag::Compound(c)
}

// ── Block state <-> {Name, Properties} ──────────────────────────────────────

pub fn state_from_compound(c: &NbtCompound) -> Result<BlockState> {
    let name = string(c, "Name")?;
    let mut properties = BTreeMap::new();
    if let Some(NbtTag::Compound(props)) = opt_tag(c, "Properties") {
        for (k, v) in props.inner() {
            match v {
                NbtTag::String(s) => {
                    properties.insert(k.clone(), s.clone());
                }
                _ => return Err(wrong_type(k, "a string property")),
            }
        }
    }
    Ok(BlockState::new(name, properties))
}

pub fn state_to_compound(state: &BlockState) -> NbtTag {
    let mut c = NbtCompound::new();
    c.insert("Name", NbtTag::String(state.name().to_string()));
    if !state.properties().is_empty() {
        let mut props = NbtCompound::new();
        for (k, v) in state.properties() {
            props.insert(k.as_str(), NbtTag::String(v.clone()));
        }
        c.insert("Properties", NbtTag::Compound(props));
    }
    NbtTag::Compound(c)
}

pub fn to_i8(bytes: Vec<u8>) -> Vec<i8> {
    bytes.into_iter().map(|b| b as i8).collect()
}

pub fn to_u8(bytes: &[i8]) -> Vec<u8> {
    bytes.iter().map(|b| *b as u8).collect()
}
