//! Error type shared by every layer of the codec.
//!
//! Configuration-class errors (`MissingBoundary`, `UnrecognizedFormat`,
//! `UnknownFormatName`, `NotWritable`) are always raised before a single
//! output byte is produced.  Only a mid-stream `Io` failure can leave a
//! sink's output truncated; callers must discard such output.

use std::io;
use thiserror::Error;

use crate::boundary::Boundary;
use crate::format::SchematicFormat;
use crate::model::Position;

#[derive(Error, Debug)]
pub enum VoxelError {
    /// Header/magic mismatch or a structurally corrupt body.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// Auto-detection exhausted every candidate.
    #[error("Unrecognized format: no auto-detectable decoder matched the input")]
    UnrecognizedFormat,
    #[error("Format {0} requires a boundary before any block can be written")]
    MissingBoundary(SchematicFormat),
    #[error("Block at {position} lies outside {boundary}")]
    PositionOutOfBounds { position: Position, boundary: Boundary },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Stream already closed")]
    AlreadyClosed,
    #[error("Unknown format name: {0}")]
    UnknownFormatName(String),
    #[error("'{0}' cannot be used as an encode target")]
    NotWritable(&'static str),
    #[error("Invalid handle: {0}")]
    InvalidHandle(u64),
    #[error("Slot range {offset}+{count} exceeds buffer of length {len}")]
    BufferRange { offset: usize, count: usize, len: usize },
    /// A dense encoder would have to buffer more than `limit` cells.
    #[error("{boundary} is too large to buffer (limit {limit} cells)")]
    RegionTooLarge { boundary: Boundary, limit: u64 },
}

pub type Result<T> = std::result::Result<T, VoxelError>;

impl VoxelError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        VoxelError::InvalidFormat(msg.into())
    }

    /// Truncated or undecodable input surfaces from readers as `io::Error`
    /// of a data-ish kind; those are format problems, not transport ones.
    pub(crate) fn from_read(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput => VoxelError::InvalidFormat(e.to_string()),
            _ => VoxelError::Io(e),
        }
    }
}
