//! LEB128 varints, as used by Sponge `BlockData` arrays and the VXL body.
//!
//! Unsigned values use 7 bits per byte, low group first, high bit set on
//! every byte but the last.  Signed values are zig-zag mapped first so
//! small negative coordinates stay short.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{Result, VoxelError};

/// A u32 never needs more than five groups.
const MAX_SHIFT: u32 = 28;

#[inline]
pub fn zigzag(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

#[inline]
pub fn unzigzag(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

pub fn write_u32<W: Write>(w: &mut W, mut v: u32) -> io::Result<()> {
    while v >= 0x80 {
        w.write_u8((v as u8 & 0x7F) | 0x80)?;
        v >>= 7;
    }
    w.write_u8(v as u8)
}

pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    write_u32(w, zigzag(v))
}

/// Streaming read.  A clean EOF before the first byte is `Ok(None)`;
/// EOF in the middle of a value is `InvalidFormat`.
pub fn read_u32_opt<R: Read>(r: &mut R) -> Result<Option<u32>> {
    let mut value = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = match r.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && shift == 0 => return Ok(None),
            Err(e) => return Err(VoxelError::from_read(e)),
        };
        value |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
        if shift > MAX_SHIFT {
            return Err(VoxelError::invalid("varint is too long"));
        }
    }
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    read_u32_opt(r)?.ok_or_else(|| VoxelError::invalid("unexpected end of varint stream"))
}

pub fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    read_u32(r).map(unzigzag)
}

// ── In-memory arrays ─────────────────────────────────────────────────────────

pub fn push_u32(out: &mut Vec<u8>, v: u32) {
    // Writing into a Vec cannot fail.
    let _ = write_u32(out, v);
}

/// Decode one value from `data` starting at `*cursor`, advancing it.
pub fn decode_at(data: &[u8], cursor: &mut usize) -> Result<u32> {
    let mut value = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*cursor)
            .ok_or_else(|| VoxelError::invalid("varint array ended unexpectedly"))?;
        *cursor += 1;
        value |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > MAX_SHIFT {
            return Err(VoxelError::invalid("varint is too long"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn known_encodings() {
        let mut buf = Vec::new();
        push_u32(&mut buf, 0);
        push_u32(&mut buf, 127);
        push_u32(&mut buf, 128);
        push_u32(&mut buf, 300);
        assert_eq!(buf, vec![0x00, 0x7F, 0x80, 0x01, 0xAC, 0x02]);

        let mut cursor = 0;
        let decoded: Vec<u32> = (0..4).map(|_| decode_at(&buf, &mut cursor).unwrap()).collect();
        assert_eq!(decoded, vec![0, 127, 128, 300]);
        assert_eq!(cursor, buf.len());
    }

    #[test]
    fn zigzag_keeps_small_negatives_short() {
        for v in [0, -1, 1, -64, 63, i32::MIN, i32::MAX] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn clean_eof_vs_truncation() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_u32_opt(&mut empty).unwrap().is_none());

        let mut truncated = Cursor::new(vec![0x80u8]);
        assert!(matches!(read_u32_opt(&mut truncated), Err(VoxelError::InvalidFormat(_))));

        let mut cursor = 0;
        assert!(decode_at(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01], &mut cursor).is_err());
    }
}
