//! Handle table for host-language bindings.
//!
//! Bindings only ever see opaque `u64` handles.  Each handle names one slot
//! holding a [`BlockSource`] or a [`BlockSink`]; closing swaps the slot for
//! a tombstone under the table lock and only then releases the session, so
//! a handle is released once however many times it is closed.
//!
//! # Reuse
//! Slots live in a slab.  A closed slot goes on a free list and is handed
//! out again under a bumped generation: the low 32 bits of a handle are the
//! slot index plus one, the high 32 bits its generation.  An old handle to a
//! reused slot therefore never aliases the new session; it reads as closed.
//! `0` is never issued.  A slot whose generation is exhausted is retired.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::trace;

use crate::boundary::Boundary;
use crate::error::{Result, VoxelError};
use crate::format::FormatHint;
use crate::io_stream::{BlockSink, BlockSource};
use crate::model::Block;

enum Slot {
    Source(Arc<BlockSource>),
    Sink(Arc<BlockSink>),
    Closed,
}

struct Entry {
    generation: u32,
    slot:       Slot,
}

#[derive(Default)]
struct Slab {
    entries: Vec<Entry>,
    /// Closed entries whose index may be issued again.
    free:    Vec<usize>,
}

/// Where a handle points once its generation has been checked.
enum Lookup<'a> {
    Live(&'a mut Slot),
    /// Issued once, closed since, possibly reused by a newer handle.
    Stale,
}

#[derive(Default)]
pub struct HandleTable {
    slab: Mutex<Slab>,
}

fn handle_of(index: usize, generation: u32) -> u64 {
    ((generation as u64) << 32) | (index as u64 + 1)
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slab(&self) -> MutexGuard<'_, Slab> {
        self.slab.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, slot: Slot) -> u64 {
        let mut slab = self.slab();
        match slab.free.pop() {
            Some(index) => {
                let entry = &mut slab.entries[index];
                entry.generation += 1;
                entry.slot = slot;
                handle_of(index, entry.generation)
            }
            None => {
                slab.entries.push(Entry { generation: 0, slot });
                handle_of(slab.entries.len() - 1, 0)
            }
        }
    }

    fn lookup<'a>(slab: &'a mut Slab, handle: u64) -> Result<Lookup<'a>> {
        let index = (handle & u32::MAX as u64)
            .checked_sub(1)
            .ok_or(VoxelError::InvalidHandle(handle))? as usize;
        let generation = (handle >> 32) as u32;
        let entry = slab.entries.get_mut(index).ok_or(VoxelError::InvalidHandle(handle))?;
        match generation.cmp(&entry.generation) {
            std::cmp::Ordering::Equal   => Ok(Lookup::Live(&mut entry.slot)),
            std::cmp::Ordering::Less    => Ok(Lookup::Stale),
            std::cmp::Ordering::Greater => Err(VoxelError::InvalidHandle(handle)),
        }
    }

    fn source(&self, handle: u64) -> Result<Arc<BlockSource>> {
        let mut slab = self.slab();
        match Self::lookup(&mut slab, handle)? {
            Lookup::Live(Slot::Source(s)) => Ok(s.clone()),
            Lookup::Live(Slot::Closed) | Lookup::Stale => Err(VoxelError::AlreadyClosed),
            Lookup::Live(Slot::Sink(_)) => Err(VoxelError::InvalidHandle(handle)),
        }
    }

    fn sink(&self, handle: u64) -> Result<Arc<BlockSink>> {
        let mut slab = self.slab();
        match Self::lookup(&mut slab, handle)? {
            Lookup::Live(Slot::Sink(s)) => Ok(s.clone()),
            Lookup::Live(Slot::Closed) | Lookup::Stale => Err(VoxelError::AlreadyClosed),
            Lookup::Live(Slot::Source(_)) => Err(VoxelError::InvalidHandle(handle)),
        }
    }

    // ── Reading ──────────────────────────────────────────────────────────────

    /// `format` is a format name or `"auto"`.
    pub fn open_reader<R: Read + Send + 'static>(&self, input: R, format: &str) -> Result<u64> {
        let hint = FormatHint::from_name(format)?;
        let source = BlockSource::open(input, hint)?;
        Ok(self.insert(Slot::Source(Arc::new(source))))
    }

    pub fn source_boundary(&self, handle: u64) -> Result<Boundary> {
        Ok(self.source(handle)?.boundary())
    }

    /// Up to `capacity` blocks, and whether the source is exhausted.
    /// The end flag comes with an empty batch.
    pub fn source_read(&self, handle: u64, capacity: usize) -> Result<(Vec<Block>, bool)> {
        let source = self.source(handle)?;
        let mut buffer = vec![Block::default(); capacity];
        match source.read(&mut buffer, 0, capacity)? {
            Some(n) => {
                buffer.truncate(n);
                Ok((buffer, false))
            }
            None => Ok((Vec::new(), true)),
        }
    }

    // ── Writing ──────────────────────────────────────────────────────────────

    /// `format` must name a concrete format; `"auto"` is rejected.
    pub fn open_writer<W: Write + Send + 'static>(
        &self,
        output:   W,
        format:   &str,
        boundary: Option<Boundary>,
    ) -> Result<u64> {
        let target = FormatHint::from_name(format)?.encode_target()?;
        let sink = BlockSink::open(output, target, boundary)?;
        Ok(self.insert(Slot::Sink(Arc::new(sink))))
    }

    pub fn sink_write(&self, handle: u64, blocks: &[Block]) -> Result<()> {
        self.sink(handle)?.write(blocks, 0, blocks.len())
    }

    // ── Closing ──────────────────────────────────────────────────────────────

    /// Close a source or finalize a sink.  Closing a closed handle is a no-op.
    pub fn close(&self, handle: u64) -> Result<()> {
        let slot = {
            let mut slab = self.slab();
            let slot = match Self::lookup(&mut slab, handle)? {
                Lookup::Live(slot) => std::mem::replace(slot, Slot::Closed),
                Lookup::Stale => Slot::Closed,
            };
            if !matches!(slot, Slot::Closed) {
                let index = (handle & u32::MAX as u64) as usize - 1;
                if slab.entries[index].generation < u32::MAX {
                    slab.free.push(index);
                }
            }
            slot
        };
        match slot {
            Slot::Source(source) => {
                source.close();
                Ok(())
            }
            Slot::Sink(sink) => sink.close(),
            Slot::Closed => {
                trace!("handle {handle} already closed");
                Ok(())
            }
        }
    }

    /// Handles not yet closed.
    pub fn open_count(&self) -> usize {
        self.slab().entries.iter().filter(|e| !matches!(e.slot, Slot::Closed)).count()
    }

    /// Slots allocated so far, open or free.
    pub fn capacity(&self) -> usize {
        self.slab().entries.len()
    }
}
