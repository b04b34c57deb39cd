// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The offset-simulating arena allocator.
//!
//! [`ArenaAllocator`] hands out byte offsets into a single arena that does
//! not exist yet. `alloc` prefers reusing freed space (best-fit) over
//! growing the high-water mark; `free` coalesces adjacent blocks so
//! fragments heal back into large spans. Once every placement is decided,
//! [`ArenaAllocator::materialize`] performs the one real allocation through
//! the [`DeviceRuntime`] and freezes the plan.

use crate::{ArenaStats, Buffer, DeviceRuntime, HostRuntime, MemoryPlanError};
use std::collections::{BTreeSet, HashMap};
use tensor_meta::DType;

/// Alignment unit for every request: the widest supported element width.
pub const ALIGNMENT: usize = DType::MAX_SIZE_BYTES;

/// A contiguous unused range `[offset, offset + size)` of the arena.
///
/// Field order matters: the derived `Ord` is `(size, offset)`, which is
/// exactly the best-fit ordering the free set needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FreeBlock {
    size: usize,
    offset: usize,
}

impl FreeBlock {
    fn tail(&self) -> usize {
        self.offset + self.size
    }
}

/// Best-fit, coalescing arena allocator.
///
/// Generic over the [`DeviceRuntime`] that performs the real allocation;
/// defaults to [`HostRuntime`].
///
/// # Invariant
/// Every free block appears in all three views at once:
/// `heads[offset] == tails[offset + size] == size`, and `(size, offset)` is
/// in the ordered set. The views are only mutated together.
pub struct ArenaAllocator<R: DeviceRuntime = HostRuntime> {
    runtime: R,
    /// Sum of live (allocated, not freed) aligned request sizes.
    used: usize,
    /// High-water mark: the arena size a materialized buffer will have.
    peak: usize,
    /// The real buffer, present only after materialization.
    buffer: Option<Buffer>,
    /// Free blocks ordered by `(size, offset)` for best-fit lookup.
    free_blocks: BTreeSet<FreeBlock>,
    /// Head address → block size, for "does a block start here?" queries.
    heads: HashMap<usize, usize>,
    /// Tail address → block size, for "does a block end here?" queries.
    tails: HashMap<usize, usize>,
}

impl Default for ArenaAllocator<HostRuntime> {
    fn default() -> Self {
        Self::new(HostRuntime)
    }
}

impl<R: DeviceRuntime> ArenaAllocator<R> {
    /// Creates an empty arena backed by the given runtime.
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            used: 0,
            peak: 0,
            buffer: None,
            free_blocks: BTreeSet::new(),
            heads: HashMap::new(),
            tails: HashMap::new(),
        }
    }

    /// Simulates an allocation of `size` bytes and returns its arena offset.
    ///
    /// The request is rounded up to [`ALIGNMENT`]. The smallest free block
    /// that fits is reused (remainder reinserted); failing that, a free
    /// block ending exactly at the high-water mark is extended backward so
    /// the arena only grows by the uncovered delta; failing that, the arena
    /// grows by the full aligned size.
    ///
    /// # Errors
    /// [`MemoryPlanError::AlreadyMaterialized`] once the real buffer exists.
    pub fn alloc(&mut self, size: usize) -> Result<usize, MemoryPlanError> {
        if self.buffer.is_some() {
            return Err(MemoryPlanError::AlreadyMaterialized);
        }
        let size = align_up(size);
        if size == 0 {
            return Ok(self.peak);
        }

        // Best fit: smallest block with block.size >= size, ties by address.
        if let Some(&block) = self.free_blocks.range(FreeBlock { size, offset: 0 }..).next() {
            self.remove_block(block);
            if block.size > size {
                self.insert_block(FreeBlock {
                    size: block.size - size,
                    offset: block.offset + size,
                });
            }
            self.used += size;
            return Ok(block.offset);
        }

        // No block fits. If one ends at the high-water mark, grow it
        // backward into the request and claim only the missing tail.
        let offset = if let Some(&tail_size) = self.tails.get(&self.peak) {
            let block = FreeBlock {
                size: tail_size,
                offset: self.peak - tail_size,
            };
            self.remove_block(block);
            self.peak += size - tail_size;
            block.offset
        } else {
            let offset = self.peak;
            self.peak += size;
            offset
        };
        self.used += size;
        Ok(offset)
    }

    /// Returns the range `[offset, offset + size)` to the free set,
    /// coalescing with an adjacent free block on either side (or both).
    ///
    /// `size` is rounded up to [`ALIGNMENT`], matching what [`alloc`](Self::alloc)
    /// consumed. Freeing a range that was never allocated, or freeing it
    /// twice, is a caller error the bookkeeping does not detect.
    ///
    /// # Errors
    /// [`MemoryPlanError::AlreadyMaterialized`] once the real buffer exists.
    pub fn free(&mut self, offset: usize, size: usize) -> Result<(), MemoryPlanError> {
        if self.buffer.is_some() {
            return Err(MemoryPlanError::AlreadyMaterialized);
        }
        let size = align_up(size);
        if size == 0 {
            return Ok(());
        }

        let mut block = FreeBlock { size, offset };

        // Merge with a block ending exactly at our head.
        if let Some(&pre_size) = self.tails.get(&block.offset) {
            let pre = FreeBlock {
                size: pre_size,
                offset: block.offset - pre_size,
            };
            self.remove_block(pre);
            block.offset = pre.offset;
            block.size += pre.size;
        }

        // Merge with a block starting exactly at our tail.
        if let Some(&post_size) = self.heads.get(&(offset + size)) {
            let post = FreeBlock {
                size: post_size,
                offset: offset + size,
            };
            self.remove_block(post);
            block.size += post.size;
        }

        self.insert_block(block);
        debug_assert!(self.used >= size, "free exceeds outstanding allocations");
        self.used = self.used.saturating_sub(size);
        Ok(())
    }

    /// Performs the real allocation and returns the arena bytes.
    ///
    /// The first call requests a buffer of size [`peak`](Self::peak) from
    /// the runtime; subsequent calls return the cached buffer without
    /// re-requesting. After this point [`alloc`](Self::alloc)/[`free`](Self::free)
    /// are rejected.
    pub fn materialize(&mut self) -> &[u8] {
        if self.buffer.is_none() {
            let buffer = self.runtime.allocate(self.peak);
            tracing::debug!(
                runtime = self.runtime.name(),
                bytes = self.peak,
                "materialized arena buffer"
            );
            self.buffer = Some(buffer);
        }
        match &self.buffer {
            Some(buffer) => buffer,
            None => unreachable!("buffer was just materialized"),
        }
    }

    /// Returns the materialized arena bytes, or `None` before materialization.
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    /// Returns the materialized arena bytes mutably, or `None` before
    /// materialization.
    pub fn buffer_mut(&mut self) -> Option<&mut [u8]> {
        self.buffer.as_deref_mut()
    }

    /// Bytes currently allocated (aligned).
    pub fn used(&self) -> usize {
        self.used
    }

    /// The high-water mark: the size the materialized buffer will have.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Whether the real buffer exists yet.
    pub fn is_materialized(&self) -> bool {
        self.buffer.is_some()
    }

    /// Returns a snapshot of the arena's accounting.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            used_bytes: self.used,
            peak_bytes: self.peak,
            free_blocks: self.free_blocks.len(),
            materialized: self.buffer.is_some(),
        }
    }

    fn insert_block(&mut self, block: FreeBlock) {
        self.free_blocks.insert(block);
        self.heads.insert(block.offset, block.size);
        self.tails.insert(block.tail(), block.size);
    }

    fn remove_block(&mut self, block: FreeBlock) {
        self.free_blocks.remove(&block);
        self.heads.remove(&block.offset);
        self.tails.remove(&block.tail());
    }
}

impl<R: DeviceRuntime> Drop for ArenaAllocator<R> {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.runtime.release(buffer);
        }
    }
}

impl<R: DeviceRuntime> std::fmt::Debug for ArenaAllocator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaAllocator")
            .field("runtime", &self.runtime.name())
            .field("used", &self.used)
            .field("peak", &self.peak)
            .field("free_blocks", &self.free_blocks.len())
            .field("materialized", &self.buffer.is_some())
            .finish()
    }
}

/// Rounds `size` up to the next multiple of [`ALIGNMENT`].
fn align_up(size: usize) -> usize {
    size.div_ceil(ALIGNMENT) * ALIGNMENT
}
