//! A first-fit block-list allocator over a fixed byte arena.
//!
//! Each block starts with a 12-byte little-endian header:
//!
//! | Offset | Field                                      |
//! |--------|--------------------------------------------|
//! | 0      | offset of the next block, `u32::MAX` = end |
//! | 4      | 1 if the block is free                     |
//! | 8      | size of the payload                        |
//!
//! Allocations are addressed by the arena offset of their payload.

/// The size of a block header.
pub const HEADER: usize = 12;

const END: u32 = u32::MAX;

/// Why the last operation failed. See [`Heap::error_id`].
pub mod error_id {
    pub const OK: u8 = 0;
    pub const ZERO_SIZE: u8 = 1;
    pub const NO_FIT: u8 = 2;
    pub const UNKNOWN_BLOCK: u8 = 4;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    next: Option<usize>,
    is_free: bool,
    size: usize,
}

/// A heap of `N` bytes, headers included.
pub struct Heap<const N: usize> {
    data: [u8; N],
    error_id: u8,
}

impl<const N: usize> Heap<N> {
    pub fn new() -> Self {
        assert!(N > HEADER && N <= u32::MAX as usize, "bad heap size");
        let mut this = Self {
            data: [0; N],
            error_id: error_id::OK,
        };
        this.write_block(
            0,
            Block {
                next: None,
                is_free: true,
                size: N - HEADER,
            },
        );
        this
    }

    fn read_u32(&self, at: usize) -> u32 {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(&self.data[at..at + 4]);
        u32::from_le_bytes(bytes)
    }

    fn write_u32(&mut self, at: usize, value: u32) {
        self.data[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn read_block(&self, at: usize) -> Block {
        let next = self.read_u32(at);
        Block {
            next: (next != END).then(|| next as usize),
            is_free: self.read_u32(at + 4) != 0,
            size: self.read_u32(at + 8) as usize,
        }
    }

    fn write_block(&mut self, at: usize, block: Block) {
        self.write_u32(at, block.next.map_or(END, |x| x as u32));
        self.write_u32(at + 4, block.is_free as u32);
        self.write_u32(at + 8, block.size as u32);
    }

    /// Iterate over the blocks in address order.
    fn blocks(&self) -> impl Iterator<Item = (usize, Block)> + '_ {
        let mut cursor = Some(0);
        core::iter::from_fn(move || {
            let at = cursor?;
            let block = self.read_block(at);
            cursor = block.next;
            Some((at, block))
        })
    }

    /// Allocate `size` bytes (rounded up to a multiple of 4) and return the
    /// offset of the payload, or `None` if no free block is large enough.
    pub fn alloc(&mut self, size: usize) -> Option<usize> {
        if size == 0 {
            self.error_id = error_id::ZERO_SIZE;
            return None;
        }
        let size = (size + 3) & !3;

        let Some((at, block)) = self
            .blocks()
            .find(|(_, b)| b.is_free && b.size > size + HEADER)
        else {
            self.error_id = error_id::NO_FIT;
            return None;
        };

        // The fit condition leaves room for a header, so the block is always
        // split
        let rest = at + HEADER + size;
        self.write_block(
            rest,
            Block {
                next: block.next,
                is_free: true,
                size: block.size - size - HEADER,
            },
        );
        self.write_block(
            at,
            Block {
                next: Some(rest),
                is_free: false,
                size,
            },
        );

        self.error_id = error_id::OK;
        Some(at + HEADER)
    }

    /// Release the allocation at `ptr`, merging it with free neighbours.
    ///
    /// An offset that doesn't name a live allocation is ignored, and
    /// [`error_id`](Self::error_id) records the failure.
    pub fn free(&mut self, ptr: usize) {
        let target = ptr.wrapping_sub(HEADER);
        let mut prev = None;
        let mut found = None;
        for (at, block) in self.blocks() {
            if at == target && !block.is_free {
                found = Some(block);
                break;
            }
            prev = Some((at, block));
        }

        let Some(mut block) = found else {
            self.error_id = error_id::UNKNOWN_BLOCK;
            return;
        };
        let mut at = target;
        block.is_free = true;

        if let Some((prev_at, mut prev_block)) = prev {
            if prev_block.is_free {
                prev_block.size += block.size + HEADER;
                prev_block.next = block.next;
                at = prev_at;
                block = prev_block;
            }
        }

        if let Some(next_at) = block.next {
            let next = self.read_block(next_at);
            if next.is_free {
                block.size += next.size + HEADER;
                block.next = next.next;
            }
        }

        self.write_block(at, block);
        self.error_id = error_id::OK;
    }

    /// Borrow `len` bytes of the payload at `ptr`.
    pub fn slice(&self, ptr: usize, len: usize) -> &[u8] {
        &self.data[ptr..ptr + len]
    }

    /// Mutably borrow `len` bytes of the payload at `ptr`.
    pub fn slice_mut(&mut self, ptr: usize, len: usize) -> &mut [u8] {
        &mut self.data[ptr..ptr + len]
    }

    /// Get the total payload size of the free blocks.
    pub fn free_bytes(&self) -> usize {
        self.blocks()
            .filter(|(_, b)| b.is_free)
            .map(|(_, b)| b.size)
            .sum()
    }

    /// Get the number of blocks, free or not.
    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    /// Get the outcome of the last `alloc` or `free`. See [`error_id`].
    pub fn error_id(&self) -> u8 {
        self.error_id
    }
}

impl<const N: usize> Default for Heap<N> {
    fn default() -> Self {
        Self::new()
    }
}
