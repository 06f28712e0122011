//! Per-frame bump allocators for buffer sub-allocation.
//!
//! Generalizes the teacher's per-frame arena (`frame/alloc.rs`) into a
//! standing pool of fixed-size blocks that survive across frames, rather
//! than reallocating on every `next_frame`.

use ash::vk;

use crate::buffer::{Buffer, BufferDesc, MemoryDomain};
use crate::error::Error;

/// A bump-pointer view into one block, handed back by `BufferPool::alloc`.
#[derive(Debug, Clone, Copy)]
pub struct BufferAllocation {
    pub block_index: usize,
    pub offset: u64,
    pub size: u64,
}

struct Block {
    buffer: Buffer,
    cursor: u64,
}

/// A pool of fixed-size blocks of a given usage/domain. Sub-allocation is a
/// bump pointer with alignment; oversize requests get their own block.
pub struct BufferPool {
    usage: vk::BufferUsageFlags,
    domain: MemoryDomain,
    block_size: u64,
    blocks: Vec<Block>,
    retention: usize,
}

impl BufferPool {
    pub fn new(usage: vk::BufferUsageFlags, domain: MemoryDomain, block_size: u64) -> BufferPool {
        BufferPool {
            usage,
            domain,
            block_size,
            blocks: Vec::new(),
            retention: 4,
        }
    }

    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Resets every block's cursor to zero without freeing them, ready for
    /// reuse next frame. Blocks beyond `retention` are dropped.
    pub fn reset(&mut self) {
        if self.blocks.len() > self.retention {
            self.blocks.truncate(self.retention);
        }
        for block in &mut self.blocks {
            block.cursor = 0;
        }
    }

    fn alloc_in_block(block: &mut Block, size: u64, alignment: u64) -> Option<BufferAllocation> {
        let aligned = align_up(block.cursor, alignment);
        if aligned + size > block.buffer.size() {
            return None;
        }
        block.cursor = aligned + size;
        Some(BufferAllocation {
            block_index: 0,
            offset: aligned,
            size,
        })
    }

    /// Sub-allocates `size` bytes at `alignment` from an existing block,
    /// allocating a fresh one (oversize if needed) via `allocate_block` when
    /// none has room.
    pub fn alloc(
        &mut self,
        size: u64,
        alignment: u64,
        allocate_block: impl FnOnce(u64) -> Result<Buffer, Error>,
    ) -> Result<(BufferAllocation, &Buffer), Error> {
        for (index, block) in self.blocks.iter_mut().enumerate() {
            if let Some(mut alloc) = Self::alloc_in_block(block, size, alignment) {
                alloc.block_index = index;
                let index = alloc.block_index;
                return Ok((alloc, &self.blocks[index].buffer));
            }
        }

        let new_block_size = size.max(self.block_size);
        let buffer = allocate_block(new_block_size)?;
        let mut block = Block { buffer, cursor: 0 };
        let mut alloc = Self::alloc_in_block(&mut block, size, alignment)
            .expect("freshly allocated block must fit the request");
        self.blocks.push(block);
        alloc.block_index = self.blocks.len() - 1;
        Ok((alloc, &self.blocks[alloc.block_index].buffer))
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn domain(&self) -> MemoryDomain {
        self.domain
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block_desc(&self, size: u64) -> BufferDesc {
        BufferDesc {
            size,
            usage: self.usage,
            domain: self.domain,
            device_address: false,
        }
    }

    pub unsafe fn destroy(&self, device: &ash::Device) {
        for block in &self.blocks {
            block.buffer.destroy_raw(device);
        }
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(64, 16), 64);
        assert_eq!(align_up(65, 16), 80);
    }
}
