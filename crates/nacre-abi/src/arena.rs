//! Call-scoped scratch memory
//!
//! Memory-classed aggregates have no stable managed address, so each call
//! copies them into scratch native memory and passes the copy's address. All
//! scratch for one call lives in a single `CallArena` and is freed when the
//! arena drops, including when the call errors out partway.

use std::alloc;
use std::ptr::NonNull;

use crate::error::{AbiError, AbiResult};

struct Block {
    ptr: NonNull<u8>,
    layout: alloc::Layout,
}

/// Scratch allocator scoped to a single call.
#[derive(Default)]
pub struct CallArena {
    blocks: Vec<Block>,
}

impl CallArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed block, returning its stable address.
    pub fn alloc(&mut self, size: usize, align: usize) -> AbiResult<NonNull<u8>> {
        let align = align.max(1).next_power_of_two();
        let layout = alloc::Layout::from_size_align(size.max(1), align)
            .map_err(|e| AbiError::Access(format!("invalid scratch shape: {e}")))?;
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| AbiError::Access("scratch allocation failed".to_string()))?;
        self.blocks.push(Block { ptr, layout });
        Ok(ptr)
    }

    /// Allocate a block initialized from `bytes`.
    pub fn alloc_bytes(&mut self, bytes: &[u8], align: usize) -> AbiResult<NonNull<u8>> {
        let ptr = self.alloc(bytes.len(), align)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr(), bytes.len());
        }
        Ok(ptr)
    }

    /// Number of live blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Drop for CallArena {
    fn drop(&mut self) {
        for block in self.blocks.drain(..) {
            unsafe { alloc::dealloc(block.ptr.as_ptr(), block.layout) };
        }
    }
}
