//! The heap's internal, single-threaded state: block lists, the region
//! manager, and the Splitter/Coalescer. Everything in this module assumes
//! exclusive access — the [`crate::Allocator`] is what provides that via its
//! mutex.

use std::ptr;

use log::{debug, trace};

use crate::block::{
    self, addr_insert_after, addr_unlink, list_push_front, list_unlink, payload_ptr,
    total_size_for, write_header, BlockHeader, HEADER_SIZE, MIN_BLOCK_SIZE,
};
use crate::config::{AllocationStrategy, AllocatorConfig};
use crate::error::InitError;
use crate::placement;
use crate::protection::ProtFlags;
use crate::region::{resolve_page_size, RegionManager};
use crate::stats::Stats;

/// Minimum bytes requested from the OS on an on-demand extension, so small
/// requests don't cause a flurry of tiny mappings.
const MIN_EXTENSION_SIZE: usize = 64 * 1024;

pub(crate) struct State {
    free_list: *mut BlockHeader,
    used_list: *mut BlockHeader,
    region: RegionManager,
    strategy: AllocationStrategy,
    stats: Stats,
}

// SAFETY: every field is only ever touched while the owning Allocator's
// mutex is held; State itself is never shared without that guard.
unsafe impl Send for State {}

/// Outcome of attempting an in-place realloc under a single lock
/// acquisition.
pub(crate) enum ReallocOutcome {
    Done(*mut u8),
    NeedFresh { old_capacity: usize },
    NotFound,
}

impl State {
    pub(crate) fn new(config: &AllocatorConfig) -> Result<Self, InitError> {
        let page_size = resolve_page_size(config.page_size);
        if page_size == 0 || (page_size & (page_size - 1)) != 0 {
            return Err(InitError::InvalidPageSize(page_size));
        }

        let mut region = RegionManager::new(page_size);
        let extent = region
            .map(config.initial_heap_size.max(MIN_BLOCK_SIZE))
            .ok_or(InitError::MapFailed {
                requested: config.initial_heap_size,
            })?;

        let block = unsafe { write_header(extent.base as usize, extent.len, extent.id, true) };

        let mut state = State {
            free_list: ptr::null_mut(),
            used_list: ptr::null_mut(),
            region,
            strategy: config.allocation_strategy,
            stats: Stats {
                total_memory: extent.len,
                used_memory: 0,
                free_memory: extent.len,
                overhead: HEADER_SIZE,
                peak_usage: 0,
                total_allocations: 0,
                active_allocations: 0,
                fragmentation_ratio: 0.0,
            },
        };
        unsafe { list_push_front(&mut state.free_list, block) };

        debug!(
            "heap: initialized with {} bytes (page size {page_size})",
            extent.len
        );
        Ok(state)
    }

    pub(crate) fn teardown(&mut self) {
        self.region.unmap_all();
        self.free_list = ptr::null_mut();
        self.used_list = ptr::null_mut();
        self.stats = Stats::default();
    }

    // -- allocation ------------------------------------------------------

    /// Core placement: finds or creates a free block of at least
    /// `required` bytes, splits the surplus, moves it to the used list,
    /// and returns it. `required` already includes the header.
    fn place(&mut self, required: usize) -> Option<*mut BlockHeader> {
        let block = match placement::select(self.free_list, self.strategy, required) {
            Some(b) => b,
            None => {
                trace!("heap: no free block for {required} bytes, extending");
                self.extend(required)?;
                placement::select(self.free_list, self.strategy, required)?
            }
        };

        unsafe { list_unlink(&mut self.free_list, block) };
        self.split_tail_if_profitable(block, required);

        unsafe {
            (*block).free = false;
            (*block).protection = ProtFlags::READ | ProtFlags::WRITE;
        }
        list_push_front_used(self, block);

        let size = unsafe { (*block).size };
        self.stats.used_memory += size;
        self.stats.free_memory -= size;
        self.stats.total_allocations += 1;
        self.stats.active_allocations += 1;
        self.stats.peak_usage = self.stats.peak_usage.max(self.stats.used_memory);

        Some(block)
    }

    pub(crate) fn alloc(&mut self, payload_size: usize) -> *mut u8 {
        if payload_size == 0 {
            return ptr::null_mut();
        }
        let required = total_size_for(payload_size);
        match self.place(required) {
            Some(block) => unsafe { payload_ptr(block) },
            None => ptr::null_mut(),
        }
    }

    /// Extends the heap by at least `min_size` bytes and inserts the new
    /// extent's single free block. Never assumes the new mapping is
    /// contiguous with any existing one.
    fn extend(&mut self, min_size: usize) -> Option<()> {
        let request = min_size.max(MIN_EXTENSION_SIZE);
        let extent = self.region.map(request)?;
        let block = unsafe { write_header(extent.base as usize, extent.len, extent.id, true) };
        unsafe { list_push_front(&mut self.free_list, block) };
        self.stats.total_memory += extent.len;
        self.stats.free_memory += extent.len;
        debug!("heap: extended by {} bytes (extent {})", extent.len, extent.id);
        Some(())
    }

    /// If `block` (currently sized for at least `used_total` bytes) has
    /// enough surplus to carve off a standalone free block, does so and
    /// inserts the tail into the free list immediately (every split
    /// produces a free-list member, never a block reachable only through
    /// the address chain).
    fn split_tail_if_profitable(&mut self, block: *mut BlockHeader, used_total: usize) {
        let original_size = unsafe { (*block).size };
        let surplus = original_size - used_total;
        if surplus < MIN_BLOCK_SIZE {
            return;
        }

        let tail_addr = block as usize + used_total;
        let extent_id = unsafe { (*block).extent_id };
        let tail = unsafe { write_header(tail_addr, surplus, extent_id, true) };

        unsafe {
            (*block).size = used_total;
            addr_insert_after(block, tail);
            list_push_front(&mut self.free_list, tail);
        }
    }

    // -- freeing -----------------------------------------------------------

    pub(crate) fn find_used_block(&self, ptr: *mut u8) -> Option<*mut BlockHeader> {
        find_in_list(self.used_list, ptr)
    }

    pub(crate) fn free(&mut self, block: *mut BlockHeader) {
        unsafe { list_unlink(&mut self.used_list, block) };

        let size = unsafe { (*block).size };
        self.stats.used_memory -= size;
        self.stats.free_memory += size;
        self.stats.active_allocations -= 1;

        unsafe { (*block).free = true };
        let merged = self.coalesce(block);
        unsafe { list_push_front(&mut self.free_list, merged) };
    }

    /// Merges `block` with any memory-adjacent free neighbors (its
    /// `addr_next`/`addr_prev`), not by free-list link order. Returns the
    /// surviving block, already unlinked from the free list it was on.
    fn coalesce(&mut self, block: *mut BlockHeader) -> *mut BlockHeader {
        let mut block = block;

        unsafe {
            let succ = (*block).addr_next;
            if !succ.is_null() && (*succ).free {
                list_unlink(&mut self.free_list, succ);
                (*block).size += (*succ).size;
                addr_unlink(succ);
            }

            let pred = (*block).addr_prev;
            if !pred.is_null() && (*pred).free {
                list_unlink(&mut self.free_list, pred);
                (*pred).size += (*block).size;
                addr_unlink(block);
                block = pred;
            }
        }

        block
    }

    // -- realloc -------------------------------------------------------

    pub(crate) fn try_realloc(&mut self, ptr: *mut u8, new_size: usize) -> ReallocOutcome {
        let block = match self.find_used_block(ptr) {
            Some(b) => b,
            None => return ReallocOutcome::NotFound,
        };

        let required = total_size_for(new_size);
        let current_size = unsafe { (*block).size };

        if required <= current_size {
            self.split_tail_if_profitable(block, required);
            let delta = current_size - unsafe { (*block).size };
            self.stats.used_memory -= delta;
            self.stats.free_memory += delta;
            return ReallocOutcome::Done(unsafe { payload_ptr(block) });
        }

        let succ = unsafe { (*block).addr_next };
        let succ_is_free_and_enough = unsafe {
            !succ.is_null() && (*succ).free && current_size + (*succ).size >= required
        };

        if succ_is_free_and_enough {
            unsafe {
                list_unlink(&mut self.free_list, succ);
                let succ_size = (*succ).size;
                (*block).size += succ_size;
                addr_unlink(succ);

                self.stats.free_memory -= succ_size;
                self.stats.used_memory += succ_size;
                self.stats.peak_usage = self.stats.peak_usage.max(self.stats.used_memory);
            }
            self.split_tail_if_profitable(block, required);
            return ReallocOutcome::Done(unsafe { payload_ptr(block) });
        }

        ReallocOutcome::NeedFresh {
            old_capacity: current_size - HEADER_SIZE,
        }
    }

    // -- protection ------------------------------------------------------

    pub(crate) fn protect(&mut self, ptr: *mut u8, size: usize, flags: ProtFlags) -> bool {
        let block = match self.find_used_block(ptr) {
            Some(b) => b,
            None => return false,
        };

        let page_size = self.region.page_size();
        let page_mask = page_size - 1;
        let start = ptr as usize & !page_mask;
        let end = block::align_up(ptr as usize + size, page_size);
        let len = end - start;

        // SAFETY: `[start, end)` covers `[ptr, ptr + size)` and lies within
        // mapped memory this allocator owns (page-rounding may also cover
        // bytes belonging to a neighboring block sharing those pages).
        let result = unsafe {
            libc::mprotect(start as *mut libc::c_void, len, flags.to_os_prot())
        };

        if result == 0 {
            unsafe { (*block).protection = flags };
            true
        } else {
            false
        }
    }

    // -- statistics ------------------------------------------------------

    pub(crate) fn stats(&self) -> Stats {
        let mut snapshot = self.stats;
        snapshot.fragmentation_ratio = if snapshot.free_memory > 0 {
            let largest = largest_free_block(self.free_list);
            1.0 - (largest as f64 / snapshot.free_memory as f64)
        } else {
            0.0
        };
        snapshot
    }
}

fn list_push_front_used(state: &mut State, block: *mut BlockHeader) {
    unsafe { list_push_front(&mut state.used_list, block) };
}

fn find_in_list(head: *mut BlockHeader, ptr: *mut u8) -> Option<*mut BlockHeader> {
    if ptr.is_null() {
        return None;
    }
    let candidate = (ptr as usize).checked_sub(HEADER_SIZE)?;
    let mut current = head;
    while !current.is_null() {
        if current as usize == candidate {
            return Some(current);
        }
        current = unsafe { (*current).list_next };
    }
    None
}

fn largest_free_block(head: *mut BlockHeader) -> usize {
    let mut largest = 0usize;
    let mut current = head;
    while !current.is_null() {
        let size = unsafe { (*current).size };
        if size > largest {
            largest = size;
        }
        current = unsafe { (*current).list_next };
    }
    largest
}
