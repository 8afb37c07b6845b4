//! Heap Region Manager: acquires and releases page-aligned extents of
//! anonymous virtual memory from the OS.
//!
//! Implemented with `mmap`/`munmap` (see DESIGN.md for the grounding). A
//! fresh mapping is never assumed contiguous with any prior one; every
//! extent is tracked individually so teardown can release all of them,
//! rather than only ever remembering the first mapping's base.

use std::os::raw::c_void;
use std::ptr;

use log::{debug, warn};

/// One OS mapping owned by the allocator.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Extent {
    pub base: *mut u8,
    pub len: usize,
    pub id: u32,
}

pub(crate) struct RegionManager {
    page_size: usize,
    extents: Vec<Extent>,
    next_id: u32,
}

impl RegionManager {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            page_size,
            extents: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn extents(&self) -> &[Extent] {
        &self.extents
    }

    /// Rounds `len` up to a page-size multiple and maps that many bytes of
    /// anonymous, private, read/write memory. Returns the new extent.
    pub(crate) fn map(&mut self, len: usize) -> Option<Extent> {
        let rounded = round_up_to_page(len, self.page_size);

        // SAFETY: fixed-purpose anonymous mapping; no file descriptor, no
        // shared state with any other mapping.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                rounded,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if addr == libc::MAP_FAILED {
            warn!("region: mmap of {rounded} bytes failed");
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        let extent = Extent {
            base: addr as *mut u8,
            len: rounded,
            id,
        };
        debug!(
            "region: mapped extent {id} at {:p}, {rounded} bytes",
            extent.base
        );
        self.extents.push(extent);
        Some(extent)
    }

    /// Unmaps every tracked extent and forgets them all.
    pub(crate) fn unmap_all(&mut self) {
        for extent in self.extents.drain(..) {
            // SAFETY: `extent.base`/`extent.len` came from a prior `mmap`
            // call with exactly this length, and nothing else references
            // this mapping once the allocator tears down.
            unsafe {
                libc::munmap(extent.base as *mut c_void, extent.len);
            }
        }
    }
}

fn round_up_to_page(len: usize, page_size: usize) -> usize {
    let mask = page_size - 1;
    (len + mask) & !mask
}

/// Resolves a configured page size: `0` selects the platform default.
pub(crate) fn resolve_page_size(configured: usize) -> usize {
    if configured == 0 {
        // SAFETY: sysconf with a valid name is always safe to call.
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    } else {
        configured
    }
}
