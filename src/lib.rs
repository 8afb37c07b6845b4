//! A general-purpose dynamic memory allocator built over `mmap`-backed
//! heap extents.
//!
//! This crate used to live inside a larger OS workspace as the kernel's
//! own heap; it now stands on its own as an ordinary userspace library,
//! carving its heap out of anonymous virtual memory instead of a
//! bootloader-provided physical range. The free-list/placement/
//! split-and-coalesce core is unchanged in spirit.
//!
//! ```
//! use dynalloc::{Allocator, AllocatorConfig};
//!
//! let alloc = Allocator::new();
//! alloc.init(AllocatorConfig::default()).unwrap();
//!
//! let ptr = alloc.alloc(128);
//! assert!(!ptr.is_null());
//! alloc.free(ptr);
//!
//! alloc.cleanup();
//! ```

mod aligned;
mod block;
mod config;
mod error;
mod heap;
mod placement;
mod protection;
mod region;
mod stats;

use std::sync::Mutex;

use log::warn;

pub use config::{AllocationStrategy, AllocatorConfig};
pub use error::InitError;
pub use protection::ProtFlags;
pub use stats::Stats;

use block::HEADER_SIZE;
use heap::{ReallocOutcome, State};

/// A process-local dynamic memory allocator.
///
/// Every mutating operation serializes on a single internal mutex (the
/// Concurrency Guard). All operations except [`Allocator::init`] report
/// failure through their return value rather than panicking or blocking
/// forever: a null pointer, `false`, or a zeroed [`Stats`].
pub struct Allocator {
    state: Mutex<Option<State>>,
}

impl Allocator {
    /// Builds an allocator in its pre-`init` state. No memory is mapped
    /// until [`Allocator::init`] is called.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    /// Maps the initial heap extent and brings the allocator into service.
    ///
    /// Returns [`InitError::AlreadyInitialized`] if called twice without an
    /// intervening [`Allocator::cleanup`].
    pub fn init(&self, config: AllocatorConfig) -> Result<(), InitError> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(InitError::AlreadyInitialized);
        }
        *guard = Some(State::new(&config)?);
        Ok(())
    }

    /// Allocates `size` bytes. Returns a null pointer on failure (including
    /// `size == 0`, an uninitialized allocator, or OS mapping failure).
    pub fn alloc(&self, size: usize) -> *mut u8 {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(state) => state.alloc(size),
            None => std::ptr::null_mut(),
        }
    }

    /// Allocates `size` bytes aligned to `alignment`, which must be a
    /// nonzero power of two. Returns a null pointer on failure, including
    /// `size == 0` or an invalid alignment.
    pub fn alloc_aligned(&self, size: usize, alignment: usize) -> *mut u8 {
        if size == 0 || !aligned::is_valid_alignment(alignment) {
            return std::ptr::null_mut();
        }
        let overhead = aligned::overhead_for(alignment);
        let raw = self.alloc(size + overhead);
        if raw.is_null() {
            return std::ptr::null_mut();
        }

        let aligned_addr = aligned::aligned_address(raw as usize, alignment);
        let aligned_ptr = aligned_addr as *mut u8;
        // SAFETY: `raw` came from a just-succeeded `alloc` of
        // `size + overhead` bytes, which leaves room below `aligned_ptr`
        // for the back-pointer and at least `size` bytes above it.
        unsafe { aligned::store_back_pointer(aligned_ptr, raw) };
        aligned_ptr
    }

    /// Releases a pointer previously returned by [`Allocator::alloc`],
    /// [`Allocator::alloc_aligned`], or [`Allocator::realloc`]. Freeing a
    /// pointer this allocator did not produce, or freeing twice, is a no-op.
    pub fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let state = match guard.as_mut() {
            Some(state) => state,
            None => return,
        };

        if let Some(block) = state.find_used_block(ptr) {
            state.free(block);
            return;
        }

        // Might be an aligned pointer: recover the raw allocation via its
        // back-pointer and retry.
        // SAFETY: if `ptr` is not a back-pointer-bearing aligned pointer
        // this allocator produced, the recovered address will not match
        // any used block and the lookup below simply fails.
        let raw = unsafe { aligned::read_back_pointer(ptr) };
        if let Some(block) = state.find_used_block(raw) {
            state.free(block);
        }
    }

    /// Resizes the allocation at `ptr` to `new_size` bytes, preserving the
    /// lesser of the old and new sizes worth of content. A null `ptr`
    /// behaves as [`Allocator::alloc`]; a `new_size` of zero behaves as
    /// [`Allocator::free`] and returns a null pointer. Otherwise returns a
    /// null pointer if `ptr` is not a live allocation from this allocator or
    /// if no memory is available for a grown copy; `ptr` remains valid in
    /// that case. Does not support pointers from [`Allocator::alloc_aligned`].
    pub fn realloc(&self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        if new_size == 0 {
            self.free(ptr);
            return std::ptr::null_mut();
        }

        let outcome = {
            let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                Some(state) => state.try_realloc(ptr, new_size),
                None => return std::ptr::null_mut(),
            }
        };

        match outcome {
            ReallocOutcome::Done(p) => p,
            ReallocOutcome::NotFound => std::ptr::null_mut(),
            ReallocOutcome::NeedFresh { old_capacity } => {
                // Dropped the guard above before calling back into `alloc`
                // and `free`, both of which reacquire it themselves — this
                // is the only place the allocator re-enters its own public
                // API under the Concurrency Guard.
                let fresh = self.alloc(new_size);
                if fresh.is_null() {
                    return std::ptr::null_mut();
                }
                let copy_len = old_capacity.min(new_size);
                // SAFETY: `ptr` still designates `old_capacity` live bytes
                // (we have not freed it yet), and `fresh` designates at
                // least `new_size >= copy_len` freshly allocated bytes;
                // the two allocations cannot overlap.
                unsafe {
                    std::ptr::copy_nonoverlapping(ptr, fresh, copy_len);
                }
                self.free(ptr);
                fresh
            }
        }
    }

    /// Changes the page protection of the allocation at `ptr` covering at
    /// least `size` bytes. Returns `false` if `ptr` is not a live
    /// allocation or the underlying `mprotect` call fails.
    pub fn protect(&self, ptr: *mut u8, size: usize, flags: ProtFlags) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(state) => state.protect(ptr, size, flags),
            None => false,
        }
    }

    /// Snapshots current usage and fragmentation statistics. Returns a
    /// zeroed [`Stats`] if the allocator is not initialized.
    pub fn stats(&self) -> Stats {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(state) => state.stats(),
            None => Stats::default(),
        }
    }

    /// Unmaps every extent and returns the allocator to its pre-`init`
    /// state. Pointers outstanding from before this call are no longer
    /// valid to use.
    pub fn cleanup(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut state) = guard.take() {
            state.teardown();
        } else {
            warn!("cleanup called on an allocator that was never initialized");
        }
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-block bookkeeping overhead, in bytes. Exposed so callers can reason
/// about [`Stats::overhead`] without depending on layout internals.
pub const BLOCK_HEADER_SIZE: usize = HEADER_SIZE;

/// The process-wide allocator instance. Most callers should prefer an
/// explicit [`Allocator`] they own, but a single shared instance mirrors
/// how this heap is conventionally reached for in the systems this crate
/// was extracted from.
static GLOBAL: Allocator = Allocator::new();

/// Initializes the process-wide allocator. See [`Allocator::init`].
pub fn mem_init(config: AllocatorConfig) -> Result<(), InitError> {
    GLOBAL.init(config)
}

/// See [`Allocator::alloc`].
pub fn mem_alloc(size: usize) -> *mut u8 {
    GLOBAL.alloc(size)
}

/// See [`Allocator::alloc_aligned`].
pub fn mem_alloc_aligned(size: usize, alignment: usize) -> *mut u8 {
    GLOBAL.alloc_aligned(size, alignment)
}

/// See [`Allocator::free`].
pub fn mem_free(ptr: *mut u8) {
    GLOBAL.free(ptr)
}

/// See [`Allocator::realloc`].
pub fn mem_realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    GLOBAL.realloc(ptr, new_size)
}

/// See [`Allocator::protect`].
pub fn mem_protect(ptr: *mut u8, size: usize, flags: ProtFlags) -> bool {
    GLOBAL.protect(ptr, size, flags)
}

/// See [`Allocator::stats`].
pub fn mem_stats() -> Stats {
    GLOBAL.stats()
}

/// See [`Allocator::cleanup`].
pub fn mem_cleanup() {
    GLOBAL.cleanup()
}
