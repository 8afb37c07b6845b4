//! Allocator configuration: the options recognized by [`crate::Allocator::init`].

/// Selects which free block a request is placed into.
///
/// Maps directly onto the `allocation_strategy` integer selector: `0` is
/// first-fit, `1` is best-fit, `2` is worst-fit, and any other value falls
/// back to first-fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStrategy {
    #[default]
    FirstFit,
    BestFit,
    WorstFit,
}

impl From<i32> for AllocationStrategy {
    fn from(value: i32) -> Self {
        match value {
            1 => AllocationStrategy::BestFit,
            2 => AllocationStrategy::WorstFit,
            _ => AllocationStrategy::FirstFit,
        }
    }
}

/// Configuration accepted by [`crate::Allocator::init`].
#[derive(Debug, Clone, Copy)]
pub struct AllocatorConfig {
    /// Bytes to map at init, rounded up to a page-size multiple.
    pub initial_heap_size: usize,
    /// Override of the system page size. `0` selects the platform default
    /// (`sysconf(_SC_PAGESIZE)`).
    pub page_size: usize,
    /// Reserved: accepted and recorded, but guard pages are not enforced by
    /// this allocator.
    pub use_guard_pages: bool,
    /// Placement policy used to satisfy allocation requests.
    pub allocation_strategy: AllocationStrategy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            initial_heap_size: 1 << 20,
            page_size: 0,
            use_guard_pages: false,
            allocation_strategy: AllocationStrategy::FirstFit,
        }
    }
}
