//! Placement Engine: selects a free block able to satisfy a request.

use crate::block::BlockHeader;
use crate::config::AllocationStrategy;

/// Scans the free list rooted at `head` for a block whose `size >=
/// required`, per `strategy`. Returns the block without unlinking it.
///
/// Ties in best-fit/worst-fit are broken by earlier link order: a
/// candidate only replaces the current choice when it is *strictly*
/// better, so the first-seen block of equal surplus wins.
pub(crate) fn select(
    head: *mut BlockHeader,
    strategy: AllocationStrategy,
    required: usize,
) -> Option<*mut BlockHeader> {
    match strategy {
        AllocationStrategy::FirstFit => first_fit(head, required),
        AllocationStrategy::BestFit => extremal_fit(head, required, true),
        AllocationStrategy::WorstFit => extremal_fit(head, required, false),
    }
}

fn first_fit(head: *mut BlockHeader, required: usize) -> Option<*mut BlockHeader> {
    let mut current = head;
    while !current.is_null() {
        let size = unsafe { (*current).size };
        if size >= required {
            return Some(current);
        }
        current = unsafe { (*current).list_next };
    }
    None
}

/// `want_smallest_surplus = true` implements best-fit; `false` implements
/// worst-fit.
fn extremal_fit(
    head: *mut BlockHeader,
    required: usize,
    want_smallest_surplus: bool,
) -> Option<*mut BlockHeader> {
    let mut chosen: Option<*mut BlockHeader> = None;
    let mut chosen_surplus = 0usize;
    let mut current = head;

    while !current.is_null() {
        let size = unsafe { (*current).size };
        if size >= required {
            let surplus = size - required;
            let better = match chosen {
                None => true,
                Some(_) if want_smallest_surplus => surplus < chosen_surplus,
                Some(_) => surplus > chosen_surplus,
            };
            if better {
                chosen = Some(current);
                chosen_surplus = surplus;
            }
        }
        current = unsafe { (*current).list_next };
    }

    chosen
}
