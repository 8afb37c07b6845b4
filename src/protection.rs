//! Page-protection bitmask, converted to and from the OS's `mprotect`
//! vocabulary.
//!
//! Modeled as a named flag set rather than raw bit manipulation, the same
//! way the retrieval pack's kernels model hardware permission bitfields.

use bitflags::bitflags;

bitflags! {
    /// Protection bits recorded on a block header. Any combination is
    /// permitted; nothing here enforces W^X or similar policies.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProtFlags: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

impl ProtFlags {
    /// Converts to the flags `libc::mprotect` expects.
    pub(crate) fn to_os_prot(self) -> libc::c_int {
        let mut prot = libc::PROT_NONE;
        if self.contains(ProtFlags::READ) {
            prot |= libc::PROT_READ;
        }
        if self.contains(ProtFlags::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.contains(ProtFlags::EXEC) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}
