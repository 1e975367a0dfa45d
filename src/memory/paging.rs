//! Page directory / page table types and PDE/PTE flag bits.
//!
//! Flag-bit layout grounded in `original_source/kernel/include/kernel/vmm.h`.
//! The `Mapper`-shaped API (translate/map_to/unmap) follows
//! `Dentosal-rust_os/src/memory/paging/mapper.rs`, reworked from that
//! crate's 4-level/2 MiB-huge-page x86_64 scheme down to classical 2-level,
//! 4 KiB, 32-bit paging.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::constants::{KERNEL_PDE_START, PAGE_SIZE, PAGE_TABLE_ENTRIES};

bitflags! {
    /// Flag bits shared by both PDEs and PTEs (the low 12 bits of either).
    pub struct EntryFlags: u32 {
        const PRESENT      = 1 << 0;
        const WRITE        = 1 << 1;
        const USER         = 1 << 2;
        const WRITETHROUGH = 1 << 3;
        const NOCACHE      = 1 << 4;
        const ACCESSED     = 1 << 5;
        const DIRTY        = 1 << 6;
        const GLOBAL       = 1 << 8;
        /// Software-available bit repurposed to mark a copy-on-write page.
        const COW          = 1 << 9;
    }
}

const FRAME_MASK: u32 = 0xFFFF_F000;

/// A single page-directory or page-table entry.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Entry(u32);

const_assert_eq!(core::mem::size_of::<Entry>(), 4);

impl Entry {
    pub const fn empty() -> Self {
        Entry(0)
    }

    pub fn is_present(self) -> bool {
        self.flags().contains(EntryFlags::PRESENT)
    }

    pub fn is_cow(self) -> bool {
        self.flags().contains(EntryFlags::COW)
    }

    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    pub fn frame(self) -> u32 {
        self.0 & FRAME_MASK
    }

    pub fn set(&mut self, frame: u32, flags: EntryFlags) {
        self.0 = (frame & FRAME_MASK) | flags.bits();
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

/// A 1024-entry page table, 4 KiB, natively aligned.
#[repr(C, align(4096))]
pub struct Table {
    pub entries: [Entry; PAGE_TABLE_ENTRIES],
}

const_assert_eq!(core::mem::size_of::<Table>(), PAGE_SIZE);

impl Table {
    pub fn zero(&mut self) {
        for e in self.entries.iter_mut() {
            e.clear();
        }
    }
}

/// Decompose a virtual address into (directory index, table index, offset).
pub fn decompose(vaddr: u32) -> (usize, usize, usize) {
    let dir = (vaddr >> 22) as usize & 0x3FF;
    let table = (vaddr >> 12) as usize & 0x3FF;
    let offset = vaddr as usize & 0xFFF;
    (dir, table, offset)
}

pub fn compose(dir: usize, table: usize, offset: usize) -> u32 {
    ((dir as u32) << 22) | ((table as u32) << 12) | (offset as u32)
}

/// Is this directory index part of the kernel-shared upper region?
pub fn is_kernel_pde(dir_index: usize) -> bool {
    dir_index >= KERNEL_PDE_START
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompose_compose_round_trip() {
        for vaddr in [0u32, 0x1000, 0x0040_0064, 0xC000_0000, 0xFFFF_F000] {
            let (d, t, o) = decompose(vaddr);
            assert_eq!(compose(d, t, o), vaddr);
        }
    }

    #[test]
    fn kernel_region_starts_at_3gib() {
        let (dir, _, _) = decompose(0xC000_0000);
        assert!(is_kernel_pde(dir));
        let (dir, _, _) = decompose(0xBFFF_FFFF);
        assert!(!is_kernel_pde(dir));
    }

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let mut e = Entry::empty();
        assert!(!e.is_present());
        e.set(0x0040_0000, EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER);
        assert!(e.is_present());
        assert_eq!(e.frame(), 0x0040_0000);
        assert!(e.flags().contains(EntryFlags::WRITE));
        assert!(!e.is_cow());
    }
}
