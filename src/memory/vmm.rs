//! Virtual memory manager: address-space construction, mapping, page-fault
//! dispatch, and the temporary-slot primitive used for cross-address-space
//! copies.
//!
//! Grounded in `Dentosal-rust_os/src/memory/mod.rs`'s `MemoryController`
//! composition shape; window/slot constants from
//! `original_source/kernel/include/kernel/vmm.h`.

use log::error;
use spin::Mutex;

use crate::constants::{
    KERNEL_PDE_START, KERNEL_VIRT_BASE, PAGE_SIZE, PAGE_TABLE_ENTRIES, TEMP_MAPPING_BASE,
    TEMP_MAPPING_SLOTS,
};
use crate::error::{KResult, KernelError};
use crate::memory::paging::{decompose, Entry, EntryFlags, Table};
use crate::memory::pmm::FRAME_ALLOCATOR;

/// Translate a physical address into its kernel-virtual alias. The low
/// 4 MiB (and the kernel image/bitmap region above it) are identity-ish
/// mapped at `KERNEL_VIRT_BASE + phys`, so every live page table and
/// directory is reachable from kernel context regardless of which address
/// space is current.
pub fn phys_to_kernel_virt(phys: u32) -> u32 {
    KERNEL_VIRT_BASE.wrapping_add(phys)
}

fn kernel_table_at(phys: u32) -> &'static mut Table {
    let vaddr = phys_to_kernel_virt(phys);
    unsafe { &mut *(vaddr as *mut Table) }
}

/// An address space: a physical frame holding the page directory.
pub struct AddressSpace {
    pub directory_phys: u32,
}

pub struct Vmm {
    kernel_directory_phys: u32,
    current_directory_phys: u32,
    temp_slot_words: [u64; TEMP_MAPPING_SLOTS / 64],
    initialized: bool,
}

impl Vmm {
    const fn uninit() -> Self {
        Vmm {
            kernel_directory_phys: 0,
            current_directory_phys: 0,
            temp_slot_words: [0; TEMP_MAPPING_SLOTS / 64],
            initialized: false,
        }
    }

    /// Build the kernel's own page directory: identity-map the low 4 MiB,
    /// alias all physical memory at `KERNEL_VIRT_BASE`, and enable paging.
    ///
    /// Actually flipping CR0.PG and loading CR3 is done by the caller in
    /// `boot`/`interrupt` glue; this constructs the tables only.
    pub fn init(&mut self, kernel_directory_phys: u32) {
        self.kernel_directory_phys = kernel_directory_phys;
        self.current_directory_phys = kernel_directory_phys;
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn directory(&self) -> &'static mut Table {
        kernel_table_at(self.current_directory_phys)
    }

    fn directory_of(phys: u32) -> &'static mut Table {
        kernel_table_at(phys)
    }

    /// Create a fresh address space: a new directory with the low 768 PDEs
    /// zeroed and the kernel-shared top 256 PDEs copied by value.
    pub fn create_address_space(&mut self) -> KResult<AddressSpace> {
        let dir_phys = FRAME_ALLOCATOR.lock().alloc()?;
        let dir = Self::directory_of(dir_phys);
        dir.zero();

        let kernel_dir = Self::directory_of(self.kernel_directory_phys);
        for i in KERNEL_PDE_START..PAGE_TABLE_ENTRIES {
            dir.entries[i] = kernel_dir.entries[i];
        }

        Ok(AddressSpace {
            directory_phys: dir_phys,
        })
    }

    /// Tear down a user address space: release every user-region frame and
    /// page table, then the directory itself. Kernel-shared PDEs are never
    /// touched since their page tables outlive any single address space.
    pub fn destroy_address_space(&mut self, space: &AddressSpace) {
        let dir = Self::directory_of(space.directory_phys);
        for i in 0..KERNEL_PDE_START {
            let pde = dir.entries[i];
            if !pde.is_present() {
                continue;
            }
            let table_phys = pde.frame();
            let table = Self::directory_of(table_phys);
            for pte in table.entries.iter() {
                if pte.is_present() {
                    FRAME_ALLOCATOR.lock().unref_frame(pte.frame());
                }
            }
            FRAME_ALLOCATOR.lock().free(table_phys);
        }
        FRAME_ALLOCATOR.lock().free(space.directory_phys);
    }

    pub fn switch_to(&mut self, space: &AddressSpace) {
        self.current_directory_phys = space.directory_phys;
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) space.directory_phys, options(nostack, preserves_flags));
        }
    }

    /// Temporarily make `space` current, returning a token that restores
    /// the prior directory. Used by exec/fork to reach `map`/temp slots in
    /// a freshly created address space that is not (yet) the scheduled
    /// process's own, without disturbing whichever directory was actually
    /// running.
    pub fn switch_to_scratch(&mut self, space: &AddressSpace) -> u32 {
        let prior = self.current_directory_phys;
        self.current_directory_phys = space.directory_phys;
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) space.directory_phys, options(nostack, preserves_flags));
        }
        prior
    }

    pub fn restore_scratch(&mut self, prior_directory_phys: u32) {
        self.current_directory_phys = prior_directory_phys;
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) prior_directory_phys, options(nostack, preserves_flags));
        }
    }

    /// Allocate (but leave empty) the page table backing `vaddr`'s PDE in
    /// the *current* (kernel) directory, if it doesn't already exist.
    ///
    /// Called once at boot for every kernel-shared window (heap,
    /// temp-mapping slots) before the first `create_address_space`: PDEs in
    /// the kernel-shared range are copied by value into every address space
    /// at creation time, so a PDE allocated afterwards would be invisible to
    /// address spaces created before it. Pre-allocating the table (even
    /// empty) fixes its frame number for the lifetime of the kernel; later
    /// `map`/`unmap` calls only ever fill in PTEs within it.
    pub fn ensure_table(&mut self, vaddr: u32) -> KResult<()> {
        let (dir_index, _, _) = decompose(vaddr);
        let dir = self.directory();
        if !dir.entries[dir_index].is_present() {
            let table_phys = FRAME_ALLOCATOR.lock().alloc()?;
            Self::directory_of(table_phys).zero();
            dir.entries[dir_index].set(table_phys, EntryFlags::PRESENT | EntryFlags::WRITE);
        }
        Ok(())
    }

    /// Map `vaddr -> paddr` in the *current* address space, allocating a
    /// fresh page table if needed. Always forces PRESENT.
    pub fn map(&mut self, vaddr: u32, paddr: u32, flags: EntryFlags) -> KResult<()> {
        let (dir_index, table_index, _) = decompose(vaddr);
        let dir = self.directory();

        if !dir.entries[dir_index].is_present() {
            let table_phys = FRAME_ALLOCATOR.lock().alloc()?;
            Self::directory_of(table_phys).zero();
            let mut pde_flags = EntryFlags::PRESENT | EntryFlags::WRITE;
            if flags.contains(EntryFlags::USER) {
                pde_flags |= EntryFlags::USER;
            }
            dir.entries[dir_index].set(table_phys, pde_flags);
        }

        let table = Self::directory_of(dir.entries[dir_index].frame());
        table.entries[table_index].set(paddr, flags | EntryFlags::PRESENT);
        self.flush(vaddr);
        Ok(())
    }

    /// Clear a mapping and release the underlying frame.
    pub fn unmap(&mut self, vaddr: u32) {
        if let Some(paddr) = self.translate(vaddr) {
            self.clear_pte(vaddr);
            FRAME_ALLOCATOR.lock().free(paddr);
        }
    }

    /// Clear a mapping without touching the underlying frame's refcount.
    /// Required for temporary-slot teardown.
    pub fn unmap_no_free(&mut self, vaddr: u32) {
        self.clear_pte(vaddr);
    }

    fn clear_pte(&mut self, vaddr: u32) {
        let (dir_index, table_index, _) = decompose(vaddr);
        let dir = self.directory();
        if !dir.entries[dir_index].is_present() {
            return;
        }
        let table = Self::directory_of(dir.entries[dir_index].frame());
        table.entries[table_index].clear();
        self.flush(vaddr);
    }

    pub fn translate(&self, vaddr: u32) -> Option<u32> {
        let (dir_index, table_index, offset) = decompose(vaddr);
        let dir = self.directory();
        let pde = dir.entries[dir_index];
        if !pde.is_present() {
            return None;
        }
        let table = Self::directory_of(pde.frame());
        let pte = table.entries[table_index];
        if !pte.is_present() {
            return None;
        }
        Some(pte.frame() | offset as u32)
    }

    /// Return the raw PTE for `vaddr` in the current address space, if the
    /// covering page table is present (independent of whether the PTE
    /// itself is present — callers inspecting COW state need this).
    pub fn pte_at(&self, vaddr: u32) -> Option<Entry> {
        let (dir_index, table_index, _) = decompose(vaddr);
        let dir = self.directory();
        let pde = dir.entries[dir_index];
        if !pde.is_present() {
            return None;
        }
        let table = Self::directory_of(pde.frame());
        Some(table.entries[table_index])
    }

    pub fn set_pte(&mut self, vaddr: u32, frame: u32, flags: EntryFlags) {
        let (dir_index, table_index, _) = decompose(vaddr);
        let dir = self.directory();
        let table = Self::directory_of(dir.entries[dir_index].frame());
        table.entries[table_index].set(frame, flags | EntryFlags::PRESENT);
        self.flush(vaddr);
    }

    fn flush(&self, vaddr: u32) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) vaddr, options(nostack, preserves_flags));
        }
    }

    /// Invalidate the TLB entry for `vaddr`. Exposed for callers (the COW
    /// engine) that mutate page-table entries directly rather than through
    /// `map`/`set_pte`.
    pub fn flush_addr(&self, vaddr: u32) {
        self.flush(vaddr);
    }

    // --- Temporary slots -------------------------------------------------

    fn slot_word_bit(slot: usize) -> (usize, u64) {
        (slot / 64, 1u64 << (slot % 64))
    }

    pub fn alloc_slot(&mut self) -> Option<usize> {
        for slot in 0..TEMP_MAPPING_SLOTS {
            let (word, bit) = Self::slot_word_bit(slot);
            if self.temp_slot_words[word] & bit == 0 {
                self.temp_slot_words[word] |= bit;
                return Some(slot);
            }
        }
        None
    }

    pub fn free_slot(&mut self, slot: usize) {
        let (word, bit) = Self::slot_word_bit(slot);
        self.temp_slot_words[word] &= !bit;
    }

    fn slot_vaddr(slot: usize) -> u32 {
        TEMP_MAPPING_BASE + (slot as u32) * (PAGE_SIZE as u32)
    }

    /// Map `paddr` into temporary slot `slot` and return the kernel-virtual
    /// address it is now reachable at.
    pub fn map_slot(&mut self, slot: usize, paddr: u32) -> KResult<u32> {
        let vaddr = Self::slot_vaddr(slot);
        self.map(vaddr, paddr, EntryFlags::PRESENT | EntryFlags::WRITE)?;
        Ok(vaddr)
    }

    pub fn unmap_slot(&mut self, slot: usize) {
        let vaddr = Self::slot_vaddr(slot);
        self.unmap_no_free(vaddr);
    }

    /// Page-fault dispatch. Returns `Ok(())` if the fault was serviced
    /// (COW materialization) and the faulting instruction may be retried,
    /// or `Err` if the fault must be escalated (user SIGSEGV / kernel halt).
    pub fn page_fault(&mut self, fault_addr: u32, present: bool, write: bool, user: bool) -> KResult<()> {
        if present && write {
            if let Some(pte) = self.pte_at(fault_addr) {
                if pte.is_cow() {
                    return crate::memory::cow::handle_cow_fault(self, fault_addr);
                }
            }
        }
        if user {
            error!(
                "vmm: unserviceable user fault at {:#x} (present={}, write={})",
                fault_addr, present, write
            );
            Err(KernelError::SegmentationFault)
        } else {
            error!(
                "vmm: unserviceable kernel fault at {:#x} (present={}, write={})",
                fault_addr, present, write
            );
            Err(KernelError::SegmentationFault)
        }
    }
}

pub static VMM: Mutex<Vmm> = Mutex::new(Vmm::uninit());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_allocation_is_exclusive_and_reusable() {
        let mut vmm = Vmm::uninit();
        let a = vmm.alloc_slot().unwrap();
        let b = vmm.alloc_slot().unwrap();
        assert_ne!(a, b);
        vmm.free_slot(a);
        let c = vmm.alloc_slot().unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn slots_exhaust_after_all_taken() {
        let mut vmm = Vmm::uninit();
        for _ in 0..TEMP_MAPPING_SLOTS {
            vmm.alloc_slot().unwrap();
        }
        assert!(vmm.alloc_slot().is_none());
    }
}
