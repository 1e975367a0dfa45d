//! Copy-on-write engine: address-space cloning and COW page-fault servicing.
//!
//! Grounded in full on `original_source/kernel/vmm_cow.c`: the clone walks
//! every present user PTE, clears WRITE, sets COW, and bumps the frame's
//! refcount; the fault handler copies through two temporary slots rather
//! than relying on a kernel-window alias.

use crate::constants::{KERNEL_PDE_START, PAGE_SIZE};
use crate::error::{KResult, KernelError};
use crate::memory::paging::{compose, EntryFlags};
use crate::memory::pmm::FRAME_ALLOCATOR;
use crate::memory::vmm::{AddressSpace, Vmm};

/// Clone `source`'s user-region mappings into `dest`, marking every shared
/// page copy-on-write in *both* address spaces and bumping its refcount.
///
/// The kernel-shared top 256 PDEs are not touched here: `Vmm::create_address_space`
/// already copied them by value when `dest` was created.
pub fn clone_address_space(vmm: &mut Vmm, source: &AddressSpace, dest: &AddressSpace) -> KResult<()> {
    let src_dir = crate::memory::vmm::phys_to_kernel_virt(source.directory_phys) as *mut crate::memory::paging::Table;
    let dst_dir = crate::memory::vmm::phys_to_kernel_virt(dest.directory_phys) as *mut crate::memory::paging::Table;
    let (src_dir, dst_dir) = unsafe { (&mut *src_dir, &mut *dst_dir) };

    for dir_index in 0..KERNEL_PDE_START {
        let src_pde = src_dir.entries[dir_index];
        if !src_pde.is_present() {
            continue;
        }

        let dst_table_phys = FRAME_ALLOCATOR.lock().alloc()?;
        let dst_table = crate::memory::vmm::phys_to_kernel_virt(dst_table_phys) as *mut crate::memory::paging::Table;
        let dst_table = unsafe { &mut *dst_table };
        dst_table.zero();

        let src_table_phys = src_pde.frame();
        let src_table = crate::memory::vmm::phys_to_kernel_virt(src_table_phys) as *mut crate::memory::paging::Table;
        let src_table = unsafe { &mut *src_table };

        for table_index in 0..src_table.entries.len() {
            let mut pte = src_table.entries[table_index];
            if !pte.is_present() {
                continue;
            }

            let mut flags = pte.flags();
            flags.remove(EntryFlags::WRITE);
            flags.insert(EntryFlags::COW);
            pte.set(pte.frame(), flags);

            src_table.entries[table_index] = pte;
            dst_table.entries[table_index] = pte;

            FRAME_ALLOCATOR.lock().ref_frame(pte.frame());

            let vaddr = compose(dir_index, table_index, 0);
            vmm.flush_addr(vaddr);
        }

        let mut pde_flags = src_pde.flags();
        pde_flags.insert(EntryFlags::PRESENT);
        let mut dst_pde = src_pde;
        dst_pde.set(dst_table_phys, pde_flags);
        dst_dir.entries[dir_index] = dst_pde;
    }

    Ok(())
}

/// Service a copy-on-write fault at `fault_addr` in the current address
/// space: copy the shared page into a fresh frame via two temporary slots,
/// rewrite the PTE read-write, and drop the reference on the old frame.
pub fn handle_cow_fault(vmm: &mut Vmm, fault_addr: u32) -> KResult<()> {
    let page_base = fault_addr & !((PAGE_SIZE as u32) - 1);
    let pte = vmm
        .pte_at(page_base)
        .filter(|p| p.is_present() && p.is_cow())
        .ok_or(KernelError::SegmentationFault)?;

    let source_frame = pte.frame();
    let dest_frame = FRAME_ALLOCATOR.lock().alloc()?;

    let src_slot = vmm.alloc_slot().ok_or(KernelError::OutOfTempSlots)?;
    let dst_slot = vmm.alloc_slot().ok_or(KernelError::OutOfTempSlots)?;

    let src_vaddr = vmm.map_slot(src_slot, source_frame)?;
    let dst_vaddr = vmm.map_slot(dst_slot, dest_frame)?;

    unsafe {
        core::ptr::copy_nonoverlapping(src_vaddr as *const u8, dst_vaddr as *mut u8, PAGE_SIZE);
    }

    vmm.unmap_slot(src_slot);
    vmm.unmap_slot(dst_slot);
    vmm.free_slot(src_slot);
    vmm.free_slot(dst_slot);

    let mut new_flags = pte.flags();
    new_flags.insert(EntryFlags::WRITE);
    new_flags.remove(EntryFlags::COW);
    vmm.set_pte(page_base, dest_frame, new_flags);

    FRAME_ALLOCATOR.lock().unref_frame(source_frame);

    Ok(())
}

pub struct VmmStats {
    pub total: usize,
    pub used: usize,
    pub free: usize,
    pub cow: usize,
    pub shared: usize,
}

/// Aggregate memory stats, including the count of currently copy-on-write
/// pages across the given address space (the rest come from the PMM).
pub fn stats(space: &AddressSpace) -> VmmStats {
    let pmm_stats = FRAME_ALLOCATOR.lock().stats();
    let dir = crate::memory::vmm::phys_to_kernel_virt(space.directory_phys) as *mut crate::memory::paging::Table;
    let dir = unsafe { &mut *dir };
    let mut cow = 0;
    for dir_index in 0..KERNEL_PDE_START {
        let pde = dir.entries[dir_index];
        if !pde.is_present() {
            continue;
        }
        let table = crate::memory::vmm::phys_to_kernel_virt(pde.frame()) as *mut crate::memory::paging::Table;
        let table = unsafe { &mut *table };
        for pte in table.entries.iter() {
            if pte.is_present() && pte.is_cow() {
                cow += 1;
            }
        }
    }
    VmmStats {
        total: pmm_stats.total,
        used: pmm_stats.used,
        free: pmm_stats.free,
        cow,
        shared: pmm_stats.shared,
    }
}
