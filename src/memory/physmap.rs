//! Builds the kernel-virtual alias of physical memory that
//! `vmm::phys_to_kernel_virt`/`kernel_table_at` depend on: every frame the
//! PMM can ever hand out as a page directory or page table must be
//! reachable at `KERNEL_VIRT_BASE + phys`, not just the boot trampoline's
//! low identity-mapped window.
//!
//! Runs directly against physical memory with no allocator and no heap,
//! the same constraint `boot/entry.asm`'s own table-building code is under;
//! grounded in `original_source/kernel/vmm.c`'s boot-time direct-map setup.

use crate::constants::{KERNEL_PDE_START, PAGE_SIZE, PAGE_TABLE_ENTRIES};
use crate::memory::paging::{EntryFlags, Table};

const PDE_SPAN: u32 = (PAGE_TABLE_ENTRIES * PAGE_SIZE) as u32; // 4 MiB

unsafe fn table_at(phys: u32) -> &'static mut Table {
    &mut *(phys as *mut Table)
}

/// Map `[0, total_phys_bytes)` at `KERNEL_VIRT_BASE + phys` in
/// `boot_directory_phys`, bump-allocating page-table frames starting at
/// `cursor`. Returns the cursor advanced past whatever it consumed.
///
/// Caps out at `total_phys_bytes` up to 1 GiB (256 PDEs), the entire
/// kernel-shared region; a larger map would collide with the
/// temp-mapping/heap windows carved out of the same PDE range.
///
/// # Safety
/// `boot_directory_phys` must be the currently loaded CR3, and every frame
/// from `cursor` upward must still be identity-accessible (i.e. within the
/// trampoline's pre-physmap low window) since no alias exists yet to reach
/// them any other way.
pub unsafe fn build(boot_directory_phys: u32, cursor: u32, total_phys_bytes: u32) -> u32 {
    let dir = table_at(boot_directory_phys);
    let pdes_needed = ((total_phys_bytes + PDE_SPAN - 1) / PDE_SPAN) as usize;
    let pdes_needed = pdes_needed.min(PAGE_TABLE_ENTRIES - KERNEL_PDE_START);
    let mut cursor = cursor;

    for pde in 0..pdes_needed {
        let table_phys = cursor;
        cursor += PAGE_SIZE as u32;

        let table = table_at(table_phys);
        table.zero();
        for entry in 0..PAGE_TABLE_ENTRIES {
            let frame = (pde * PAGE_TABLE_ENTRIES + entry) as u32 * PAGE_SIZE as u32;
            if frame >= total_phys_bytes {
                break;
            }
            table.entries[entry].set(frame, EntryFlags::PRESENT | EntryFlags::WRITE);
        }

        dir.entries[KERNEL_PDE_START + pde].set(table_phys, EntryFlags::PRESENT | EntryFlags::WRITE);
    }

    // The PDEs just rewritten may overlap the trampoline's own bootstrap
    // mapping (PDE[KERNEL_PDE_START] covering the first 4 MiB, which is
    // where we are currently executing from); reloading CR3 flushes any
    // stale non-global TLB entries left over from that earlier table.
    core::arch::asm!(
        "mov {tmp}, cr3",
        "mov cr3, {tmp}",
        tmp = out(reg) _,
        options(nostack, preserves_flags)
    );

    cursor
}
