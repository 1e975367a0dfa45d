//! Memory subsystem: physical frames, paging, the virtual memory manager,
//! copy-on-write, and the kernel heap.
//!
//! Composition shape grounded in `Dentosal-rust_os/src/memory/mod.rs`'s
//! `MemoryController::init()`.

pub mod cow;
pub mod heap;
pub mod paging;
pub mod physmap;
pub mod pmm;
pub mod vmm;

use log::info;

use crate::constants::{
    KERNEL_HEAP_INITIAL_SIZE, KERNEL_HEAP_START, KERNEL_PHYS_RESERVED_END, PAGE_SIZE,
    TEMP_MAPPING_BASE,
};
use crate::memory::paging::EntryFlags;
use crate::memory::pmm::MultibootMmapEntry;

/// Bring up the whole memory subsystem: parse the Multiboot memory map,
/// complete the kernel-virtual physical-memory alias the boot trampoline
/// only started, initialize the frame allocator, register the VMM, and
/// bring the kernel heap online.
///
/// `boot_directory_phys` is the page directory `boot/entry.asm` built and
/// loaded into CR3 before jumping into Rust code (read back from CR3 in
/// `kernel_main`, not threaded through as a Multiboot value).
///
/// # Safety
/// Must be called exactly once, very early in `kernel_main`, before any
/// other memory-subsystem API is touched, and before any address space
/// other than the boot directory exists.
pub unsafe fn init(
    mmap_entries: &[MultibootMmapEntry],
    total_phys_bytes: u32,
    boot_directory_phys: u32,
) {
    let total_frames = (total_phys_bytes as usize) / PAGE_SIZE;

    // Early bump region directly above the reserved kernel image, mirroring
    // pmm_kmalloc in the original implementation (no heap exists yet).
    // Everything carved out of it below must remain identity-accessible
    // until `physmap::build` below establishes the real alias.
    let mut cursor = KERNEL_PHYS_RESERVED_END;

    let bitmap_bytes = (total_frames + 7) / 8;
    let bitmap_phys = cursor;
    cursor += bitmap_bytes as u32;

    let refcount_bytes = (total_frames * 2) as u32;
    let refcount_phys = cursor;
    cursor += refcount_bytes;

    // Complete the kernel-virtual alias of all physical memory before
    // anything (including the frame allocator's own init) reaches a page
    // table through `vmm::phys_to_kernel_virt`.
    cursor = physmap::build(boot_directory_phys, cursor, total_phys_bytes);

    let bitmap = core::slice::from_raw_parts_mut(phys_early_ptr(bitmap_phys), bitmap_bytes);
    let refcounts =
        core::slice::from_raw_parts_mut(phys_early_ptr(refcount_phys) as *mut u16, total_frames);

    pmm::FRAME_ALLOCATOR
        .lock()
        .init(mmap_entries, bitmap, refcounts, total_frames);

    // The bump region above the fixed kernel-image carve-out (bitmap,
    // refcounts, physmap tables) has no owner to free it later; withhold it
    // from the free pool permanently.
    pmm::FRAME_ALLOCATOR
        .lock()
        .reserve_range(KERNEL_PHYS_RESERVED_END, cursor);

    info!("pmm: {} frames tracked", total_frames);

    vmm::VMM.lock().init(boot_directory_phys);

    // Pre-allocate the page tables backing every kernel-shared window before
    // the first user address space is ever created: a PDE allocated after
    // that point would be invisible to address spaces copied-by-value
    // earlier (see `Vmm::ensure_table`).
    vmm::VMM
        .lock()
        .ensure_table(TEMP_MAPPING_BASE)
        .expect("pre-allocate temp-mapping window page table");
    vmm::VMM
        .lock()
        .ensure_table(KERNEL_HEAP_START)
        .expect("pre-allocate kernel heap window page table");

    // Bring the kernel heap's initial region online; `heap::GlobalHeap`
    // grows it further, on demand, up to KERNEL_HEAP_MAX_SIZE.
    let initial_pages = KERNEL_HEAP_INITIAL_SIZE / PAGE_SIZE as u32;
    for i in 0..initial_pages {
        let frame = pmm::FRAME_ALLOCATOR
            .lock()
            .alloc()
            .expect("allocate initial kernel heap frame");
        let vaddr = KERNEL_HEAP_START + i * PAGE_SIZE as u32;
        vmm::VMM
            .lock()
            .map(vaddr, frame, EntryFlags::PRESENT | EntryFlags::WRITE)
            .expect("map initial kernel heap page");
    }
    heap::HEAP
        .lock()
        .init(KERNEL_HEAP_START as usize, KERNEL_HEAP_INITIAL_SIZE as usize);

    info!(
        "vmm: ready, kernel heap online at {:#x} ({} KiB)",
        KERNEL_HEAP_START,
        KERNEL_HEAP_INITIAL_SIZE / 1024
    );
}

/// Physical addresses below the physmap's coverage are also reachable by
/// identity within the boot trampoline's low window, and after
/// `physmap::build` runs, every other physical address is reachable too
/// (just not through this identity shortcut). Used only for the
/// bitmap/refcount tables, which `physmap::build` is told to skip over.
unsafe fn phys_early_ptr(phys: u32) -> *mut u8 {
    phys as usize as *mut u8
}
