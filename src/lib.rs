// No stdlib or mainfn when not running tests, exactly as the teacher's entry
// point: `std-tests` builds and runs every `#[cfg(test)]` module as an
// ordinary host binary, skipping the bare-metal entry points entirely.
#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
// Unstable features needed by the bare-metal entry points below.
#![feature(alloc_error_handler)]
#![feature(panic_info_message)]

//! Crate root: module wiring and the bare-metal entry point.
//!
//! Boot sequence, `#[global_allocator]`/`#[alloc_error_handler]` wiring, and
//! the `panic_stop`-style handler are grounded in
//! `Dentosal-rust_os/src/main.rs`'s `rust_main`, reworked from that crate's
//! Multiboot2/`x86_64`/SMP bring-up to the Multiboot1/32-bit/single-core
//! sequence SPEC_FULL.md §2 and §6 describe (no `cpuid`/`random`/`smp`/
//! `services` stages; memory-map parsing happens here instead of inside
//! `memory::init`, since the Multiboot info structure is only valid before
//! the physical-memory aliasing `memory::init` performs).

#[macro_use]
extern crate alloc;

#[macro_use]
pub mod driver;

pub mod constants;
pub mod error;
pub mod fs;
pub mod interrupt;
pub mod logging;
pub mod memory;
pub mod process;
pub mod syscall;

#[cfg(not(test))]
use core::alloc::Layout;
#[cfg(not(test))]
use core::panic::PanicInfo;
#[cfg(not(test))]
use core::sync::atomic::{AtomicBool, Ordering};

use crate::memory::pmm::MultibootMmapEntry;

/// EAX value the bootloader hands off to `_start` on a successful Multiboot1
/// boot, per `boot/entry.asm` and SPEC_FULL.md §6. Distinct from the
/// `0x1BADB002` magic the kernel's own Multiboot header is tagged with.
const MULTIBOOT_BOOTLOADER_MAGIC: u32 = 0x2BAD_B002;

/// Bit 6 of the Multiboot info `flags` word: `mmap_addr`/`mmap_length` valid.
const MULTIBOOT_INFO_MEM_MAP: u32 = 1 << 6;

/// Conservative fallback total when booted without a usable memory map
/// (non-Multiboot loader, or a loader that didn't set flags bit 6).
const FALLBACK_MEM_BYTES: u32 = 32 * 1024 * 1024;

const MAX_MMAP_ENTRIES: usize = 32;

/// The subset of the Multiboot1 information structure this kernel reads.
/// Field offsets per SPEC_FULL.md §6; trailing fields (VBE, framebuffer,
/// drive info) are out of scope and left unread.
#[repr(C, packed)]
struct MultibootInfo {
    flags: u32,
    mem_lower: u32,
    mem_upper: u32,
    boot_device: u32,
    cmdline: u32,
    mods_count: u32,
    mods_addr: u32,
    syms: [u32; 4],
    mmap_length: u32,
    mmap_addr: u32,
}

fn synthetic_entry(total_bytes: u32) -> MultibootMmapEntry {
    MultibootMmapEntry {
        size: 20,
        base_addr_low: 0,
        base_addr_high: 0,
        length_low: total_bytes,
        length_high: 0,
        entry_type: crate::memory::pmm::MULTIBOOT_MEMORY_AVAILABLE,
    }
}

/// Parse (or fall back to a conservative synthesis of) the Multiboot memory
/// map. Runs before `memory::init`, so every pointer here is read directly
/// against physical addresses in the boot trampoline's identity-mapped low
/// window (`boot/entry.asm`'s page directory covers the low 4 MiB).
fn collect_memory_map(
    magic: u32,
    info_phys: u32,
) -> ([MultibootMmapEntry; MAX_MMAP_ENTRIES], usize, u32) {
    let mut storage = [synthetic_entry(0); MAX_MMAP_ENTRIES];

    if magic != MULTIBOOT_BOOTLOADER_MAGIC {
        storage[0] = synthetic_entry(FALLBACK_MEM_BYTES);
        return (storage, 1, FALLBACK_MEM_BYTES);
    }

    let info = unsafe { &*(info_phys as *const MultibootInfo) };
    if info.flags & MULTIBOOT_INFO_MEM_MAP == 0 {
        storage[0] = synthetic_entry(FALLBACK_MEM_BYTES);
        return (storage, 1, FALLBACK_MEM_BYTES);
    }

    let mut count = 0usize;
    let mut cursor = info.mmap_addr;
    let end = info.mmap_addr.saturating_add(info.mmap_length);
    let mut max_addr = 0u32;

    while cursor < end && count < MAX_MMAP_ENTRIES {
        let entry = unsafe { *(cursor as *const MultibootMmapEntry) };
        storage[count] = entry;
        let base = ((entry.base_addr_high as u64) << 32 | entry.base_addr_low as u64) as u32;
        let len = ((entry.length_high as u64) << 32 | entry.length_low as u64) as u32;
        max_addr = max_addr.max(base.saturating_add(len));
        count += 1;
        cursor += entry.size + 4;
    }

    if count == 0 {
        storage[0] = synthetic_entry(FALLBACK_MEM_BYTES);
        (storage, 1, FALLBACK_MEM_BYTES)
    } else {
        (storage, count, max_addr)
    }
}

fn read_cr3() -> u32 {
    let value: u32;
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value
}

/// The kernel main function, called by `_start` in `boot/entry.asm` with the
/// Multiboot magic in the first argument and the physical address of the
/// Multiboot info structure in the second (cdecl, matching `_start`'s
/// `push ebx; push eax; call rust_main`).
#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn rust_main(multiboot_magic: u32, multiboot_info_phys: u32) -> ! {
    rreset!();
    driver::serial::init();
    logging::init();
    rprintln!("booting...");
    log::info!("kernel: boot trampoline handed off, magic={:#x}", multiboot_magic);

    let boot_directory_phys = read_cr3();
    let (mmap_storage, mmap_count, total_phys_bytes) =
        collect_memory_map(multiboot_magic, multiboot_info_phys);

    unsafe {
        memory::init(&mmap_storage[..mmap_count], total_phys_bytes, boot_directory_phys);
        interrupt::init();
    }

    let bootstrap_pid = process::init_bootstrap(boot_directory_phys);
    driver::pit::init();

    rreset!();
    log::info!(
        "kernel: initialized, {} MiB tracked, bootstrap pid {}",
        total_phys_bytes / (1024 * 1024),
        bootstrap_pid
    );
    logging::disable_vga_sink();

    interrupt::enable();

    loop {
        unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
    }
}

#[global_allocator]
#[cfg(not(test))]
static HEAP_ALLOCATOR: memory::heap::GlobalHeap = memory::heap::GlobalHeap;

#[alloc_error_handler]
#[cfg(not(test))]
fn out_of_memory(layout: Layout) -> ! {
    log::error!(
        "kernel heap exhausted requesting {} bytes (align {})",
        layout.size(),
        layout.align()
    );
    panic!("out of memory");
}

/// Tracks whether a panic is already being handled, so a panic raised while
/// formatting the first one's message doesn't recurse into `write!` again.
#[cfg(not(test))]
static PANIC_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Panic behavior per SPEC_FULL.md §7: disable interrupts, render the
/// message in a distinct color, and halt in an idle loop rather than
/// resetting or continuing.
#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    unsafe { core::arch::asm!("cli", options(nomem, nostack)) };

    if !PANIC_ACTIVE.swap(true, Ordering::SeqCst) {
        let mut term = driver::vga::TERMINAL.lock();
        term.set_color(driver::vga::Color::White, driver::vga::Color::Red);
        term.clear();
        drop(term);

        rprintln!("KERNEL PANIC");
        if let Some(location) = info.location() {
            rprintln!("  at {}:{}", location.file(), location.line());
        }
        if let Some(message) = info.message() {
            log::error!("kernel panic: {}", message);
        } else {
            log::error!("kernel panic: (no message)");
        }
    }

    loop {
        unsafe { core::arch::asm!("cli; hlt", options(nomem, nostack)) };
    }
}
