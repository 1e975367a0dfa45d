//! Compile time layout constants.
//!
//! Collected in one place the way the corresponding memory-layout values are
//! gathered under the teacher's `memory` module, rather than scattered as
//! magic numbers across every subsystem.

/// Size of a physical frame / virtual page.
pub const PAGE_SIZE: usize = 4096;

/// Number of entries in a page directory or page table.
pub const PAGE_TABLE_ENTRIES: usize = 1024;

/// Virtual address at which the kernel-shared region begins (3 GiB).
/// PDE index 768 and above are identical across every address space.
pub const KERNEL_VIRT_BASE: u32 = 0xC000_0000;

/// PDE index of `KERNEL_VIRT_BASE`.
pub const KERNEL_PDE_START: usize = 768;

/// Base of the reserved temporary-mapping window (kernel-virtual).
pub const TEMP_MAPPING_BASE: u32 = 0xE000_0000;

/// Number of page slots in the temporary-mapping window (1 MiB / 4 KiB).
pub const TEMP_MAPPING_SLOTS: usize = 256;

/// Fixed virtual address of the top of a freshly execed or forked user stack.
pub const USER_STACK_TOP: u32 = 0x7FFF_F000;

/// Default size of a user stack (one page; grown on demand is out of scope).
pub const USER_STACK_SIZE: u32 = PAGE_SIZE as u32;

/// Default size of a kernel thread's stack, in bytes.
pub const KERNEL_STACK_SIZE: usize = 16 * 1024;

/// EFLAGS value used for newly created and freshly execed processes:
/// interrupts enabled (IF), reserved bit 1 set.
pub const DEFAULT_EFLAGS: u32 = 0x202;

/// Number of distinct signal numbers, matching `NSIG` in the reference
/// process-control-block layout.
pub const NSIG: usize = 32;

/// Number of registered syscalls.
pub const NUM_SYSCALLS: usize = 32;

/// Software-available PTE bit repurposed to mark copy-on-write pages.
/// Bits 0-6 and 8 are architecturally defined; bit 9 is free.
pub const PAGE_COW_BIT: u32 = 1 << 9;

/// Ticks per second the PIT is programmed to deliver (see `driver::pit`).
pub const TIMER_HZ: u32 = 100;

/// Reboot command words understood by `sys_reboot`.
pub const REBOOT_CMD_RESTART: u32 = 0x0123_4567;
pub const REBOOT_CMD_HALT: u32 = 0xDEAD_BEEF;
pub const REBOOT_CMD_POWEROFF: u32 = 0x8765_4321;

/// Physical region reserved for the kernel image itself; frames in here are
/// never handed out by the PMM.
pub const KERNEL_PHYS_START: u32 = 0x0010_0000;
pub const KERNEL_PHYS_RESERVED_END: u32 = 0x0020_0000;

/// Base of the kernel heap window (kernel-virtual, kernel-shared region).
pub const KERNEL_HEAP_START: u32 = 0xD000_0000;

/// The heap's page table is pre-allocated in full at boot (see
/// `memory::init`) so every address space created afterwards inherits a
/// by-value copy of a PDE that will never need to change again. One PDE
/// covers 4 MiB, which bounds the kernel heap at that size.
pub const KERNEL_HEAP_MAX_SIZE: u32 = 4 * 1024 * 1024;

/// How much of the heap window is mapped and handed to the free list at
/// boot; `heap::GlobalHeap` maps further pages from `KERNEL_HEAP_START +
/// KERNEL_HEAP_INITIAL_SIZE` up to `KERNEL_HEAP_MAX_SIZE` on demand.
pub const KERNEL_HEAP_INITIAL_SIZE: u32 = 64 * 1024;
