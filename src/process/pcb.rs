//! Process Control Block.
//!
//! Field layout grounded field-for-field in
//! `original_source/kernel/include/kernel/process.h`; the ring is
//! represented as pid-valued `next`/`prev` links into the process table
//! rather than raw pointers, per SPEC_FULL.md §9's cyclic-pointer design
//! note and `Dentosal-rust_os/src/multitasking/process_manager.rs`'s
//! `State { process_list: Vec<Process>, .. }` table shape.

use alloc::string::String;
use bitflags::bitflags;

use crate::interrupt::frame::TrapFrame;
use crate::memory::vmm::AddressSpace;
use crate::process::signal::SignalDisposition;

pub type Pid = u32;

pub const NO_PID: Pid = 0;

/// Bounded by convention, not by a fixed-size array: `alloc` is available
/// well before any process exists.
pub const NAME_MAX: usize = 32;
pub const CWD_MAX: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Blocked,
    Zombie,
    Stopped,
}

bitflags! {
    pub struct ProcessFlags: u32 {
        /// A kernel thread: its address space has no independent user
        /// region, only the kernel-shared upper half.
        const KERNEL = 1 << 0;
    }
}

/// A process control block. Owns its kernel stack (for kernel threads, the
/// only stack) and a handle to its address space.
pub struct Pcb {
    // Identity
    pub pid: Pid,
    pub ppid: Pid,
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,

    // State
    pub state: ProcessState,
    pub flags: ProcessFlags,

    // Address space
    pub address_space: AddressSpace,

    // Memory layout
    pub heap_start: u32,
    pub heap_end: u32,
    pub brk: u32,
    pub stack_start: u32,
    pub stack_end: u32,

    /// Backing storage for the kernel stack this PCB's trap frame lives on.
    /// Owned for the PCB's lifetime per SPEC_FULL.md §9: the saved frame
    /// pointer is a borrow into this region.
    pub kernel_stack: alloc::vec::Vec<u8>,

    /// Pointer into `kernel_stack` at which the trap frame currently sits.
    /// This is the *only* thing the scheduler saves/restores.
    pub saved_context: *mut TrapFrame,

    // Exit
    pub exit_code: i32,

    // Scheduling
    pub priority: u8,
    pub quantum: u32,

    // Signals
    pub pending_signals: u32,
    pub signal_handlers: [SignalDisposition; crate::constants::NSIG],

    // Sleep
    pub wake_tick: u64,

    // Working directory
    pub cwd: String,

    // Sibling ring (pid-valued, index into the process table)
    pub next: Pid,
    pub prev: Pid,
}

impl Pcb {
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ProcessState::Ready | ProcessState::Running)
    }

    pub fn is_kernel_thread(&self) -> bool {
        self.flags.contains(ProcessFlags::KERNEL)
    }
}

unsafe impl Send for Pcb {}
