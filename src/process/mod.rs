//! Process model: PCBs, the process table/ring, the scheduler, the
//! fork/exec/wait/exit lifecycle, the ELF loader, and signal bookkeeping.
//!
//! Module split grounded in `Dentosal-rust_os/src/multitasking/` (separate
//! `process.rs`/`process_manager.rs`/`scheduler.rs`/`queues.rs` files for
//! the same concerns), adapted to this kernel's pid-indexed table and
//! `u64`-tick scheduling model per SPEC_FULL.md §3-§5.

pub mod elf;
pub mod lifecycle;
pub mod pcb;
pub mod scheduler;
pub mod signal;
pub mod table;

use log::info;

use crate::process::pcb::{Pid, NO_PID};

/// Insert the bootstrap kernel thread (the one already running when this
/// is called, i.e. `rust_main` itself) into the ring, so the first timer
/// IRQ has something to schedule. Per SPEC_FULL.md §3: "the ring is never
/// empty while the kernel is running (the bootstrap PCB is inserted before
/// the first timer IRQ)".
pub fn init_bootstrap(kernel_directory_phys: u32) -> Pid {
    use crate::process::pcb::{Pcb, ProcessFlags, ProcessState};
    use crate::process::signal::SignalDisposition;
    use crate::process::table::PROCESS_TABLE;
    use alloc::string::String;

    let mut table = PROCESS_TABLE.lock();
    let pid = table.alloc_pid();
    let pcb = Pcb {
        pid,
        ppid: NO_PID,
        name: String::from("bootstrap"),
        uid: 0,
        gid: 0,
        euid: 0,
        egid: 0,
        state: ProcessState::Running,
        flags: ProcessFlags::KERNEL,
        address_space: crate::memory::vmm::AddressSpace {
            directory_phys: kernel_directory_phys,
        },
        heap_start: 0,
        heap_end: 0,
        brk: 0,
        stack_start: 0,
        stack_end: 0,
        kernel_stack: alloc::vec::Vec::new(),
        saved_context: core::ptr::null_mut(),
        exit_code: 0,
        priority: 2,
        quantum: 6,
        pending_signals: 0,
        signal_handlers: [SignalDisposition::Default; crate::constants::NSIG],
        wake_tick: 0,
        cwd: String::from("/"),
        next: 0,
        prev: 0,
    };
    let pid = table.insert(pcb);
    drop(table);
    crate::process::scheduler::SCHEDULER
        .lock()
        .set_bootstrap_current(pid);
    info!("process: bootstrap thread registered as pid {}", pid);
    pid
}
