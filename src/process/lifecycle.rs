//! Fork / exec / wait / exit: the lifecycle operations tying PCBs, the VMM,
//! and the ELF loader together.
//!
//! Grounded in `original_source/kernel/fork.c` (fresh child stack,
//! `eax=0` in the child), `kernel/exec.c` (two-pass ELF mapping into a
//! fresh address space, `0x202` EFLAGS, `0x7FFFF000` stack top), and
//! `kernel/wait.c` (ring scan for a zombie child by pid/ppid).

use alloc::string::String;
use alloc::vec::Vec;
use log::info;

use crate::constants::{
    DEFAULT_EFLAGS, KERNEL_STACK_SIZE, PAGE_SIZE, USER_STACK_SIZE, USER_STACK_TOP,
};
use crate::error::{KResult, KernelError};
use crate::interrupt::frame::{PushaRegisters, TrapFrame};
use crate::memory::cow;
use crate::memory::paging::EntryFlags;
use crate::memory::pmm::FRAME_ALLOCATOR;
use crate::memory::vmm::VMM;
use crate::process::elf::ParsedElf;
use crate::process::pcb::{Pcb, Pid, ProcessFlags, ProcessState, NO_PID};
use crate::process::scheduler::SCHEDULER;
use crate::process::signal::SignalDisposition;
use crate::process::table::PROCESS_TABLE;

/// Kernel code/data selectors, installed by `interrupt::gdt`.
pub const KERNEL_CS: u32 = 0x08;
pub const KERNEL_DS: u32 = 0x10;
pub const USER_CS: u32 = 0x1B; // index 3, RPL 3
pub const USER_DS: u32 = 0x23; // index 4, RPL 3

fn push_trap_frame(stack: &mut Vec<u8>, frame: TrapFrame) -> *mut TrapFrame {
    let frame_size = core::mem::size_of::<TrapFrame>();
    debug_assert!(stack.len() >= frame_size);
    let at = stack.len() - frame_size;
    unsafe {
        let ptr = stack.as_mut_ptr().add(at) as *mut TrapFrame;
        ptr.write(frame);
        ptr
    }
}

/// Disable interrupts for the duration of `f`, restoring the prior flag.
/// The uniprocessor critical-section primitive named throughout
/// SPEC_FULL.md §5 ("process-wide... mutated under interrupts-disabled
/// critical sections").
pub fn without_interrupts<R>(f: impl FnOnce() -> R) -> R {
    crate::interrupt::without_interrupts(f)
}

/// Create a kernel thread: a PCB whose address space has only the
/// kernel-shared mappings, with a synthetic trap frame pre-populated so
/// its first dispatch `iret`s directly into `entry`.
pub fn spawn_kernel_thread(name: &str, entry: extern "C" fn() -> !) -> KResult<Pid> {
    let address_space = VMM.lock().create_address_space()?;

    let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE];
    let frame = TrapFrame {
        gpr: PushaRegisters::default(),
        ds: KERNEL_DS,
        int_no: 0,
        err_code: 0,
        eip: entry as usize as u32,
        cs: KERNEL_CS,
        eflags: DEFAULT_EFLAGS,
        user_esp: 0,
        user_ss: 0,
    };
    let saved_context = push_trap_frame(&mut kernel_stack, frame);

    let pid = without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc_pid();
        let pcb = Pcb {
            pid,
            ppid: NO_PID,
            name: truncated(name),
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            state: ProcessState::Ready,
            flags: ProcessFlags::KERNEL,
            address_space,
            heap_start: 0,
            heap_end: 0,
            brk: 0,
            stack_start: 0,
            stack_end: 0,
            kernel_stack,
            saved_context,
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
        table.insert(pcb)
    });

    info!("process: spawned kernel thread '{}' as pid {}", name, pid);
    Ok(pid)
}

fn truncated(s: &str) -> String {
    let max = crate::process::pcb::NAME_MAX;
    if s.len() <= max {
        String::from(s)
    } else {
        String::from(&s[..max])
    }
}

/// Map a fresh user stack page at `USER_STACK_TOP - USER_STACK_SIZE` in the
/// *current* address space. Takes the caller's already-held `VMM` guard
/// rather than locking its own, since every call site runs inside a
/// `switch_to_scratch`/`restore_scratch` bracket.
fn map_user_stack(vmm: &mut crate::memory::vmm::Vmm) -> KResult<(u32, u32)> {
    let stack_bottom = USER_STACK_TOP - USER_STACK_SIZE;
    let frame = FRAME_ALLOCATOR.lock().alloc()?;
    vmm.map(
        stack_bottom,
        frame,
        EntryFlags::PRESENT | EntryFlags::WRITE | EntryFlags::USER,
    )?;
    Ok((stack_bottom, USER_STACK_TOP))
}

/// Fork the calling process (`parent_pid`, assumed `Running`/current).
/// Returns the child's pid; the caller (syscall dispatch) is responsible
/// for writing 0 into the *child's* return register and the child pid
/// into the parent's, per SPEC_FULL.md §4.6.
pub fn fork(parent_pid: Pid) -> KResult<Pid> {
    let (parent_frame, parent_name, parent_uid, parent_gid, parent_priority, parent_cwd, parent_heap_start, parent_heap_end, parent_brk) = {
        let table = PROCESS_TABLE.lock();
        let parent = table.get(parent_pid).ok_or(KernelError::NoSuchProcess)?;
        (
            unsafe { *parent.saved_context },
            parent.name.clone(),
            parent.uid,
            parent.gid,
            parent.priority,
            parent.cwd.clone(),
            parent.heap_start,
            parent.heap_end,
            parent.brk,
        )
    };

    let child_space = VMM.lock().create_address_space()?;

    {
        let table = PROCESS_TABLE.lock();
        let parent = table.get(parent_pid).ok_or(KernelError::NoSuchProcess)?;
        let mut vmm = VMM.lock();
        cow::clone_address_space(&mut vmm, &parent.address_space, &child_space)?;
    }

    // Open Question #1: allocate a fresh child stack rather than relying on
    // COW for the stack region, per `original_source/kernel/fork.c`. The
    // clone above already COW-shared the parent's stack page into the child
    // (it's just another present user PTE); drop that inherited mapping
    // before overwriting it with the fresh page, or the shared frame's
    // refcount never comes back down and it leaks once both sides COW-fault
    // off it.
    let (stack_start, stack_end) = {
        let mut vmm = VMM.lock();
        let prior = vmm.switch_to_scratch(&child_space);
        let result = (|| {
            let stack_bottom = USER_STACK_TOP - USER_STACK_SIZE;
            if let Some(pte) = vmm.pte_at(stack_bottom) {
                if pte.is_present() {
                    let inherited_frame = pte.frame();
                    vmm.unmap_no_free(stack_bottom);
                    FRAME_ALLOCATOR.lock().unref_frame(inherited_frame);
                }
            }
            map_user_stack(&mut vmm)
        })();
        vmm.restore_scratch(prior);
        result?
    };

    let mut kernel_stack = alloc::vec![0u8; KERNEL_STACK_SIZE];
    let mut child_frame = parent_frame;
    child_frame.set_return_value(0); // child observes 0
    let saved_context = push_trap_frame(&mut kernel_stack, child_frame);

    let child_pid = without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        let pid = table.alloc_pid();
        let pcb = Pcb {
            pid,
            ppid: parent_pid,
            name: parent_name,
            uid: parent_uid,
            gid: parent_gid,
            euid: parent_uid,
            egid: parent_gid,
            state: ProcessState::Ready,
            flags: ProcessFlags::empty(),
            address_space: child_space,
            heap_start: parent_heap_start,
            heap_end: parent_heap_end,
            brk: parent_brk,
            stack_start,
            stack_end,
            kernel_stack,
            saved_context,
            exit_code: 0,
            priority: parent_priority,
            quantum: 6,
            pending_signals: 0,
            signal_handlers: [SignalDisposition::Default; crate::constants::NSIG],
            wake_tick: 0,
            cwd: parent_cwd,
            next: 0,
            prev: 0,
        };
        table.insert(pcb)
    });

    info!("process: fork {} -> {}", parent_pid, child_pid);
    Ok(child_pid)
}

/// Replace `pid`'s address space and register state with a freshly loaded
/// ELF image. Does not return on success to the caller's old context (the
/// PCB's saved context is simply discarded in favor of the fresh frame).
///
/// Invariant: if loading fails partway, the PCB keeps its prior address
/// space and no frame is leaked (the partially built space is torn down).
pub fn exec(pid: Pid, image: &[u8]) -> KResult<()> {
    let parsed = ParsedElf::parse(image)?;
    let heap_start = parsed.image_end()?;

    let new_space = VMM.lock().create_address_space()?;

    let load_result: KResult<(u32, u32)> = (|| {
        let mut vmm = VMM.lock();
        let prior = vmm.switch_to_scratch(&new_space);
        let outcome = (|| {
            parsed.load(&mut vmm)?;
            map_user_stack(&mut vmm)
        })();
        vmm.restore_scratch(prior);
        outcome
    })();

    let (stack_start, stack_end) = match load_result {
        Ok(v) => v,
        Err(e) => {
            // Revert: the PCB keeps its prior address space; tear down the
            // partially built new one so no frame leaks.
            VMM.lock().destroy_address_space(&new_space);
            return Err(e);
        }
    };

    let entry = parsed.entry_point();

    without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        let pcb = table.get_mut(pid).ok_or(KernelError::NoSuchProcess)?;
        if pcb.is_kernel_thread() {
            return Err(KernelError::InvalidState);
        }

        let old_space = core::mem::replace(&mut pcb.address_space, new_space);

        pcb.stack_start = stack_start;
        pcb.stack_end = stack_end;
        pcb.heap_start = heap_start;
        pcb.heap_end = heap_start;
        pcb.brk = heap_start;

        let frame = TrapFrame {
            gpr: PushaRegisters::default(),
            ds: USER_DS,
            int_no: 0,
            err_code: 0,
            eip: entry,
            cs: USER_CS,
            eflags: DEFAULT_EFLAGS,
            user_esp: stack_end,
            user_ss: USER_DS,
        };
        let new_stack = alloc::vec![0u8; KERNEL_STACK_SIZE];
        let mut new_stack = new_stack;
        let saved_context = push_trap_frame(&mut new_stack, frame);
        pcb.kernel_stack = new_stack;
        pcb.saved_context = saved_context;

        if crate::process::scheduler::SCHEDULER.lock().current_pid() == pid {
            VMM.lock().switch_to(&pcb.address_space);
        }

        VMM.lock().destroy_address_space(&old_space);
        Ok(())
    })
}

/// Scan the ring for a zombie child of `caller_pid` matching `want_pid`
/// (`None` = any child). On success, unlinks and destroys the zombie,
/// returning its pid and exit code.
pub fn try_reap(caller_pid: Pid, want_pid: Option<Pid>) -> KResult<Option<(Pid, i32)>> {
    let mut table = PROCESS_TABLE.lock();
    let ring = table.ring_pids();

    let mut any_child = false;
    for pid in ring {
        let matches_pid = want_pid.map(|w| w == pid).unwrap_or(true);
        if let Some(pcb) = table.get(pid) {
            if pcb.ppid != caller_pid {
                continue;
            }
            if !matches_pid {
                continue;
            }
            any_child = true;
            if pcb.state == ProcessState::Zombie {
                let exit_code = pcb.exit_code;
                let zombie = table.remove(pid).unwrap();
                VMM.lock().destroy_address_space(&zombie.address_space);
                return Ok(Some((pid, exit_code)));
            }
        }
    }

    if any_child {
        Ok(None) // caller must block; no zombie yet
    } else {
        Err(KernelError::InvalidState) // no children at all
    }
}

/// Transition `pid` to `Zombie`, recording its exit code. The ring retains
/// the PCB until the parent's `wait` reaps it. If the parent is blocked in
/// `wait` (via `scheduler::block_current`, which `sweep_sleepers` never
/// touches since `wake_tick` stays 0), wake it here so it observes the new
/// zombie on its next dispatch.
pub fn exit(pid: Pid, code: i32) {
    without_interrupts(|| {
        let mut table = PROCESS_TABLE.lock();
        let ppid = match table.get_mut(pid) {
            Some(pcb) => {
                pcb.state = ProcessState::Zombie;
                pcb.exit_code = code;
                pcb.ppid
            }
            None => return,
        };
        if let Some(parent) = table.get_mut(ppid) {
            if parent.state == ProcessState::Blocked {
                parent.state = ProcessState::Ready;
            }
        }
    });
    info!("process: pid {} exited with code {}", pid, code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_frame_fits_on_a_reasonably_sized_stack() {
        assert!(core::mem::size_of::<TrapFrame>() < KERNEL_STACK_SIZE / 4);
    }

    #[test]
    fn truncated_clamps_long_names() {
        let long = "a".repeat(100);
        assert_eq!(truncated(&long).len(), crate::process::pcb::NAME_MAX);
    }

    #[test]
    fn user_stack_window_is_page_aligned_and_below_top() {
        let bottom = USER_STACK_TOP - USER_STACK_SIZE;
        assert_eq!(bottom % PAGE_SIZE as u32, 0);
        assert!(bottom < USER_STACK_TOP);
    }
}
