//! Preemptive round-robin scheduler over the process ring.
//!
//! `tick`'s eight-step algorithm and `yield`/`sleep_until` are grounded in
//! SPEC_FULL.md §4.5; the singleton/`lazy_static` shape and sweep-by-wake
//! idiom follow `Dentosal-rust_os/src/multitasking/scheduler.rs` and
//! `src/multitasking/queues.rs`'s `Queues::tick` sweep, adapted from an
//! `Instant`-keyed model to this kernel's `u64` timer-tick model.

use lazy_static::lazy_static;
use log::trace;
use spin::Mutex;

use crate::interrupt::frame::TrapFrame;
use crate::interrupt::gdt;
use crate::process::pcb::{Pcb, Pid, ProcessState, NO_PID};
use crate::process::table::PROCESS_TABLE;

/// Point the TSS at this PCB's kernel stack, so the next ring3 -> ring0
/// trap it takes lands on the right memory. A no-op for kernel threads
/// (empty `kernel_stack`), which never execute in ring 3.
fn adopt_kernel_stack(pcb: &Pcb) {
    if !pcb.kernel_stack.is_empty() {
        let esp0 = pcb.kernel_stack.as_ptr() as u32 + pcb.kernel_stack.len() as u32;
        gdt::set_kernel_stack(esp0);
    }
}

/// Ticks granted per quantum, scaled by priority (0..=4, 4 = highest).
fn quantum_for_priority(priority: u8) -> u32 {
    const BASE: u32 = 4;
    BASE + (priority as u32) * 2
}

pub struct Scheduler {
    current: Pid,
    ticks: u64,
    switches: u64,
}

impl Scheduler {
    const fn new() -> Self {
        Scheduler {
            current: NO_PID,
            ticks: 0,
            switches: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Number of times `tick` has actually switched to a different PCB,
    /// exposed for `sys_sysinfo`.
    pub fn switch_count(&self) -> u64 {
        self.switches
    }

    pub fn current_pid(&self) -> Pid {
        self.current
    }

    /// Register the bootstrap PCB as already running, before the first
    /// timer tick ever fires.
    pub fn set_bootstrap_current(&mut self, pid: Pid) {
        self.current = pid;
    }

    /// Move any `Blocked` PCB whose `wake_tick` has arrived to `Ready`.
    fn sweep_sleepers(&self) {
        let mut table = PROCESS_TABLE.lock();
        let pids = table.ring_pids();
        for pid in pids {
            if let Some(pcb) = table.get_mut(pid) {
                if pcb.state == ProcessState::Blocked
                    && pcb.wake_tick != 0
                    && pcb.wake_tick <= self.ticks
                {
                    pcb.wake_tick = 0;
                    pcb.state = ProcessState::Ready;
                }
            }
        }
    }

    /// Scan one full lap of the ring strictly after `start`, returning the
    /// highest-priority runnable PCB encountered (ties broken in favor of
    /// the one seen first, i.e. round-robin order among equal priorities),
    /// per SPEC_FULL.md §4.5's "within one full ring traversal a higher-
    /// priority Ready PCB is preferred over a lower-priority one".
    fn pick_next(&self, table: &crate::process::table::ProcessTable, start: Pid) -> Option<Pid> {
        let mut best: Option<(Pid, u8)> = None;
        let mut cur = table.next_of(start)?;
        while cur != start {
            if let Some(pcb) = table.get(cur) {
                if pcb.is_runnable() && best.map_or(true, |(_, best_priority)| pcb.priority > best_priority) {
                    best = Some((cur, pcb.priority));
                }
            }
            cur = match table.next_of(cur) {
                Some(next) => next,
                None => break,
            };
        }
        best.map(|(pid, _)| pid)
    }

    /// The eight-step tick algorithm of SPEC_FULL.md §4.5. Interrupts are
    /// assumed already disabled by the caller (the ISR path).
    pub fn tick(&mut self, frame: *mut TrapFrame) -> *mut TrapFrame {
        self.ticks += 1;
        self.sweep_sleepers();

        let mut table = PROCESS_TABLE.lock();

        if table.is_empty() {
            return frame;
        }

        // Signal checkpoint (SPEC_FULL.md §4.9, "scheduler re-dispatch"):
        // apply any pending default-disposition signal against the outgoing
        // current before deciding whether it keeps running.
        if self.current != NO_PID {
            let terminated_ppid = if let Some(pcb) = table.get_mut(self.current) {
                match crate::process::signal::deliver_pending(pcb) {
                    crate::process::signal::DeliveryOutcome::Terminate(code) => {
                        pcb.state = ProcessState::Zombie;
                        pcb.exit_code = code;
                        Some(pcb.ppid)
                    }
                    crate::process::signal::DeliveryOutcome::Stop => {
                        pcb.state = ProcessState::Stopped;
                        None
                    }
                    crate::process::signal::DeliveryOutcome::Continue => {
                        pcb.state = ProcessState::Ready;
                        None
                    }
                    crate::process::signal::DeliveryOutcome::NoAction => None,
                }
            } else {
                None
            };
            // Wake a parent blocked in `wait` the same way `lifecycle::exit`
            // does, since this termination path bypasses that function.
            if let Some(ppid) = terminated_ppid {
                if let Some(parent) = table.get_mut(ppid) {
                    if parent.state == ProcessState::Blocked {
                        parent.state = ProcessState::Ready;
                    }
                }
            }
        }

        // Step 2: drop a non-runnable current.
        if self.current != NO_PID {
            if let Some(pcb) = table.get(self.current) {
                if !pcb.is_runnable() {
                    self.current = NO_PID;
                }
            } else {
                self.current = NO_PID;
            }
        }

        // Step 3: no current -> dispatch the first runnable PCB.
        if self.current == NO_PID {
            let anchor = table.anchor();
            let candidate = if table
                .get(anchor)
                .map(|p| p.is_runnable())
                .unwrap_or(false)
            {
                Some(anchor)
            } else {
                self.pick_next(&table, anchor)
            };
            return match candidate {
                Some(pid) => {
                    let pcb = table.get_mut(pid).unwrap();
                    pcb.state = ProcessState::Running;
                    self.current = pid;
                    // The bootstrap PCB has never taken a trap before its
                    // first dispatch, so it has no prior saved context yet;
                    // fall back to the frame the ISR stub is already
                    // holding, per SPEC_FULL.md §4.5 step 3.
                    if pcb.saved_context.is_null() {
                        pcb.saved_context = frame;
                    }
                    adopt_kernel_stack(pcb);
                    pcb.saved_context
                }
                None => frame,
            };
        }

        // Step 4: record the incoming frame as the current PCB's context.
        {
            let pcb = table.get_mut(self.current).unwrap();
            pcb.saved_context = frame;

            // Step 5: decrement quantum; no switch if time remains.
            if pcb.quantum > 0 {
                pcb.quantum -= 1;
            }
            if pcb.quantum > 0 {
                return frame;
            }
        }

        // Step 6: reset quantum, find a different runnable peer.
        let priority = table.get(self.current).unwrap().priority;
        table.get_mut(self.current).unwrap().quantum = quantum_for_priority(priority);

        let next_pid = match self.pick_next(&table, self.current) {
            Some(pid) => pid,
            None => return frame, // step 7: nobody else runnable
        };

        // Step 8: demote the old current, promote the new one.
        let prev_pid = self.current;
        if let Some(prev) = table.get_mut(prev_pid) {
            if prev.state == ProcessState::Running {
                prev.state = ProcessState::Ready;
            }
        }
        table.get_mut(next_pid).unwrap().state = ProcessState::Running;
        self.current = next_pid;

        // Step 9: switch address space and kernel stack, return the new
        // saved frame.
        let next_frame = {
            let next = table.get(next_pid).unwrap();
            crate::memory::vmm::VMM.lock().switch_to(&next.address_space);
            adopt_kernel_stack(next);
            next.saved_context
        };
        self.switches += 1;
        trace!("scheduler: switch {} -> {}", prev_pid, next_pid);
        next_frame
    }

    /// Voluntary preemption: zero the current quantum so the very next
    /// tick-shaped dispatch (triggered here via a software interrupt,
    /// exactly as `yield()` is specified) selects a different process.
    pub fn request_yield(&mut self) {
        if self.current != NO_PID {
            if let Some(pcb) = PROCESS_TABLE.lock().get_mut(self.current) {
                pcb.quantum = 0;
            }
        }
    }

    /// Block the current process until `wake_tick`.
    pub fn sleep_current_until(&mut self, wake_tick: u64) {
        if self.current != NO_PID {
            if let Some(pcb) = PROCESS_TABLE.lock().get_mut(self.current) {
                pcb.wake_tick = wake_tick;
                pcb.state = ProcessState::Blocked;
            }
        }
    }

    /// Block the current process indefinitely (`wake_tick` left at 0, so
    /// `sweep_sleepers` never touches it). Used by `wait` when no zombie
    /// child is available yet; woken explicitly by `lifecycle::exit` when a
    /// child terminates.
    pub fn block_current(&mut self) {
        if self.current != NO_PID {
            if let Some(pcb) = PROCESS_TABLE.lock().get_mut(self.current) {
                pcb.wake_tick = 0;
                pcb.state = ProcessState::Blocked;
            }
        }
    }
}

lazy_static! {
    pub static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::pcb::ProcessFlags;
    use crate::process::signal::SignalDisposition;
    use crate::process::table::ProcessTable;

    #[test]
    fn quantum_scales_with_priority() {
        assert!(quantum_for_priority(4) > quantum_for_priority(0));
    }

    fn dummy_pcb(pid: Pid, priority: u8) -> Pcb {
        Pcb {
            pid,
            ppid: 0,
            name: alloc::string::String::from("t"),
            uid: 0,
            gid: 0,
            euid: 0,
            egid: 0,
            state: ProcessState::Ready,
            flags: ProcessFlags::empty(),
            address_space: crate::memory::vmm::AddressSpace { directory_phys: 0 },
            heap_start: 0,
            heap_end: 0,
            brk: 0,
            stack_start: 0,
            stack_end: 0,
            kernel_stack: alloc::vec::Vec::new(),
            saved_context: core::ptr::null_mut(),
            exit_code: 0,
            priority,
            quantum: 5,
            pending_signals: 0,
            signal_handlers: [SignalDisposition::Default; crate::constants::NSIG],
            wake_tick: 0,
            cwd: alloc::string::String::from("/"),
            next: 0,
            prev: 0,
        }
    }

    #[test]
    fn pick_next_prefers_higher_priority_within_one_lap() {
        let mut table = ProcessTable::new();
        table.insert(dummy_pcb(1, 1));
        table.insert(dummy_pcb(2, 4));
        table.insert(dummy_pcb(3, 2));

        let scheduler = Scheduler::new();
        assert_eq!(scheduler.pick_next(&table, 1), Some(2));
    }

    #[test]
    fn pick_next_breaks_priority_ties_in_ring_order() {
        let mut table = ProcessTable::new();
        table.insert(dummy_pcb(1, 2));
        table.insert(dummy_pcb(2, 2));
        table.insert(dummy_pcb(3, 2));

        let scheduler = Scheduler::new();
        assert_eq!(scheduler.pick_next(&table, 1), Some(2));
    }
}
