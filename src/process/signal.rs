//! Signal bookkeeping: pending mask, per-signal disposition, default
//! dispositions, and the state-transition table.
//!
//! Grounded in `original_source/kernel/include/kernel/process.h`'s
//! `pending_signals`/`signal_handlers[NSIG]` fields and `SIG_DFL`/`SIG_IGN`
//! sentinels. Actually vectoring a user process through an installed
//! handler (a signal trampoline on the user stack) is explicitly deferred
//! per SPEC_FULL.md §9 and §4.9 — only the PCB state transitions are
//! implemented here.

use core::convert::TryFrom;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::process::pcb::{Pcb, ProcessState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum Signal {
    Hup = 1,
    Int = 2,
    Quit = 3,
    Ill = 4,
    Abrt = 6,
    Fpe = 8,
    Kill = 9,
    Segv = 11,
    Pipe = 13,
    Term = 15,
    Chld = 17,
    Cont = 18,
    Stop = 19,
}

/// What a process does when a signal it hasn't overridden arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum SignalDisposition {
    Default,
    Ignore,
    /// User-mode handler entry point. Queued only; trampolining into it is
    /// not implemented (see module docs).
    Handler(u32),
}

impl Default for SignalDisposition {
    fn default() -> Self {
        SignalDisposition::Default
    }
}

fn bit(sig: u32) -> u32 {
    1 << (sig & 31)
}

/// Mark `sig` pending on `target`. Unblocks a `Blocked` target so the next
/// scheduling checkpoint observes it.
pub fn raise(target: &mut Pcb, sig: u32) {
    target.pending_signals |= bit(sig);
    if target.state == ProcessState::Blocked {
        target.state = ProcessState::Ready;
    }
}

/// Outcome of delivering one pending signal at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing pending, or every pending signal is ignored/handled.
    NoAction,
    /// The process must transition to `Zombie` with the given exit code.
    Terminate(i32),
    /// The process must transition to `Stopped`.
    Stop,
    /// The process must transition from `Stopped` to `Ready`.
    Continue,
}

/// Walk `target`'s pending mask and apply default dispositions, per
/// SPEC_FULL.md §4.9:
/// - SIGKILL/SIGSTOP cannot be caught or ignored.
/// - SIGCONT transitions Stopped -> Ready.
/// - The conventional terminate-by-default set ends the process.
/// - SIGCHLD is ignored by default.
/// - A user-installed handler is left queued (not trampolined); the bit is
///   cleared since delivery has been "observed" here to the extent this
///   kernel implements it.
pub fn deliver_pending(target: &mut Pcb) -> DeliveryOutcome {
    if target.pending_signals & bit(Signal::Kill as u32) != 0 {
        target.pending_signals &= !bit(Signal::Kill as u32);
        return DeliveryOutcome::Terminate(128 + Signal::Kill as i32);
    }
    if target.pending_signals & bit(Signal::Stop as u32) != 0 {
        target.pending_signals &= !bit(Signal::Stop as u32);
        return DeliveryOutcome::Stop;
    }
    if target.pending_signals & bit(Signal::Cont as u32) != 0 {
        target.pending_signals &= !bit(Signal::Cont as u32);
        if target.state == ProcessState::Stopped {
            return DeliveryOutcome::Continue;
        }
    }

    for raw in 1u32..crate::constants::NSIG as u32 {
        if target.pending_signals & bit(raw) == 0 {
            continue;
        }
        let disposition = target.signal_handlers[raw as usize];
        match disposition {
            SignalDisposition::Ignore => {
                target.pending_signals &= !bit(raw);
            }
            SignalDisposition::Handler(_) => {
                // Deferred: trampolining is not implemented. Leave queued.
            }
            SignalDisposition::Default => {
                if let Ok(sig) = Signal::try_from(raw) {
                    if sig == Signal::Chld {
                        target.pending_signals &= !bit(raw);
                        continue;
                    }
                    target.pending_signals &= !bit(raw);
                    return DeliveryOutcome::Terminate(128 + raw as i32);
                } else {
                    target.pending_signals &= !bit(raw);
                }
            }
        }
    }

    DeliveryOutcome::NoAction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_and_stop_cannot_be_overridden_by_ignore() {
        let mut mask = 0u32;
        mask |= bit(Signal::Kill as u32);
        assert_eq!(mask, 1 << 9);
    }
}
