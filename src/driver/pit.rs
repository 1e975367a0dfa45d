//! Programmable Interval Timer configuration (IRQ0).
//!
//! Grounded in `original_source/kernel/timer.c` for the PIT programming
//! sequence; the resulting IRQ0 cadence is what drives `process::scheduler`.

use cpuio::Port;
use spin::Mutex;

use crate::constants::TIMER_HZ;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
const PIT_BASE_FREQUENCY: u32 = 1_193_182;

struct Pit {
    channel0: Port<u8>,
    command: Port<u8>,
}

static PIT: Mutex<Pit> = Mutex::new(unsafe {
    Pit {
        channel0: Port::new(PIT_CHANNEL0),
        command: Port::new(PIT_COMMAND),
    }
});

pub fn init() {
    let divisor = (PIT_BASE_FREQUENCY / TIMER_HZ) as u16;
    let mut pit = PIT.lock();
    unsafe {
        pit.command.write(0x36); // channel 0, lo/hi byte, rate generator
        pit.channel0.write((divisor & 0xFF) as u8);
        pit.channel0.write((divisor >> 8) as u8);
    }
}
