//! `log`-crate sink writing to both the VGA console and the serial port.
//!
//! Mirrors the teacher's dual-sink approach (`syslog::enable()` /
//! `disable_direct_vga()` in `main.rs`): early boot logs go to both the
//! screen and the serial line; once the console is handed over to a shell
//! process, direct VGA writes from the logger are switched off and only
//! serial keeps recording.

use core::fmt::Write;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{Level, Metadata, Record};

use crate::driver::serial::COM1_PORT;
use crate::driver::vga::TERMINAL;

static VGA_SINK_ENABLED: AtomicBool = AtomicBool::new(true);

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let _ = writeln!(COM1_PORT.lock(), "[{:<5}] {}", record.level(), record.args());

        if VGA_SINK_ENABLED.load(Ordering::Relaxed) {
            let _ = writeln!(TERMINAL.lock(), "[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

impl Write for crate::driver::serial::SerialPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        crate::driver::serial::SerialPort::write_str(self, s);
        Ok(())
    }
}

static LOGGER: KernelLogger = KernelLogger;

pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .expect("logger already initialized");
}

/// Stop mirroring log lines to the screen once a foreground process owns it.
pub fn disable_vga_sink() {
    VGA_SINK_ENABLED.store(false, Ordering::Relaxed);
}
