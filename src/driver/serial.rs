//! Serial port (COM1) driver, used as the second logging sink.
//!
//! Grounded in `original_source/kernel/serial.c` for the 16550-compatible
//! initialization sequence and in the teacher's `driver::uart` module for
//! the `cpuio`-based Rust port-I/O idiom.

use cpuio::Port;
use spin::Mutex;

const COM1: u16 = 0x3F8;

pub struct SerialPort {
    data: Port<u8>,
    int_enable: Port<u8>,
    fifo_ctrl: Port<u8>,
    line_ctrl: Port<u8>,
    modem_ctrl: Port<u8>,
    line_status: Port<u8>,
}

impl SerialPort {
    const fn new(base: u16) -> Self {
        unsafe {
            SerialPort {
                data: Port::new(base),
                int_enable: Port::new(base + 1),
                fifo_ctrl: Port::new(base + 2),
                line_ctrl: Port::new(base + 3),
                modem_ctrl: Port::new(base + 4),
                line_status: Port::new(base + 5),
            }
        }
    }

    pub fn init(&mut self) {
        unsafe {
            self.int_enable.write(0x00);
            self.line_ctrl.write(0x80); // enable DLAB
            self.data.write(0x03); // divisor low: 38400 baud
            self.int_enable.write(0x00); // divisor high
            self.line_ctrl.write(0x03); // 8 bits, no parity, one stop bit
            self.fifo_ctrl.write(0xC7); // enable FIFO, clear, 14 byte threshold
            self.modem_ctrl.write(0x0B); // IRQs enabled, RTS/DSR set
        }
    }

    fn transmit_empty(&mut self) -> bool {
        unsafe { self.line_status.read() & 0x20 != 0 }
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.transmit_empty() {}
        unsafe {
            self.data.write(byte);
        }
    }

    pub fn write_str(&mut self, s: &str) {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
    }
}

pub static COM1_PORT: Mutex<SerialPort> = Mutex::new(SerialPort::new(COM1));

pub fn init() {
    COM1_PORT.lock().init();
}
