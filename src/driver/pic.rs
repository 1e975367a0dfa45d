//! 8259 PIC remapping and end-of-interrupt signaling.
//!
//! A trivial external collaborator per the scoping in SPEC_FULL.md §1;
//! remapped so that IRQs land at vectors 0x20-0x2F, clear of the CPU
//! exception range, following the conventional remap sequence.

use cpuio::Port;
use spin::Mutex;

const PIC1_CMD: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_CMD: u16 = 0xA0;
const PIC2_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x10;
const ICW1_ICW4: u8 = 0x01;
const ICW4_8086: u8 = 0x01;

pub const PIC1_OFFSET: u8 = 0x20;
pub const PIC2_OFFSET: u8 = 0x28;

struct Pic {
    cmd1: Port<u8>,
    data1: Port<u8>,
    cmd2: Port<u8>,
    data2: Port<u8>,
}

static PIC: Mutex<Pic> = Mutex::new(unsafe {
    Pic {
        cmd1: Port::new(PIC1_CMD),
        data1: Port::new(PIC1_DATA),
        cmd2: Port::new(PIC2_CMD),
        data2: Port::new(PIC2_DATA),
    }
});

pub fn init() {
    let mut pic = PIC.lock();
    unsafe {
        let mask1 = pic.data1.read();
        let mask2 = pic.data2.read();

        pic.cmd1.write(ICW1_INIT | ICW1_ICW4);
        pic.cmd2.write(ICW1_INIT | ICW1_ICW4);

        pic.data1.write(PIC1_OFFSET);
        pic.data2.write(PIC2_OFFSET);

        pic.data1.write(4); // tell PIC1 there's a PIC2 at IRQ2
        pic.data2.write(2); // tell PIC2 its cascade identity

        pic.data1.write(ICW4_8086);
        pic.data2.write(ICW4_8086);

        pic.data1.write(mask1);
        pic.data2.write(mask2);
    }
}

pub fn end_of_interrupt(irq: u8) {
    let mut pic = PIC.lock();
    unsafe {
        if irq >= 8 {
            pic.cmd2.write(0x20);
        }
        pic.cmd1.write(0x20);
    }
}
