//! Hardware drivers.
//!
//! These are the trivial external collaborators: conventional, off-the-shelf
//! PC/AT devices whose interface the core kernel depends on but whose
//! implementation holds no interesting design. Kept thin on purpose.

#[macro_use]
pub mod vga;

pub mod keyboard;
pub mod pic;
pub mod pit;
pub mod serial;
