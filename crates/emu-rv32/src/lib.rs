//! RISC-V RV32 system simulator.
//!
//! A cycle-approximate RV32IM machine: flat RAM at `0x8000_0000`, a small
//! MMIO device set (serial, RTC, keyboard, VGA), execution tracing with
//! post-mortem dumps, and an interactive source-level debugger. The CPU
//! core itself lives in the `rv32-cpu` crate; this crate is the machine
//! around it.

mod bus;
mod config;
pub mod expr;
mod keyboard;
mod logger;
mod machine;
mod rtc;
mod sdb;
pub mod trace;
mod uart;
mod vga;
mod watchpoint;

#[cfg(feature = "native")]
pub mod capture;
#[cfg(feature = "native")]
pub mod keyboard_map;
#[cfg(feature = "native")]
pub mod window;

pub use bus::{
    FB_ADDR, KBD_ADDR, MemAccess, PMEM_BASE, PMEM_SIZE, RTC_ADDR, SERIAL_ADDR, SystemBus,
    VGACTL_ADDR,
};
pub use config::MachineConfig;
pub use keyboard::{KEYDOWN_MASK, Key, Keyboard};
pub use logger::init as init_logger;
pub use machine::{MAX_INST_TO_PRINT, Machine, RunState};
pub use rtc::Rtc;
pub use sdb::Sdb;
pub use uart::Uart;
pub use vga::{Frame, FrameSink, VGA_HEIGHT, VGA_WIDTH};
pub use watchpoint::{NR_WP, Watchpoint, WatchpointPool};
