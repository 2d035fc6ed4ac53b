//! Physical memory and MMIO dispatch.
//!
//! The guest address space is a flat 128 MiB RAM block at `0x8000_0000`
//! plus a handful of device windows. Dispatch order: RAM fast path first,
//! then the MMIO region containing the address, otherwise the access is a
//! host error and the simulation aborts.
//!
//! Device callbacks run *before* a read (so the device can refresh the
//! backing bytes) and *after* a write (so the device can act on the new
//! value). The callback sees `(offset, len, is_write)` relative to its
//! region.

use sim_core::{Bus, RingBuf};

use crate::keyboard::{Key, Keyboard};
use crate::rtc::Rtc;
use crate::uart::Uart;
use crate::vga::{Frame, FrameSink, VGA_HEIGHT, VGA_WIDTH};

/// Base and size of guest RAM.
pub const PMEM_BASE: u32 = 0x8000_0000;
pub const PMEM_SIZE: usize = 0x0800_0000;

/// Device windows.
pub const SERIAL_ADDR: u32 = 0xa000_03f8;
pub const RTC_ADDR: u32 = 0xa000_0048;
pub const KBD_ADDR: u32 = 0xa000_0060;
pub const VGACTL_ADDR: u32 = 0xa000_0100;
pub const FB_ADDR: u32 = 0xa100_0000;

/// Entries kept in the memory-access and device-access rings.
pub const MTRACE_BUF_SIZE: usize = 16;
pub const DTRACE_BUF_SIZE: usize = 16;

/// One traced memory access.
#[derive(Debug, Clone, Copy)]
pub struct MemAccess {
    pub addr: u32,
    pub len: usize,
    pub value: u32,
    pub is_write: bool,
}

/// One traced device access.
#[derive(Debug, Clone, Copy)]
pub struct DevAccess {
    pub name: &'static str,
    pub offset: usize,
    pub len: usize,
    pub is_write: bool,
}

/// Per-region device behaviour.
enum Device {
    /// Plain backing bytes, no callback.
    Passive,
    Uart(Uart),
    Rtc(Rtc),
    Keyboard(Keyboard),
}

impl Device {
    fn handle(&mut self, data: &mut [u8], offset: usize, len: usize, is_write: bool) {
        match self {
            Device::Passive => {}
            Device::Uart(uart) => uart.handle(data, offset, len, is_write),
            Device::Rtc(rtc) => rtc.handle(data, offset, len, is_write),
            Device::Keyboard(kbd) => kbd.handle(data, offset, len, is_write),
        }
    }
}

/// One MMIO window. Regions never overlap.
struct MmioRegion {
    name: &'static str,
    base: u32,
    data: Vec<u8>,
    device: Device,
}

impl MmioRegion {
    fn contains(&self, addr: u32) -> bool {
        addr >= self.base && (u64::from(addr) - u64::from(self.base)) < self.data.len() as u64
    }
}

/// The machine's memory system: RAM, the MMIO map and the access traces.
pub struct SystemBus {
    pmem: Vec<u8>,
    regions: Vec<MmioRegion>,
    pub mtrace: RingBuf<MemAccess>,
    pub dtrace: RingBuf<DevAccess>,
    pub frames: FrameSink,
}

impl SystemBus {
    /// Build the bus with all devices mapped and RAM zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self::with_uart(Uart::new())
    }

    /// Build the bus with a console-silent UART (tests).
    #[must_use]
    pub fn silent() -> Self {
        Self::with_uart(Uart::silent())
    }

    fn with_uart(uart: Uart) -> Self {
        let mut vgactl = vec![0u8; 8];
        vgactl[0..4].copy_from_slice(&((VGA_WIDTH << 16) | VGA_HEIGHT).to_le_bytes());

        let regions = vec![
            MmioRegion {
                name: "serial",
                base: SERIAL_ADDR,
                data: vec![0; 8],
                device: Device::Uart(uart),
            },
            MmioRegion {
                name: "rtc",
                base: RTC_ADDR,
                data: vec![0; 8],
                device: Device::Rtc(Rtc::new()),
            },
            MmioRegion {
                name: "keyboard",
                base: KBD_ADDR,
                data: vec![0; 4],
                device: Device::Keyboard(Keyboard::new()),
            },
            MmioRegion {
                name: "vgactl",
                base: VGACTL_ADDR,
                data: vgactl,
                device: Device::Passive,
            },
            MmioRegion {
                name: "fb",
                base: FB_ADDR,
                data: vec![0; (VGA_WIDTH * VGA_HEIGHT * 4) as usize],
                device: Device::Passive,
            },
        ];

        Self {
            pmem: vec![0; PMEM_SIZE],
            regions,
            mtrace: RingBuf::new(MTRACE_BUF_SIZE),
            dtrace: RingBuf::new(DTRACE_BUF_SIZE),
            frames: FrameSink::new(),
        }
    }

    /// Copy a raw image into RAM at the reset vector.
    ///
    /// # Errors
    ///
    /// Fails if the image is larger than RAM.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), String> {
        if image.len() > PMEM_SIZE {
            return Err(format!(
                "image of {} bytes does not fit in {PMEM_SIZE} bytes of RAM",
                image.len()
            ));
        }
        self.pmem[..image.len()].copy_from_slice(image);
        Ok(())
    }

    fn in_pmem(addr: u32, len: usize) -> bool {
        addr >= PMEM_BASE && (u64::from(addr) - u64::from(PMEM_BASE)) + len as u64 <= PMEM_SIZE as u64
    }

    fn mmio(&mut self, addr: u32, len: usize, write: Option<u32>) -> Result<u32, String> {
        let Some(region) = self.regions.iter_mut().find(|r| r.contains(addr)) else {
            return Err(format!(
                "address {addr:#010x} is outside the memory map"
            ));
        };
        let offset = (addr - region.base) as usize;
        if offset + len > region.data.len() {
            return Err(format!(
                "access of {len} bytes at {addr:#010x} runs past the end of device '{}'",
                region.name
            ));
        }

        self.dtrace.push(DevAccess {
            name: region.name,
            offset,
            len,
            is_write: write.is_some(),
        });

        if let Some(value) = write {
            for i in 0..len {
                region.data[offset + i] = (value >> (8 * i)) as u8;
            }
            region.device.handle(&mut region.data, offset, len, true);
            Ok(value)
        } else {
            region.device.handle(&mut region.data, offset, len, false);
            let mut value = 0u32;
            for i in (0..len).rev() {
                value = (value << 8) | u32::from(region.data[offset + i]);
            }
            Ok(value)
        }
    }

    /// One device-update tick: if the guest latched the VGA sync flag,
    /// present the framebuffer and clear the flag.
    pub fn device_update(&mut self) {
        // Sync latch is vgactl word 1.
        let ctl = &self.regions[3].data;
        let sync = u32::from_le_bytes([ctl[4], ctl[5], ctl[6], ctl[7]]);
        if sync == 0 {
            return;
        }

        let fb = &self.regions[4].data;
        let pixels = fb
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        self.frames.push(Frame {
            width: VGA_WIDTH,
            height: VGA_HEIGHT,
            pixels,
        });
        self.regions[3].data[4..8].copy_from_slice(&[0; 4]);
    }

    /// Copy of the current framebuffer contents, synced or not (used for
    /// screenshots of a finished run).
    #[must_use]
    pub fn framebuffer(&self) -> Frame {
        let pixels = self.regions[4]
            .data
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Frame {
            width: VGA_WIDTH,
            height: VGA_HEIGHT,
            pixels,
        }
    }

    /// Queue a key press or release for the guest.
    pub fn key_event(&mut self, key: Key, down: bool) {
        if let Device::Keyboard(kbd) = &mut self.regions[2].device {
            kbd.key_event(key, down);
        }
    }

    /// Queue a byte of serial input for the guest.
    pub fn serial_input(&mut self, byte: u8) {
        if let Device::Uart(uart) = &mut self.regions[0].device {
            uart.push_input(byte);
        }
    }

    /// Everything the guest wrote to the serial port.
    #[must_use]
    pub fn serial_output(&self) -> &[u8] {
        match &self.regions[0].device {
            Device::Uart(uart) => uart.tx_log(),
            _ => &[],
        }
    }
}

impl Default for SystemBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SystemBus {
    fn read(&mut self, addr: u32, len: usize) -> Result<u32, String> {
        let value = if Self::in_pmem(addr, len) {
            let offset = (addr - PMEM_BASE) as usize;
            let mut value = 0u32;
            for i in (0..len).rev() {
                value = (value << 8) | u32::from(self.pmem[offset + i]);
            }
            value
        } else {
            self.mmio(addr, len, None)?
        };
        self.mtrace.push(MemAccess {
            addr,
            len,
            value,
            is_write: false,
        });
        Ok(value)
    }

    fn write(&mut self, addr: u32, len: usize, value: u32) -> Result<(), String> {
        if Self::in_pmem(addr, len) {
            let offset = (addr - PMEM_BASE) as usize;
            for i in 0..len {
                self.pmem[offset + i] = (value >> (8 * i)) as u8;
            }
        } else {
            self.mmio(addr, len, Some(value))?;
        }
        self.mtrace.push(MemAccess {
            addr,
            len,
            value,
            is_write: true,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_round_trip_all_widths() {
        let mut bus = SystemBus::silent();
        bus.write(0x8000_1000, 4, 0xdead_beef).expect("write");
        assert_eq!(bus.read(0x8000_1000, 4).expect("read"), 0xdead_beef);
        bus.write(0x8000_1004, 2, 0xcafe).expect("write");
        assert_eq!(bus.read(0x8000_1004, 2).expect("read"), 0xcafe);
        bus.write(0x8000_1006, 1, 0x42).expect("write");
        assert_eq!(bus.read(0x8000_1006, 1).expect("read"), 0x42);
        // Little-endian byte order is observable byte by byte.
        assert_eq!(bus.read(0x8000_1000, 1).expect("read"), 0xef);
        assert_eq!(bus.read(0x8000_1003, 1).expect("read"), 0xde);
    }

    #[test]
    fn unmapped_access_is_an_error() {
        let mut bus = SystemBus::silent();
        assert!(bus.read(0x1000_0000, 4).is_err());
        assert!(bus.write(0x1000_0000, 4, 0).is_err());
        assert!(bus.read(0xa000_0000, 4).is_err());
    }

    #[test]
    fn access_past_region_end_is_an_error() {
        let mut bus = SystemBus::silent();
        // The keyboard window is 4 bytes; a 4-byte read at +2 runs over.
        assert!(bus.read(KBD_ADDR + 2, 4).is_err());
    }

    #[test]
    fn vgactl_reports_resolution() {
        let mut bus = SystemBus::silent();
        let packed = bus.read(VGACTL_ADDR, 4).expect("read");
        assert_eq!(packed >> 16, VGA_WIDTH);
        assert_eq!(packed & 0xffff, VGA_HEIGHT);
    }

    #[test]
    fn sync_flag_presents_and_clears() {
        let mut bus = SystemBus::silent();
        bus.write(FB_ADDR, 4, 0x00ff_0000).expect("fb write");
        bus.device_update();
        assert_eq!(bus.frames.presented(), 0, "no sync latched yet");

        bus.write(VGACTL_ADDR + 4, 4, 1).expect("sync write");
        bus.device_update();
        assert_eq!(bus.frames.presented(), 1);
        let frame = bus.frames.take().expect("frame");
        assert_eq!(frame.pixels[0], 0x00ff_0000);
        assert_eq!(bus.read(VGACTL_ADDR + 4, 4).expect("read"), 0, "flag cleared");

        // No further presents until the guest latches again.
        bus.device_update();
        assert_eq!(bus.frames.presented(), 1);
    }

    #[test]
    fn serial_output_is_observable() {
        let mut bus = SystemBus::silent();
        bus.write(SERIAL_ADDR, 1, u32::from(b'A')).expect("write");
        bus.write(SERIAL_ADDR, 1, u32::from(b'B')).expect("write");
        assert_eq!(bus.serial_output(), b"AB");
    }

    #[test]
    fn keyboard_reads_pop_events() {
        let mut bus = SystemBus::silent();
        bus.key_event(Key::Space, true);
        let code = bus.read(KBD_ADDR, 4).expect("read");
        assert_eq!(code, Key::Space as u32 | crate::keyboard::KEYDOWN_MASK);
        assert_eq!(bus.read(KBD_ADDR, 4).expect("read"), 0);
    }

    #[test]
    fn rtc_low_then_high_is_consistent() {
        let mut bus = SystemBus::silent();
        let lo = bus.read(RTC_ADDR, 4).expect("read");
        let hi = bus.read(RTC_ADDR + 4, 4).expect("read");
        let ticks = (u64::from(hi) << 32) | u64::from(lo);
        // Fresh machine: the count is small but monotonic.
        let lo2 = bus.read(RTC_ADDR, 4).expect("read");
        let hi2 = bus.read(RTC_ADDR + 4, 4).expect("read");
        let ticks2 = (u64::from(hi2) << 32) | u64::from(lo2);
        assert!(ticks2 >= ticks);
    }

    #[test]
    fn traces_record_accesses() {
        let mut bus = SystemBus::silent();
        bus.write(0x8000_2000, 4, 7).expect("write");
        bus.read(KBD_ADDR, 4).expect("read");
        assert!(bus.mtrace.len() >= 2);
        assert_eq!(bus.dtrace.len(), 1);
        let dev = bus.dtrace.iter().next().expect("entry");
        assert_eq!(dev.name, "keyboard");
        assert!(!dev.is_write);
    }
}
