//! Guest physical memory bus interface.

/// Guest physical memory bus.
///
/// The CPU core performs all fetches, loads and stores through this trait.
/// The machine implementation routes accesses to RAM or memory-mapped I/O.
/// Accesses are little-endian and 1, 2 or 4 bytes wide; the value travels
/// in the low bits of a `u32`.
///
/// An `Err` means the access left the memory map entirely. That is a host
/// failure, not a guest trap: the caller is expected to stop the simulation.
/// Guest-visible faults (misalignment) are checked by the CPU before the
/// access reaches the bus.
pub trait Bus {
    /// Read `len` bytes (1, 2 or 4) from the given physical address.
    fn read(&mut self, addr: u32, len: usize) -> Result<u32, String>;

    /// Write the low `len` bytes (1, 2 or 4) of `value` to the given
    /// physical address.
    fn write(&mut self, addr: u32, len: usize, value: u32) -> Result<(), String>;
}

/// A flat memory block for tests: `size` bytes starting at `base`.
///
/// No MMIO, no side effects. Out-of-range accesses report the address the
/// way the real machine bus does.
pub struct SimpleBus {
    base: u32,
    mem: Vec<u8>,
}

impl SimpleBus {
    /// Create a bus with 64 KiB of memory at the RV32 reset vector.
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(0x8000_0000, 0x1_0000)
    }

    /// Create a bus with `size` bytes of memory starting at `base`.
    #[must_use]
    pub fn with_size(base: u32, size: usize) -> Self {
        Self {
            base,
            mem: vec![0; size],
        }
    }

    /// Copy `bytes` into memory starting at the given guest address.
    ///
    /// # Panics
    ///
    /// Panics if the range falls outside the memory block.
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        let offset = (addr - self.base) as usize;
        self.mem[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Copy little-endian words into memory starting at the given address.
    ///
    /// Convenient for writing test programs as instruction words.
    pub fn load_words(&mut self, addr: u32, words: &[u32]) {
        for (i, w) in words.iter().enumerate() {
            self.load(addr + (i as u32) * 4, &w.to_le_bytes());
        }
    }

    fn offset(&self, addr: u32, len: usize) -> Result<usize, String> {
        let offset = addr.wrapping_sub(self.base) as usize;
        if addr < self.base || offset + len > self.mem.len() {
            return Err(format!("address {addr:#010x} is outside the memory map"));
        }
        Ok(offset)
    }
}

impl Default for SimpleBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimpleBus {
    fn read(&mut self, addr: u32, len: usize) -> Result<u32, String> {
        let offset = self.offset(addr, len)?;
        let mut value = 0u32;
        for i in (0..len).rev() {
            value = (value << 8) | u32::from(self.mem[offset + i]);
        }
        Ok(value)
    }

    fn write(&mut self, addr: u32, len: usize, value: u32) -> Result<(), String> {
        let offset = self.offset(addr, len)?;
        for i in 0..len {
            self.mem[offset + i] = (value >> (8 * i)) as u8;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_round_trip() {
        let mut bus = SimpleBus::new();
        bus.write(0x8000_0000, 4, 0xdead_beef).expect("write");
        assert_eq!(bus.read(0x8000_0000, 4).expect("read"), 0xdead_beef);
        assert_eq!(bus.read(0x8000_0000, 1).expect("read"), 0xef);
        assert_eq!(bus.read(0x8000_0001, 2).expect("read"), 0xadbe);
    }

    #[test]
    fn load_places_bytes() {
        let mut bus = SimpleBus::new();
        bus.load(0x8000_0010, &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(bus.read(0x8000_0010, 4).expect("read"), 0x0403_0201);
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut bus = SimpleBus::with_size(0x8000_0000, 0x100);
        assert!(bus.read(0x8000_0100, 1).is_err());
        assert!(bus.read(0x7fff_ffff, 1).is_err());
        assert!(bus.write(0x8000_00fe, 4, 0).is_err());
    }
}
