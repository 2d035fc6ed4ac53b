//! The CPU core object.

use crate::csr::CsrFile;
use crate::registers::Registers;

/// Power-on program counter.
pub const RESET_VECTOR: u32 = 0x8000_0000;

/// RV32 CPU: register file, program counter and CSRs.
///
/// The core is a plain value owned by the machine; several can coexist
/// (tests run many side by side). All stepping goes through
/// [`Rv32Cpu::step`], which is the only writer of `pc`.
pub struct Rv32Cpu {
    pub regs: Registers,
    pub csr: CsrFile,
}

impl Rv32Cpu {
    /// Create a CPU at the reset vector with cleared registers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::new(RESET_VECTOR),
            csr: CsrFile::new(),
        }
    }

    /// Return to the power-on state.
    pub fn reset(&mut self) {
        self.regs = Registers::new(RESET_VECTOR);
        self.csr = CsrFile::new();
    }

    /// Current program counter.
    #[must_use]
    pub fn pc(&self) -> u32 {
        self.regs.pc
    }
}

impl Default for Rv32Cpu {
    fn default() -> Self {
        Self::new()
    }
}
