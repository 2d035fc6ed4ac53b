//! Instruction execution.
//!
//! [`Rv32Cpu::step`] fetches, decodes and executes exactly one instruction,
//! then commits the dynamic next PC. A `Result::Err` is a *host* failure
//! (the access left the memory map, or an instruction named a CSR the model
//! does not have); guest-architectural failures become traps and the step
//! still succeeds.

use sim_core::Bus;

use crate::cpu::Rv32Cpu;
use crate::decode::{AluOp, BranchOp, CsrSrc, CsrOp, Inst, LoadOp, StoreOp, decode};
use crate::trap::cause;

/// What a retired instruction meant to the tracers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Nothing of note.
    None,
    /// A function call (`jal ra, ...` or a linking `jalr`).
    Call { target: u32 },
    /// A function return (`jalr x0, 0(ra)`).
    Return,
    /// A trap was entered (exception raised); the instruction did not retire
    /// its normal effect.
    Trap { cause: u32, epc: u32, handler: u32 },
    /// `mret` resumed at `epc`.
    TrapReturn { epc: u32 },
    /// `ebreak` ended the simulation with the guest's exit code (`a0`).
    Halt { code: u32 },
}

/// Per-step record handed back to the machine: where the instruction was,
/// what it was, where control went, and what the tracers should log.
#[derive(Debug, Clone, Copy)]
pub struct StepInfo {
    /// Address of this instruction.
    pub pc: u32,
    /// Static next PC (`pc + 4`).
    pub snpc: u32,
    /// Dynamic next PC: the value `pc` now holds.
    pub dnpc: u32,
    /// Raw instruction word, if the fetch happened.
    pub inst: Option<u32>,
    pub event: Event,
}

impl Rv32Cpu {
    /// Fetch, decode and execute one instruction at the current PC.
    ///
    /// On return, `pc` has been advanced to the dynamic next PC (fall
    /// through, branch/jump target, or trap handler). This method is the
    /// only writer of `pc`.
    pub fn step<B: Bus>(&mut self, bus: &mut B) -> Result<StepInfo, String> {
        let pc = self.regs.pc;
        let snpc = pc.wrapping_add(4);

        // A misaligned PC never reaches the bus.
        if pc % 4 != 0 {
            let handler = self.raise(cause::INST_ADDR_MISALIGNED, pc, pc);
            self.regs.pc = handler;
            return Ok(StepInfo {
                pc,
                snpc,
                dnpc: handler,
                inst: None,
                event: Event::Trap {
                    cause: cause::INST_ADDR_MISALIGNED,
                    epc: pc,
                    handler,
                },
            });
        }

        let word = bus.read(pc, 4)?;
        let mut dnpc = snpc;
        let mut event = Event::None;

        match decode(word) {
            None => {
                let handler = self.raise(cause::ILLEGAL_INSTRUCTION, pc, word);
                dnpc = handler;
                event = Event::Trap {
                    cause: cause::ILLEGAL_INSTRUCTION,
                    epc: pc,
                    handler,
                };
            }
            Some(inst) => match inst {
                Inst::Lui { rd, imm } => self.regs.write(rd, imm),
                Inst::Auipc { rd, imm } => self.regs.write(rd, pc.wrapping_add(imm)),
                Inst::Jal { rd, imm } => {
                    let target = pc.wrapping_add(imm as u32);
                    self.regs.write(rd, snpc);
                    dnpc = target;
                    if rd == 1 {
                        event = Event::Call { target };
                    }
                }
                Inst::Jalr { rd, rs1, imm } => {
                    // Read rs1 before the link write: rd may alias rs1.
                    let target = self.regs.read(rs1).wrapping_add(imm as u32) & !1;
                    self.regs.write(rd, snpc);
                    dnpc = target;
                    if rd == 0 && rs1 == 1 && imm == 0 {
                        event = Event::Return;
                    } else if rd != 0 {
                        event = Event::Call { target };
                    }
                }
                Inst::Branch { op, rs1, rs2, imm } => {
                    let a = self.regs.read(rs1);
                    let b = self.regs.read(rs2);
                    let taken = match op {
                        BranchOp::Beq => a == b,
                        BranchOp::Bne => a != b,
                        BranchOp::Blt => (a as i32) < (b as i32),
                        BranchOp::Bge => (a as i32) >= (b as i32),
                        BranchOp::Bltu => a < b,
                        BranchOp::Bgeu => a >= b,
                    };
                    if taken {
                        dnpc = pc.wrapping_add(imm as u32);
                    }
                }
                Inst::Load { op, rd, rs1, imm } => {
                    let addr = self.regs.read(rs1).wrapping_add(imm as u32);
                    let len = match op {
                        LoadOp::Lb | LoadOp::Lbu => 1,
                        LoadOp::Lh | LoadOp::Lhu => 2,
                        LoadOp::Lw => 4,
                    };
                    if addr as usize % len != 0 {
                        // The load does not retire: rd is untouched.
                        let handler = self.raise(cause::LOAD_ADDR_MISALIGNED, pc, addr);
                        dnpc = handler;
                        event = Event::Trap {
                            cause: cause::LOAD_ADDR_MISALIGNED,
                            epc: pc,
                            handler,
                        };
                    } else {
                        let raw = bus.read(addr, len)?;
                        let value = match op {
                            LoadOp::Lb => raw as u8 as i8 as i32 as u32,
                            LoadOp::Lh => raw as u16 as i16 as i32 as u32,
                            LoadOp::Lw | LoadOp::Lbu | LoadOp::Lhu => raw,
                        };
                        self.regs.write(rd, value);
                    }
                }
                Inst::Store { op, rs1, rs2, imm } => {
                    let addr = self.regs.read(rs1).wrapping_add(imm as u32);
                    let len = match op {
                        StoreOp::Sb => 1,
                        StoreOp::Sh => 2,
                        StoreOp::Sw => 4,
                    };
                    if addr as usize % len != 0 {
                        let handler = self.raise(cause::STORE_ADDR_MISALIGNED, pc, addr);
                        dnpc = handler;
                        event = Event::Trap {
                            cause: cause::STORE_ADDR_MISALIGNED,
                            epc: pc,
                            handler,
                        };
                    } else {
                        bus.write(addr, len, self.regs.read(rs2))?;
                    }
                }
                Inst::OpImm { op, rd, rs1, imm } => {
                    let value = alu(op, self.regs.read(rs1), imm as u32);
                    self.regs.write(rd, value);
                }
                Inst::Op { op, rd, rs1, rs2 } => {
                    let value = alu(op, self.regs.read(rs1), self.regs.read(rs2));
                    self.regs.write(rd, value);
                }
                Inst::Fence => {}
                Inst::Ecall => {
                    let handler = self.raise(cause::MACHINE_ECALL, pc, 0);
                    dnpc = handler;
                    event = Event::Trap {
                        cause: cause::MACHINE_ECALL,
                        epc: pc,
                        handler,
                    };
                }
                Inst::Ebreak => {
                    event = Event::Halt {
                        code: self.regs.read(10),
                    };
                }
                Inst::Mret => {
                    let epc = self.return_from_trap();
                    dnpc = epc;
                    event = Event::TrapReturn { epc };
                }
                Inst::Csr { op, rd, csr, src } => {
                    let old = self.csr.read(csr)?;
                    let src_value = match src {
                        CsrSrc::Reg(r) => self.regs.read(r),
                        CsrSrc::Imm(z) => u32::from(z),
                    };
                    // csrrs/csrrc with a zero source read the CSR but must
                    // not write it back.
                    let src_is_zero = matches!(src, CsrSrc::Reg(0) | CsrSrc::Imm(0));
                    let new = match op {
                        CsrOp::Rw => Some(src_value),
                        CsrOp::Rs if src_is_zero => None,
                        CsrOp::Rs => Some(old | src_value),
                        CsrOp::Rc if src_is_zero => None,
                        CsrOp::Rc => Some(old & !src_value),
                    };
                    if let Some(value) = new {
                        self.csr.write(csr, value)?;
                    }
                    self.regs.write(rd, old);
                }
            },
        }

        self.regs.pc = dnpc;
        Ok(StepInfo {
            pc,
            snpc,
            dnpc,
            inst: Some(word),
            event,
        })
    }
}

/// Integer ALU, shared by the register and immediate forms.
///
/// Division follows the RISC-V M conventions: division by zero yields all
/// ones (quotient) or the dividend (remainder); the signed overflow case
/// `INT_MIN / -1` yields `INT_MIN` with remainder 0.
fn alu(op: AluOp, a: u32, b: u32) -> u32 {
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a << (b & 0x1f),
        AluOp::Slt => u32::from((a as i32) < (b as i32)),
        AluOp::Sltu => u32::from(a < b),
        AluOp::Xor => a ^ b,
        AluOp::Srl => a >> (b & 0x1f),
        AluOp::Sra => ((a as i32) >> (b & 0x1f)) as u32,
        AluOp::Or => a | b,
        AluOp::And => a & b,
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Mulh => ((i64::from(a as i32) * i64::from(b as i32)) >> 32) as u32,
        AluOp::Mulhsu => ((i64::from(a as i32) * i64::from(b)) >> 32) as u32,
        AluOp::Mulhu => ((u64::from(a) * u64::from(b)) >> 32) as u32,
        AluOp::Div => {
            if b == 0 {
                u32::MAX
            } else {
                (a as i32).wrapping_div(b as i32) as u32
            }
        }
        AluOp::Divu => {
            if b == 0 {
                u32::MAX
            } else {
                a / b
            }
        }
        AluOp::Rem => {
            if b == 0 {
                a
            } else {
                (a as i32).wrapping_rem(b as i32) as u32
            }
        }
        AluOp::Remu => {
            if b == 0 {
                a
            } else {
                a % b
            }
        }
    }
}
