//! RV32 disassembly.
//!
//! A pure function from `(pc, instruction bytes)` to a mnemonic string.
//! The format follows the usual RISC-V assembly conventions: a tab between
//! mnemonic and operands, `offset(base)` addressing for loads, stores and
//! `jalr`, and absolute hex targets for jumps and branches (which is why
//! the PC is an input).

use crate::csr::CsrFile;
use crate::decode::{AluOp, BranchOp, CsrOp, CsrSrc, Inst, LoadOp, StoreOp, decode};
use crate::registers::Registers;

/// Disassemble one instruction. `None` if the bytes are not a full word or
/// decode to no known pattern.
#[must_use]
pub fn disassemble(pc: u32, bytes: &[u8]) -> Option<String> {
    if bytes.len() != 4 {
        return None;
    }
    let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let inst = decode(word)?;

    let r = Registers::name;
    let text = match inst {
        Inst::Lui { rd, imm } => format!("lui\t{}, {:#x}", r(rd as usize), imm >> 12),
        Inst::Auipc { rd, imm } => format!("auipc\t{}, {:#x}", r(rd as usize), imm >> 12),
        Inst::Jal { rd, imm } => format!(
            "jal\t{}, {:#x}",
            r(rd as usize),
            pc.wrapping_add(imm as u32)
        ),
        Inst::Jalr { rd, rs1, imm } => {
            format!("jalr\t{}, {}({})", r(rd as usize), imm, r(rs1 as usize))
        }
        Inst::Branch { op, rs1, rs2, imm } => {
            let mnemonic = match op {
                BranchOp::Beq => "beq",
                BranchOp::Bne => "bne",
                BranchOp::Blt => "blt",
                BranchOp::Bge => "bge",
                BranchOp::Bltu => "bltu",
                BranchOp::Bgeu => "bgeu",
            };
            format!(
                "{mnemonic}\t{}, {}, {:#x}",
                r(rs1 as usize),
                r(rs2 as usize),
                pc.wrapping_add(imm as u32)
            )
        }
        Inst::Load { op, rd, rs1, imm } => {
            let mnemonic = match op {
                LoadOp::Lb => "lb",
                LoadOp::Lh => "lh",
                LoadOp::Lw => "lw",
                LoadOp::Lbu => "lbu",
                LoadOp::Lhu => "lhu",
            };
            format!("{mnemonic}\t{}, {}({})", r(rd as usize), imm, r(rs1 as usize))
        }
        Inst::Store { op, rs1, rs2, imm } => {
            let mnemonic = match op {
                StoreOp::Sb => "sb",
                StoreOp::Sh => "sh",
                StoreOp::Sw => "sw",
            };
            format!(
                "{mnemonic}\t{}, {}({})",
                r(rs2 as usize),
                imm,
                r(rs1 as usize)
            )
        }
        Inst::OpImm { op, rd, rs1, imm } => {
            let mnemonic = match op {
                AluOp::Add => "addi",
                AluOp::Slt => "slti",
                AluOp::Sltu => "sltiu",
                AluOp::Xor => "xori",
                AluOp::Or => "ori",
                AluOp::And => "andi",
                AluOp::Sll => "slli",
                AluOp::Srl => "srli",
                AluOp::Sra => "srai",
                // Remaining ALU ops have no immediate encoding.
                _ => return None,
            };
            format!(
                "{mnemonic}\t{}, {}, {imm}",
                r(rd as usize),
                r(rs1 as usize)
            )
        }
        Inst::Op { op, rd, rs1, rs2 } => {
            let mnemonic = match op {
                AluOp::Add => "add",
                AluOp::Sub => "sub",
                AluOp::Sll => "sll",
                AluOp::Slt => "slt",
                AluOp::Sltu => "sltu",
                AluOp::Xor => "xor",
                AluOp::Srl => "srl",
                AluOp::Sra => "sra",
                AluOp::Or => "or",
                AluOp::And => "and",
                AluOp::Mul => "mul",
                AluOp::Mulh => "mulh",
                AluOp::Mulhsu => "mulhsu",
                AluOp::Mulhu => "mulhu",
                AluOp::Div => "div",
                AluOp::Divu => "divu",
                AluOp::Rem => "rem",
                AluOp::Remu => "remu",
            };
            format!(
                "{mnemonic}\t{}, {}, {}",
                r(rd as usize),
                r(rs1 as usize),
                r(rs2 as usize)
            )
        }
        Inst::Fence => "fence".to_string(),
        Inst::Ecall => "ecall".to_string(),
        Inst::Ebreak => "ebreak".to_string(),
        Inst::Mret => "mret".to_string(),
        Inst::Csr { op, rd, csr, src } => {
            let csr_name = match CsrFile::name(csr) {
                Some(name) => name.to_string(),
                None => format!("{csr:#x}"),
            };
            let (mnemonic, operand) = match (op, src) {
                (CsrOp::Rw, CsrSrc::Reg(s)) => ("csrrw", r(s as usize).to_string()),
                (CsrOp::Rs, CsrSrc::Reg(s)) => ("csrrs", r(s as usize).to_string()),
                (CsrOp::Rc, CsrSrc::Reg(s)) => ("csrrc", r(s as usize).to_string()),
                (CsrOp::Rw, CsrSrc::Imm(z)) => ("csrrwi", z.to_string()),
                (CsrOp::Rs, CsrSrc::Imm(z)) => ("csrrsi", z.to_string()),
                (CsrOp::Rc, CsrSrc::Imm(z)) => ("csrrci", z.to_string()),
            };
            format!("{mnemonic}\t{}, {csr_name}, {operand}", r(rd as usize))
        }
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dis(word: u32) -> String {
        disassemble(0x8000_0000, &word.to_le_bytes()).expect("disassembles")
    }

    #[test]
    fn arithmetic() {
        assert_eq!(dis(0x0050_0093), "addi\tra, $0, 5");
        assert_eq!(dis(0x0020_81b3), "add\tgp, ra, sp");
        assert_eq!(dis(0xff01_0113), "addi\tsp, sp, -16");
    }

    #[test]
    fn upper_immediates() {
        assert_eq!(dis(0x8000_0537), "lui\ta0, 0x80000");
        assert_eq!(dis(0x0000_0297), "auipc\tt0, 0x0");
    }

    #[test]
    fn jumps_use_absolute_targets() {
        assert_eq!(dis(0x0080_00ef), "jal\tra, 0x80000008");
        assert_eq!(dis(0x0000_8067), "jalr\t$0, 0(ra)");
    }

    #[test]
    fn branches_use_absolute_targets() {
        assert_eq!(dis(0xfe00_0ee3), "beq\t$0, $0, 0x7ffffffc");
    }

    #[test]
    fn loads_and_stores() {
        assert_eq!(dis(0x0041_2503), "lw\ta0, 4(sp)");
        assert_eq!(dis(0xfea1_2e23), "sw\ta0, -4(sp)");
    }

    #[test]
    fn system_instructions() {
        assert_eq!(dis(0x0000_0073), "ecall");
        assert_eq!(dis(0x0010_0073), "ebreak");
        assert_eq!(dis(0x3020_0073), "mret");
        assert_eq!(dis(0x3052_9573), "csrrw\ta0, mtvec, t0");
        assert_eq!(dis(0x3051_e573), "csrrsi\ta0, mtvec, 3");
    }

    #[test]
    fn rejects_short_or_unknown_input() {
        assert_eq!(disassemble(0, &[0x73]), None);
        assert_eq!(disassemble(0, &0u32.to_le_bytes()), None);
    }
}
