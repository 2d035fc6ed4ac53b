//! RV32 instruction decode.
//!
//! Decodes a 32-bit instruction word into [`Inst`] by matching on the
//! extracted `(opcode, funct3, funct7)` fields. The patterns are mutually
//! exclusive; the first (only) match wins. Anything that matches no pattern
//! decodes to `None`, which the executor turns into an illegal-instruction
//! trap.
//!
//! Immediates are decoded bit-for-bit per the five RV32 formats (I/S/B/U/J)
//! with sign extension.

/// Branch comparison selector (funct3 of the BRANCH opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

/// Load width/sign selector (funct3 of the LOAD opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOp {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

/// Store width selector (funct3 of the STORE opcode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Sb,
    Sh,
    Sw,
}

/// Integer ALU operation, shared by the OP and OP-IMM encodings.
/// The multiply/divide group comes from the M extension (funct7 = 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

/// CSR read-modify-write flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrOp {
    Rw,
    Rs,
    Rc,
}

/// Source operand of a CSR instruction: a register or a 5-bit zimm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrSrc {
    Reg(u8),
    Imm(u8),
}

/// A decoded instruction with its operand fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Lui { rd: u8, imm: u32 },
    Auipc { rd: u8, imm: u32 },
    Jal { rd: u8, imm: i32 },
    Jalr { rd: u8, rs1: u8, imm: i32 },
    Branch { op: BranchOp, rs1: u8, rs2: u8, imm: i32 },
    Load { op: LoadOp, rd: u8, rs1: u8, imm: i32 },
    Store { op: StoreOp, rs1: u8, rs2: u8, imm: i32 },
    OpImm { op: AluOp, rd: u8, rs1: u8, imm: i32 },
    Op { op: AluOp, rd: u8, rs1: u8, rs2: u8 },
    Fence,
    Ecall,
    Ebreak,
    Mret,
    Csr { op: CsrOp, rd: u8, csr: u16, src: CsrSrc },
}

const fn rd(inst: u32) -> u8 {
    ((inst >> 7) & 0x1f) as u8
}

const fn rs1(inst: u32) -> u8 {
    ((inst >> 15) & 0x1f) as u8
}

const fn rs2(inst: u32) -> u8 {
    ((inst >> 20) & 0x1f) as u8
}

const fn funct3(inst: u32) -> u32 {
    (inst >> 12) & 0x7
}

const fn funct7(inst: u32) -> u32 {
    inst >> 25
}

/// I-type: imm[11:0] = inst[31:20].
const fn imm_i(inst: u32) -> i32 {
    (inst as i32) >> 20
}

/// S-type: imm[11:5] = inst[31:25], imm[4:0] = inst[11:7].
const fn imm_s(inst: u32) -> i32 {
    (((inst & 0xfe00_0000) as i32) >> 20) | (((inst >> 7) & 0x1f) as i32)
}

/// B-type: imm[12|10:5] = inst[31|30:25], imm[4:1|11] = inst[11:8|7].
const fn imm_b(inst: u32) -> i32 {
    (((inst & 0x8000_0000) as i32) >> 19)
        | ((((inst >> 25) & 0x3f) << 5) as i32)
        | ((((inst >> 8) & 0xf) << 1) as i32)
        | ((((inst >> 7) & 0x1) << 11) as i32)
}

/// U-type: imm[31:12] = inst[31:12], low 12 bits zero.
const fn imm_u(inst: u32) -> u32 {
    inst & 0xffff_f000
}

/// J-type: imm[20|10:1|11|19:12] = inst[31|30:21|20|19:12].
const fn imm_j(inst: u32) -> i32 {
    (((inst & 0x8000_0000) as i32) >> 11)
        | ((((inst >> 21) & 0x3ff) << 1) as i32)
        | ((((inst >> 20) & 0x1) << 11) as i32)
        | ((inst & 0x000f_f000) as i32)
}

/// Decode one instruction word. `None` means no pattern matched.
#[must_use]
pub fn decode(inst: u32) -> Option<Inst> {
    match inst & 0x7f {
        0x37 => Some(Inst::Lui {
            rd: rd(inst),
            imm: imm_u(inst),
        }),
        0x17 => Some(Inst::Auipc {
            rd: rd(inst),
            imm: imm_u(inst),
        }),
        0x6f => Some(Inst::Jal {
            rd: rd(inst),
            imm: imm_j(inst),
        }),
        0x67 if funct3(inst) == 0 => Some(Inst::Jalr {
            rd: rd(inst),
            rs1: rs1(inst),
            imm: imm_i(inst),
        }),
        0x63 => {
            let op = match funct3(inst) {
                0 => BranchOp::Beq,
                1 => BranchOp::Bne,
                4 => BranchOp::Blt,
                5 => BranchOp::Bge,
                6 => BranchOp::Bltu,
                7 => BranchOp::Bgeu,
                _ => return None,
            };
            Some(Inst::Branch {
                op,
                rs1: rs1(inst),
                rs2: rs2(inst),
                imm: imm_b(inst),
            })
        }
        0x03 => {
            let op = match funct3(inst) {
                0 => LoadOp::Lb,
                1 => LoadOp::Lh,
                2 => LoadOp::Lw,
                4 => LoadOp::Lbu,
                5 => LoadOp::Lhu,
                _ => return None,
            };
            Some(Inst::Load {
                op,
                rd: rd(inst),
                rs1: rs1(inst),
                imm: imm_i(inst),
            })
        }
        0x23 => {
            let op = match funct3(inst) {
                0 => StoreOp::Sb,
                1 => StoreOp::Sh,
                2 => StoreOp::Sw,
                _ => return None,
            };
            Some(Inst::Store {
                op,
                rs1: rs1(inst),
                rs2: rs2(inst),
                imm: imm_s(inst),
            })
        }
        0x13 => {
            // Shifts carry a funct7-like field that must be valid; the shift
            // amount is the rs2 field.
            let op = match (funct3(inst), funct7(inst)) {
                (0, _) => AluOp::Add,
                (2, _) => AluOp::Slt,
                (3, _) => AluOp::Sltu,
                (4, _) => AluOp::Xor,
                (6, _) => AluOp::Or,
                (7, _) => AluOp::And,
                (1, 0x00) => AluOp::Sll,
                (5, 0x00) => AluOp::Srl,
                (5, 0x20) => AluOp::Sra,
                _ => return None,
            };
            let imm = match op {
                AluOp::Sll | AluOp::Srl | AluOp::Sra => i32::from(rs2(inst)),
                _ => imm_i(inst),
            };
            Some(Inst::OpImm {
                op,
                rd: rd(inst),
                rs1: rs1(inst),
                imm,
            })
        }
        0x33 => {
            let op = match (funct7(inst), funct3(inst)) {
                (0x00, 0) => AluOp::Add,
                (0x20, 0) => AluOp::Sub,
                (0x00, 1) => AluOp::Sll,
                (0x00, 2) => AluOp::Slt,
                (0x00, 3) => AluOp::Sltu,
                (0x00, 4) => AluOp::Xor,
                (0x00, 5) => AluOp::Srl,
                (0x20, 5) => AluOp::Sra,
                (0x00, 6) => AluOp::Or,
                (0x00, 7) => AluOp::And,
                (0x01, 0) => AluOp::Mul,
                (0x01, 1) => AluOp::Mulh,
                (0x01, 2) => AluOp::Mulhsu,
                (0x01, 3) => AluOp::Mulhu,
                (0x01, 4) => AluOp::Div,
                (0x01, 5) => AluOp::Divu,
                (0x01, 6) => AluOp::Rem,
                (0x01, 7) => AluOp::Remu,
                _ => return None,
            };
            Some(Inst::Op {
                op,
                rd: rd(inst),
                rs1: rs1(inst),
                rs2: rs2(inst),
            })
        }
        // FENCE and FENCE.I: memory ordering is trivially satisfied by an
        // in-order single-hart model, so both are no-ops.
        0x0f => Some(Inst::Fence),
        0x73 => match funct3(inst) {
            0 => match inst {
                0x0000_0073 => Some(Inst::Ecall),
                0x0010_0073 => Some(Inst::Ebreak),
                0x3020_0073 => Some(Inst::Mret),
                _ => None,
            },
            f3 @ (1..=3 | 5..=7) => {
                let op = match f3 & 0x3 {
                    1 => CsrOp::Rw,
                    2 => CsrOp::Rs,
                    _ => CsrOp::Rc,
                };
                let src = if f3 >= 5 {
                    CsrSrc::Imm(rs1(inst))
                } else {
                    CsrSrc::Reg(rs1(inst))
                };
                Some(Inst::Csr {
                    op,
                    rd: rd(inst),
                    csr: (inst >> 20) as u16,
                    src,
                })
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_addi() {
        // addi x1, x0, 5
        let inst = decode(0x0050_0093).expect("decodes");
        assert_eq!(
            inst,
            Inst::OpImm {
                op: AluOp::Add,
                rd: 1,
                rs1: 0,
                imm: 5
            }
        );
    }

    #[test]
    fn decode_negative_i_immediate() {
        // addi sp, sp, -16
        let inst = decode(0xff01_0113).expect("decodes");
        assert_eq!(
            inst,
            Inst::OpImm {
                op: AluOp::Add,
                rd: 2,
                rs1: 2,
                imm: -16
            }
        );
    }

    #[test]
    fn decode_add() {
        // add x3, x1, x2
        let inst = decode(0x0020_81b3).expect("decodes");
        assert_eq!(
            inst,
            Inst::Op {
                op: AluOp::Add,
                rd: 3,
                rs1: 1,
                rs2: 2
            }
        );
    }

    #[test]
    fn decode_lui_auipc() {
        // lui a0, 0x80000
        assert_eq!(
            decode(0x8000_0537).expect("decodes"),
            Inst::Lui {
                rd: 10,
                imm: 0x8000_0000
            }
        );
        // auipc t0, 0
        assert_eq!(
            decode(0x0000_0297).expect("decodes"),
            Inst::Auipc { rd: 5, imm: 0 }
        );
    }

    #[test]
    fn decode_branch_immediates() {
        // beq x0, x0, -4 (a tight loop back one instruction)
        let inst = decode(0xfe00_0ee3).expect("decodes");
        assert_eq!(
            inst,
            Inst::Branch {
                op: BranchOp::Beq,
                rs1: 0,
                rs2: 0,
                imm: -4
            }
        );
        // bne x1, x2, 8
        let inst = decode(0x0020_9463).expect("decodes");
        assert_eq!(
            inst,
            Inst::Branch {
                op: BranchOp::Bne,
                rs1: 1,
                rs2: 2,
                imm: 8
            }
        );
    }

    #[test]
    fn decode_jal_immediate() {
        // jal ra, 8
        let inst = decode(0x0080_00ef).expect("decodes");
        assert_eq!(inst, Inst::Jal { rd: 1, imm: 8 });
        // jal x0, -8
        let inst = decode(0xff9f_f06f).expect("decodes");
        assert_eq!(inst, Inst::Jal { rd: 0, imm: -8 });
    }

    #[test]
    fn decode_loads_and_stores() {
        // lw a0, 4(sp)
        assert_eq!(
            decode(0x0041_2503).expect("decodes"),
            Inst::Load {
                op: LoadOp::Lw,
                rd: 10,
                rs1: 2,
                imm: 4
            }
        );
        // sw a0, -4(sp)
        assert_eq!(
            decode(0xfea1_2e23).expect("decodes"),
            Inst::Store {
                op: StoreOp::Sw,
                rs1: 2,
                rs2: 10,
                imm: -4
            }
        );
    }

    #[test]
    fn decode_shifts() {
        // slli a0, a0, 2
        assert_eq!(
            decode(0x0025_1513).expect("decodes"),
            Inst::OpImm {
                op: AluOp::Sll,
                rd: 10,
                rs1: 10,
                imm: 2
            }
        );
        // srai a0, a0, 3
        assert_eq!(
            decode(0x4035_5513).expect("decodes"),
            Inst::OpImm {
                op: AluOp::Sra,
                rd: 10,
                rs1: 10,
                imm: 3
            }
        );
        // srli with a bad funct7 is not a valid encoding
        assert_eq!(decode(0x7ff5_5513), None);
    }

    #[test]
    fn decode_system() {
        assert_eq!(decode(0x0000_0073).expect("decodes"), Inst::Ecall);
        assert_eq!(decode(0x0010_0073).expect("decodes"), Inst::Ebreak);
        assert_eq!(decode(0x3020_0073).expect("decodes"), Inst::Mret);
        // csrrw a0, mtvec, t0
        assert_eq!(
            decode(0x3052_9573).expect("decodes"),
            Inst::Csr {
                op: CsrOp::Rw,
                rd: 10,
                csr: 0x305,
                src: CsrSrc::Reg(5)
            }
        );
        // csrrsi a0, mtvec, 3
        assert_eq!(
            decode(0x3051_e573).expect("decodes"),
            Inst::Csr {
                op: CsrOp::Rs,
                rd: 10,
                csr: 0x305,
                src: CsrSrc::Imm(3)
            }
        );
    }

    #[test]
    fn decode_mul_div() {
        // mul a0, a1, a2
        assert_eq!(
            decode(0x02c5_8533).expect("decodes"),
            Inst::Op {
                op: AluOp::Mul,
                rd: 10,
                rs1: 11,
                rs2: 12
            }
        );
        // divu a0, a1, a2
        assert_eq!(
            decode(0x02c5_d533).expect("decodes"),
            Inst::Op {
                op: AluOp::Divu,
                rd: 10,
                rs1: 11,
                rs2: 12
            }
        );
    }

    #[test]
    fn garbage_does_not_decode() {
        assert_eq!(decode(0x0000_0000), None);
        assert_eq!(decode(0xffff_ffff), None);
        assert_eq!(decode(0xdead_beef), None);
    }
}
