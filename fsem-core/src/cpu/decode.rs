//! Opcode decoding.
//!
//! A 6502 opcode is laid out as `aaabbbcc`: `cc` picks the instruction group,
//! `bbb` the addressing mode within the group and `aaa` the operation. The
//! single-byte instructions sit in the `bbb` columns that have no memory
//! operand (0, 2, 4 and 6 of group 0, 2 and 6 of group 2).

/// Operand addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    /// `(zp,X)`
    IndexedIndirect,
    /// `(zp),Y`
    IndirectIndexed,
    /// `JMP (abs)`
    Indirect,
    Relative,
}

/// Flag tested by a conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Negative,
    Overflow,
    Carry,
    Zero,
}

/// Operation performed by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Adc,
    Sbc,
    And,
    Ora,
    Eor,
    Bit,
    Asl,
    Lsr,
    Rol,
    Ror,
    Cmp,
    Cpx,
    Cpy,
    Inc,
    Dec,
    Inx,
    Iny,
    Dex,
    Dey,
    Jmp,
    Jsr,
    Rts,
    Rti,
    Brk,
    /// Taken when the tested flag equals `when_set`.
    Branch { flag: Condition, when_set: bool },
    Pha,
    Pla,
    Php,
    Plp,
    Tax,
    Txa,
    Tay,
    Tya,
    Tsx,
    Txs,
    Clc,
    Sec,
    Clv,
    Cli,
    Sei,
    Cld,
    Sed,
    Nop,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub operation: Operation,
    pub mode: Mode,
}

impl Instruction {
    const fn new(operation: Operation, mode: Mode) -> Self {
        Self { operation, mode }
    }
}

/// Opcode of RTS, used for the implicit return out of the trap region.
pub const RTS: u8 = 0x60;

/// Decode an opcode. Returns `None` for anything outside the documented
/// NMOS instruction set.
pub fn decode(opcode: u8) -> Option<Instruction> {
    let aaa = opcode >> 5;
    let bbb = (opcode >> 2) & 0x07;
    match opcode & 0x03 {
        0 => decode_group0(aaa, bbb),
        1 => decode_group1(aaa, bbb),
        2 => decode_group2(aaa, bbb),
        _ => None,
    }
}

fn decode_group0(aaa: u8, bbb: u8) -> Option<Instruction> {
    use Operation::*;

    match bbb {
        4 => {
            let flag = match aaa >> 1 {
                0 => Condition::Negative,
                1 => Condition::Overflow,
                2 => Condition::Carry,
                _ => Condition::Zero,
            };
            let when_set = aaa & 1 == 1;
            return Some(Instruction::new(Branch { flag, when_set }, Mode::Relative));
        }
        0 if aaa < 4 => {
            let inst = match aaa {
                0 => Instruction::new(Brk, Mode::Implied),
                1 => Instruction::new(Jsr, Mode::Absolute),
                2 => Instruction::new(Rti, Mode::Implied),
                _ => Instruction::new(Rts, Mode::Implied),
            };
            return Some(inst);
        }
        2 => {
            let op = [Php, Plp, Pha, Pla, Dey, Tay, Iny, Inx][aaa as usize];
            return Some(Instruction::new(op, Mode::Implied));
        }
        6 => {
            let op = [Clc, Sec, Cli, Sei, Tya, Clv, Cld, Sed][aaa as usize];
            return Some(Instruction::new(op, Mode::Implied));
        }
        _ => {}
    }

    let op = match aaa {
        1 => Bit,
        2 | 3 => Jmp,
        4 => Sty,
        5 => Ldy,
        6 => Cpy,
        7 => Cpx,
        _ => return None,
    };
    let mode = match (bbb, aaa) {
        (0, 5..=7) => Mode::Immediate,
        (1, 1 | 4..=7) => Mode::ZeroPage,
        (3, 3) => Mode::Indirect,
        (3, _) => Mode::Absolute,
        (5, 4 | 5) => Mode::ZeroPageX,
        (7, 5) => Mode::AbsoluteX,
        _ => return None,
    };
    Some(Instruction::new(op, mode))
}

fn decode_group1(aaa: u8, bbb: u8) -> Option<Instruction> {
    use Operation::*;

    let op = [Ora, And, Eor, Adc, Sta, Lda, Cmp, Sbc][aaa as usize];
    let mode = [
        Mode::IndexedIndirect,
        Mode::ZeroPage,
        Mode::Immediate,
        Mode::Absolute,
        Mode::IndirectIndexed,
        Mode::ZeroPageX,
        Mode::AbsoluteY,
        Mode::AbsoluteX,
    ][bbb as usize];
    if op == Sta && mode == Mode::Immediate {
        return None;
    }
    Some(Instruction::new(op, mode))
}

fn decode_group2(aaa: u8, bbb: u8) -> Option<Instruction> {
    use Operation::*;

    match (bbb, aaa) {
        (2, 4..=7) => {
            let op = [Txa, Tax, Dex, Nop][(aaa - 4) as usize];
            return Some(Instruction::new(op, Mode::Implied));
        }
        (6, 4) => return Some(Instruction::new(Txs, Mode::Implied)),
        (6, 5) => return Some(Instruction::new(Tsx, Mode::Implied)),
        _ => {}
    }

    let op = [Asl, Rol, Lsr, Ror, Stx, Ldx, Dec, Inc][aaa as usize];
    let indexes_y = matches!(op, Stx | Ldx);
    let mode = match bbb {
        0 if op == Ldx => Mode::Immediate,
        1 => Mode::ZeroPage,
        2 if aaa < 4 => Mode::Accumulator,
        3 => Mode::Absolute,
        5 if indexes_y => Mode::ZeroPageY,
        5 => Mode::ZeroPageX,
        7 if op == Ldx => Mode::AbsoluteY,
        7 if op != Stx => Mode::AbsoluteX,
        _ => return None,
    };
    Some(Instruction::new(op, mode))
}
