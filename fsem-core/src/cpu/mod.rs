//! 6502 interpreter.
//!
//! [`Cpu::step`] executes one instruction against a [`Memory`]. Fetching from
//! the trap region (`PC >= 0xF800`) never reads memory: it performs an
//! implicit RTS, which is how a trapped OS call returns to its caller once the
//! bridge has serviced it.

mod decode;
mod registers;

pub use decode::{decode, Condition, Instruction, Mode, Operation, RTS};
pub use registers::{status, Flags, Registers};

use crate::error::HaltReason;
use crate::memory::{vector, Memory, ROM_BASE, STACK_PAGE};

/// Result of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Instruction retired normally.
    Continue,
    /// An RTS (real or implicit) retired.
    Returned,
    /// Execution cannot continue.
    Halt(HaltReason),
}

/// Interpreter state.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    pub regs: Registers,
    /// JSR nesting relative to the point the current run started from.
    call_depth: u32,
}

impl Cpu {
    /// CPU positioned at the entry point of a freshly loaded image.
    pub fn at_entry(pc: u16) -> Self {
        Self {
            regs: Registers::at_entry(pc),
            call_depth: 0,
        }
    }

    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    /// Forget subroutine nesting, making the current frame depth zero.
    pub fn reset_call_depth(&mut self) {
        self.call_depth = 0;
    }

    /// True when the next step will return from a subroutine.
    pub fn at_return(&self, mem: &Memory) -> bool {
        self.regs.pc >= ROM_BASE || mem.read(self.regs.pc) == RTS
    }

    /// Load A and recompute N/Z.
    pub fn load_a(&mut self, value: u8) {
        self.regs.a = self.regs.flags.set_nz(value);
    }

    /// Load X and recompute N/Z.
    pub fn load_x(&mut self, value: u8) {
        self.regs.x = self.regs.flags.set_nz(value);
    }

    /// Drop one return address from the stack.
    ///
    /// Used by OS calls that complete to their caller's caller.
    pub fn discard_return(&mut self) {
        self.regs.sp = self.regs.sp.wrapping_add(2);
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    pub fn push(&mut self, mem: &mut Memory, value: u8) {
        mem.write(STACK_PAGE | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    pub fn pull(&mut self, mem: &Memory) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        mem.read(STACK_PAGE | self.regs.sp as u16)
    }

    fn push_word(&mut self, mem: &mut Memory, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(mem, hi);
        self.push(mem, lo);
    }

    fn pull_word(&mut self, mem: &Memory) -> u16 {
        let lo = self.pull(mem);
        let hi = self.pull(mem);
        u16::from_le_bytes([lo, hi])
    }

    fn fetch(&mut self, mem: &Memory) -> u8 {
        let b = mem.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        b
    }

    fn fetch_word(&mut self, mem: &Memory) -> u16 {
        let lo = self.fetch(mem);
        let hi = self.fetch(mem);
        u16::from_le_bytes([lo, hi])
    }

    fn return_from_subroutine(&mut self, mem: &Memory) {
        self.regs.pc = self.pull_word(mem).wrapping_add(1);
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    /// Execute one instruction.
    pub fn step(&mut self, mem: &mut Memory) -> Step {
        let pc = self.regs.pc;
        if pc >= ROM_BASE {
            self.return_from_subroutine(mem);
            return Step::Returned;
        }

        let opcode = self.fetch(mem);
        match decode(opcode) {
            Some(inst) => self.execute(mem, inst, pc),
            None => Step::Halt(HaltReason::UnknownOpcode { opcode, pc }),
        }
    }

    /// Resolve the address of a memory operand, consuming operand bytes.
    fn effective_address(&mut self, mem: &Memory, mode: Mode) -> u16 {
        let Registers { x, y, .. } = self.regs;
        match mode {
            Mode::ZeroPage => self.fetch(mem) as u16,
            Mode::ZeroPageX => self.fetch(mem).wrapping_add(x) as u16,
            Mode::ZeroPageY => self.fetch(mem).wrapping_add(y) as u16,
            Mode::Absolute | Mode::Indirect => self.fetch_word(mem),
            Mode::AbsoluteX => self.fetch_word(mem).wrapping_add(x as u16),
            Mode::AbsoluteY => self.fetch_word(mem).wrapping_add(y as u16),
            Mode::IndexedIndirect => {
                let zp = self.fetch(mem).wrapping_add(x);
                mem.read_zp_word(zp)
            }
            Mode::IndirectIndexed => {
                let zp = self.fetch(mem);
                mem.read_zp_word(zp).wrapping_add(y as u16)
            }
            Mode::Implied | Mode::Accumulator | Mode::Immediate | Mode::Relative => {
                unreachable!("{mode:?} has no effective address")
            }
        }
    }

    fn read_operand(&mut self, mem: &Memory, mode: Mode) -> u8 {
        match mode {
            Mode::Immediate => self.fetch(mem),
            Mode::Accumulator => self.regs.a,
            _ => {
                let addr = self.effective_address(mem, mode);
                mem.read(addr)
            }
        }
    }

    fn store(&mut self, mem: &mut Memory, mode: Mode, value: u8) {
        let addr = self.effective_address(mem, mode);
        mem.write(addr, value);
    }

    /// Read-modify-write on A or memory; `f` returns the new value.
    fn modify(&mut self, mem: &mut Memory, mode: Mode, f: impl FnOnce(&mut Flags, u8) -> u8) {
        if mode == Mode::Accumulator {
            self.regs.a = f(&mut self.regs.flags, self.regs.a);
        } else {
            let addr = self.effective_address(mem, mode);
            let value = f(&mut self.regs.flags, mem.read(addr));
            mem.write(addr, value);
        }
    }

    /// Binary add with carry. SBC is ADC of the one's complement.
    fn add(&mut self, value: u8) {
        let a = self.regs.a;
        let sum = a as u16 + value as u16 + self.regs.flags.c as u16;
        let result = sum as u8;
        self.regs.flags.c = sum > 0xFF;
        self.regs.flags.v = (a ^ result) & (value ^ result) & 0x80 != 0;
        self.regs.a = self.regs.flags.set_nz(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.regs.flags.set_nz(register.wrapping_sub(value));
        self.regs.flags.c = register >= value;
    }

    fn execute(&mut self, mem: &mut Memory, inst: Instruction, pc: u16) -> Step {
        use Operation::*;

        let mode = inst.mode;
        match inst.operation {
            Lda => {
                let v = self.read_operand(mem, mode);
                self.regs.a = self.regs.flags.set_nz(v);
            }
            Ldx => {
                let v = self.read_operand(mem, mode);
                self.regs.x = self.regs.flags.set_nz(v);
            }
            Ldy => {
                let v = self.read_operand(mem, mode);
                self.regs.y = self.regs.flags.set_nz(v);
            }
            Sta => self.store(mem, mode, self.regs.a),
            Stx => self.store(mem, mode, self.regs.x),
            Sty => self.store(mem, mode, self.regs.y),

            Adc => {
                let v = self.read_operand(mem, mode);
                self.add(v);
            }
            Sbc => {
                let v = self.read_operand(mem, mode);
                self.add(!v);
            }
            And => {
                let v = self.read_operand(mem, mode);
                self.regs.a = self.regs.flags.set_nz(self.regs.a & v);
            }
            Ora => {
                let v = self.read_operand(mem, mode);
                self.regs.a = self.regs.flags.set_nz(self.regs.a | v);
            }
            Eor => {
                let v = self.read_operand(mem, mode);
                self.regs.a = self.regs.flags.set_nz(self.regs.a ^ v);
            }
            Bit => {
                let v = self.read_operand(mem, mode);
                let flags = &mut self.regs.flags;
                flags.z = self.regs.a & v == 0;
                flags.n = v & 0x80 != 0;
                flags.v = v & 0x40 != 0;
            }

            Asl => self.modify(mem, mode, |f, v| {
                f.c = v & 0x80 != 0;
                f.set_nz(v << 1)
            }),
            Rol => self.modify(mem, mode, |f, v| {
                let carry_in = f.c as u8;
                f.c = v & 0x80 != 0;
                f.set_nz((v << 1) | carry_in)
            }),
            Lsr => self.modify(mem, mode, |f, v| {
                f.c = v & 0x01 != 0;
                f.set_nz(v >> 1)
            }),
            Ror => self.modify(mem, mode, |f, v| {
                let carry_in = (f.c as u8) << 7;
                f.c = v & 0x01 != 0;
                f.set_nz((v >> 1) | carry_in)
            }),

            Cmp => {
                let v = self.read_operand(mem, mode);
                self.compare(self.regs.a, v);
            }
            Cpx => {
                let v = self.read_operand(mem, mode);
                self.compare(self.regs.x, v);
            }
            Cpy => {
                let v = self.read_operand(mem, mode);
                self.compare(self.regs.y, v);
            }

            Inc => self.modify(mem, mode, |f, v| f.set_nz(v.wrapping_add(1))),
            Dec => self.modify(mem, mode, |f, v| f.set_nz(v.wrapping_sub(1))),
            Inx => self.regs.x = self.regs.flags.set_nz(self.regs.x.wrapping_add(1)),
            Iny => self.regs.y = self.regs.flags.set_nz(self.regs.y.wrapping_add(1)),
            Dex => self.regs.x = self.regs.flags.set_nz(self.regs.x.wrapping_sub(1)),
            Dey => self.regs.y = self.regs.flags.set_nz(self.regs.y.wrapping_sub(1)),

            Jmp => {
                let target = self.effective_address(mem, mode);
                self.regs.pc = if mode == Mode::Indirect {
                    mem.read_word(target)
                } else {
                    target
                };
            }
            Jsr => {
                let target = self.fetch_word(mem);
                let ret = self.regs.pc.wrapping_sub(1);
                self.push_word(mem, ret);
                self.regs.pc = target;
                self.call_depth = self.call_depth.saturating_add(1);
            }
            Rts => {
                self.return_from_subroutine(mem);
                return Step::Returned;
            }
            Rti => {
                let p = self.pull(mem);
                self.regs.flags = Flags::from_byte(p);
                self.regs.pc = self.pull_word(mem);
            }
            Brk => {
                self.regs.pc = mem.read_word(vector::BRK);
                return Step::Halt(HaltReason::Brk { pc });
            }
            Branch { flag, when_set } => {
                let offset = self.fetch(mem) as i8;
                let flags = self.regs.flags;
                let state = match flag {
                    Condition::Negative => flags.n,
                    Condition::Overflow => flags.v,
                    Condition::Carry => flags.c,
                    Condition::Zero => flags.z,
                };
                if state == when_set {
                    self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
                }
            }

            Pha => self.push(mem, self.regs.a),
            Pla => {
                let v = self.pull(mem);
                self.regs.a = self.regs.flags.set_nz(v);
            }
            Php => self.push(mem, self.regs.flags.to_byte()),
            Plp => {
                let p = self.pull(mem);
                self.regs.flags = Flags::from_byte(p);
            }

            Tax => self.regs.x = self.regs.flags.set_nz(self.regs.a),
            Txa => self.regs.a = self.regs.flags.set_nz(self.regs.x),
            Tay => self.regs.y = self.regs.flags.set_nz(self.regs.a),
            Tya => self.regs.a = self.regs.flags.set_nz(self.regs.y),
            Tsx => self.regs.x = self.regs.flags.set_nz(self.regs.sp),
            Txs => self.regs.sp = self.regs.x,

            Clc => self.regs.flags.c = false,
            Sec => self.regs.flags.c = true,
            Clv => self.regs.flags.v = false,
            Cli | Sei | Cld | Sed | Nop => {}
        }
        Step::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    const ORIGIN: u16 = 0x0400;

    fn cpu_with(program: &[u8]) -> (Cpu, Memory) {
        let mut mem = Memory::new();
        mem.load(ORIGIN, program).unwrap();
        (Cpu::at_entry(ORIGIN), mem)
    }

    /// Run until BRK and return the machine.
    fn run(program: &[u8]) -> (Cpu, Memory) {
        let (mut cpu, mut mem) = cpu_with(program);
        for _ in 0..10_000 {
            if let Step::Halt(reason) = cpu.step(&mut mem) {
                assert!(matches!(reason, HaltReason::Brk { .. }), "{reason}");
                return (cpu, mem);
            }
        }
        panic!("program did not reach BRK");
    }

    #[rstest]
    // a, operand, carry in, result, carry out, overflow
    #[case(0x00, 0x00, false, 0x00, false, false)]
    #[case(0x00, 0x00, true, 0x01, false, false)]
    #[case(0x7F, 0x01, false, 0x80, false, true)]
    #[case(0x7F, 0x01, true, 0x81, false, true)]
    #[case(0xFF, 0x01, false, 0x00, true, false)]
    #[case(0xFF, 0x01, true, 0x01, true, false)]
    #[case(0x80, 0x80, false, 0x00, true, true)]
    fn test_adc_flags(
        #[case] a: u8,
        #[case] operand: u8,
        #[case] carry: bool,
        #[case] result: u8,
        #[case] carry_out: bool,
        #[case] overflow: bool,
    ) {
        let set_carry = if carry { 0x38 } else { 0x18 }; // SEC / CLC
        let (cpu, _) = run(&[set_carry, 0xA9, a, 0x69, operand, 0x00]);
        assert_eq!(cpu.regs.a, result);
        assert_eq!(cpu.regs.flags.c, carry_out);
        assert_eq!(cpu.regs.flags.v, overflow);
        assert_eq!(cpu.regs.flags.z, result == 0);
        assert_eq!(cpu.regs.flags.n, result & 0x80 != 0);
    }

    #[rstest]
    // a, operand, carry in (no borrow when set), result, carry out, overflow
    #[case(0x00, 0x00, true, 0x00, true, false)]
    #[case(0x00, 0x00, false, 0xFF, false, false)]
    #[case(0x00, 0x01, true, 0xFF, false, false)]
    #[case(0x80, 0x01, true, 0x7F, true, true)]
    #[case(0x7F, 0xFF, true, 0x80, false, true)]
    #[case(0xFF, 0x01, false, 0xFD, true, false)]
    fn test_sbc_flags(
        #[case] a: u8,
        #[case] operand: u8,
        #[case] carry: bool,
        #[case] result: u8,
        #[case] carry_out: bool,
        #[case] overflow: bool,
    ) {
        let set_carry = if carry { 0x38 } else { 0x18 };
        let (cpu, _) = run(&[set_carry, 0xA9, a, 0xE9, operand, 0x00]);
        assert_eq!(cpu.regs.a, result);
        assert_eq!(cpu.regs.flags.c, carry_out);
        assert_eq!(cpu.regs.flags.v, overflow);
    }

    #[rstest]
    #[case(0x10, 0x10, true, true)] // equal
    #[case(0x20, 0x10, true, false)] // greater
    #[case(0x10, 0x20, false, false)] // less
    fn test_cmp_is_unsigned(#[case] a: u8, #[case] m: u8, #[case] carry: bool, #[case] zero: bool) {
        let (cpu, _) = run(&[0xA9, a, 0xC9, m, 0x00]);
        assert_eq!(cpu.regs.flags.c, carry);
        assert_eq!(cpu.regs.flags.z, zero);
        assert_eq!(cpu.regs.a, a);
    }

    #[test]
    fn test_shifts_and_rotates_carry() {
        // SEC; LDA #$81; ROL A -> $03, C=1; LSR A -> $01, C=1; ROR A -> $80, C=1
        let (cpu, _) = run(&[0x38, 0xA9, 0x81, 0x2A, 0x4A, 0x6A, 0x00]);
        assert_eq!(cpu.regs.a, 0x80);
        assert!(cpu.regs.flags.c);
        assert!(cpu.regs.flags.n);

        // ASL on memory: LDA #$C0; STA $10; ASL $10
        let (cpu, mem) = run(&[0xA9, 0xC0, 0x85, 0x10, 0x06, 0x10, 0x00]);
        assert_eq!(mem.read(0x10), 0x80);
        assert!(cpu.regs.flags.c);
    }

    #[test]
    fn test_jsr_rts_and_call_depth() {
        // JSR $0410; LDX #$07; BRK ... $0410: LDA #$42; RTS
        let mut program = vec![0x20, 0x10, 0x04, 0xA2, 0x07, 0x00];
        program.resize(0x10, 0xEA);
        program.extend_from_slice(&[0xA9, 0x42, 0x60]);
        let (cpu, _) = run(&program);
        assert_eq!(cpu.regs.a, 0x42);
        assert_eq!(cpu.regs.x, 0x07);
        assert_eq!(cpu.regs.sp, 0xFF);
        assert_eq!(cpu.call_depth(), 0);
    }

    #[test]
    fn test_branch_polarity() {
        // LDX #3; loop: DEX; BNE loop; STX $30; BRK
        let (cpu, mem) = run(&[0xA2, 0x03, 0xCA, 0xD0, 0xFD, 0x86, 0x30, 0x00]);
        assert_eq!(cpu.regs.x, 0);
        assert_eq!(mem.read(0x30), 0);

        // LDA #$80; BPL +2; LDA #$01; BRK  -> branch not taken
        let (cpu, _) = run(&[0xA9, 0x80, 0x10, 0x02, 0xA9, 0x01, 0x00]);
        assert_eq!(cpu.regs.a, 0x01);
    }

    #[test]
    fn test_indirect_addressing() {
        // Pointer at $70 -> $1234; LDY #2; LDA #$5A; STA ($70),Y; LDX #4; LDA ($6C,X)
        let prog = [
            0xA9, 0x34, 0x85, 0x70, 0xA9, 0x12, 0x85, 0x71, // set pointer
            0xA0, 0x02, 0xA9, 0x5A, 0x91, 0x70, // STA ($70),Y
            0xA9, 0x00, 0xA2, 0x04, 0xA1, 0x6C, // LDA ($6C,X)
            0x00,
        ];
        let (cpu, mem) = run(&prog);
        assert_eq!(mem.read(0x1236), 0x5A);
        assert_eq!(cpu.regs.a, mem.read(0x1234));
    }

    #[test]
    fn test_php_plp_round_trip() {
        // SEC; LDA #$00 (Z=1); PHP; CLC; LDA #$01; PLP; BRK
        let (cpu, _) = run(&[0x38, 0xA9, 0x00, 0x08, 0x18, 0xA9, 0x01, 0x28, 0x00]);
        assert!(cpu.regs.flags.c);
        assert!(cpu.regs.flags.z);
        assert_eq!(cpu.regs.a, 0x01);
    }

    #[test]
    fn test_bit_copies_high_bits() {
        // LDA #$C0; STA $10; LDA #$01; BIT $10
        let (cpu, _) = run(&[0xA9, 0xC0, 0x85, 0x10, 0xA9, 0x01, 0x24, 0x10, 0x00]);
        assert!(cpu.regs.flags.n);
        assert!(cpu.regs.flags.v);
        assert!(cpu.regs.flags.z);
    }

    #[test]
    fn test_unknown_opcode_halts() {
        let (mut cpu, mut mem) = cpu_with(&[0xEA, 0x02]);
        assert_eq!(cpu.step(&mut mem), Step::Continue);
        assert_eq!(
            cpu.step(&mut mem),
            Step::Halt(HaltReason::UnknownOpcode {
                opcode: 0x02,
                pc: 0x0401
            })
        );
    }

    #[test]
    fn test_rom_fetch_is_implicit_return() {
        let (mut cpu, mut mem) = cpu_with(&[0x20, 0xEE, 0xFF]); // JSR OSWRCH
        assert_eq!(cpu.step(&mut mem), Step::Continue);
        assert_eq!(cpu.regs.pc, 0xFFEE);
        assert!(cpu.at_return(&mem));
        assert_eq!(cpu.step(&mut mem), Step::Returned);
        assert_eq!(cpu.regs.pc, 0x0403);
    }

    #[test]
    fn test_load_sets_nz_for_every_value() {
        for value in 0..=255u8 {
            let (cpu, _) = run(&[0xA9, value, 0x00]);
            assert_eq!(cpu.regs.flags.n, value & 0x80 != 0, "LDA #{value:#04X}");
            assert_eq!(cpu.regs.flags.z, value == 0, "LDA #{value:#04X}");
        }
    }

    #[test]
    fn test_transfer_and_store_keep_nz_for_every_value() {
        for value in 0..=255u8 {
            // LDY #v; TYA; TAX; STX $40; LDA #$01; LDA $40
            let (cpu, mem) =
                run(&[0xA0, value, 0x98, 0xAA, 0x86, 0x40, 0xA9, 0x01, 0xA5, 0x40, 0x00]);
            assert_eq!(mem.read(0x40), value);
            assert_eq!(cpu.regs.x, value);
            assert_eq!(cpu.regs.flags.n, value & 0x80 != 0, "value {value:#04X}");
            assert_eq!(cpu.regs.flags.z, value == 0, "value {value:#04X}");
        }
    }

    #[test]
    fn test_inc_dec_set_nz_for_every_value() {
        for value in 0..=255u8 {
            // LDX #v; INX
            let (cpu, _) = run(&[0xA2, value, 0xE8, 0x00]);
            let inc = value.wrapping_add(1);
            assert_eq!(cpu.regs.x, inc);
            assert_eq!(cpu.regs.flags.n, inc & 0x80 != 0, "INX from {value:#04X}");
            assert_eq!(cpu.regs.flags.z, inc == 0, "INX from {value:#04X}");

            // LDA #v; STA $50; DEC $50
            let (cpu, mem) = run(&[0xA9, value, 0x85, 0x50, 0xC6, 0x50, 0x00]);
            let dec = value.wrapping_sub(1);
            assert_eq!(mem.read(0x50), dec);
            assert_eq!(cpu.regs.flags.n, dec & 0x80 != 0, "DEC from {value:#04X}");
            assert_eq!(cpu.regs.flags.z, dec == 0, "DEC from {value:#04X}");
        }
    }

    #[test]
    fn test_call_depth_saturates() {
        // JSR $0410 with the depth already at the limit
        let mut program = vec![0x20, 0x10, 0x04];
        program.resize(0x10, 0xEA);
        program.push(0x00);
        let (mut cpu, mut mem) = cpu_with(&program);
        cpu.call_depth = u32::MAX;
        assert_eq!(cpu.step(&mut mem), Step::Continue);
        assert_eq!(cpu.regs.pc, 0x0410);
        assert_eq!(cpu.call_depth(), u32::MAX);
    }

    #[test]
    fn test_inline_data_calls_raise_depth() {
        // loop: JSR $0410; JMP loop ... $0410: PLA; PLA; JMP loop
        let mut program = vec![0x20, 0x10, 0x04, 0x4C, 0x00, 0x04];
        program.resize(0x10, 0xEA);
        program.extend_from_slice(&[0x68, 0x68, 0x4C, 0x00, 0x04]);
        let (mut cpu, mut mem) = cpu_with(&program);
        for _ in 0..4 * 4 {
            assert_eq!(cpu.step(&mut mem), Step::Continue);
        }
        assert_eq!(cpu.call_depth(), 4);
        assert_eq!(cpu.regs.sp, 0xFF);
    }

    proptest! {
        #[test]
        fn prop_adc_matches_wide_arithmetic(
            a in any::<u8>(),
            m in any::<u8>(),
            carry in any::<bool>(),
        ) {
            let set_carry = if carry { 0x38 } else { 0x18 }; // SEC / CLC
            let (cpu, _) = run(&[set_carry, 0xA9, a, 0x69, m, 0x00]);
            let sum = a as u16 + m as u16 + carry as u16;
            let signed = a as i8 as i16 + m as i8 as i16 + carry as i16;
            prop_assert_eq!(cpu.regs.a, sum as u8);
            prop_assert_eq!(cpu.regs.flags.c, sum > 0xFF);
            prop_assert_eq!(cpu.regs.flags.v, !(-128..=127).contains(&signed));
        }
    }
}
