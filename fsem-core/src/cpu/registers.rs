//! 6502 register file and condition flags.

/// Status register bits as pushed by PHP/BRK.
pub mod status {
    pub const NEGATIVE: u8 = 0x80;
    pub const OVERFLOW: u8 = 0x40;
    /// Always reads as set when pushed.
    pub const UNUSED: u8 = 0x20;
    pub const BREAK: u8 = 0x10;
    pub const ZERO: u8 = 0x02;
    pub const CARRY: u8 = 0x01;
}

/// The four condition flags the emulated programs observe.
///
/// Decimal and interrupt-disable are not modelled: CLD/SED/CLI/SEI execute as
/// no-ops and arithmetic is always binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub n: bool,
    pub v: bool,
    pub z: bool,
    pub c: bool,
}

impl Flags {
    /// Recompute N and Z from `value` and hand it back.
    #[inline]
    pub fn set_nz(&mut self, value: u8) -> u8 {
        self.n = value & 0x80 != 0;
        self.z = value == 0;
        value
    }

    /// Pack into a status byte.
    pub fn to_byte(self) -> u8 {
        let mut p = status::UNUSED | status::BREAK;
        if self.n {
            p |= status::NEGATIVE;
        }
        if self.v {
            p |= status::OVERFLOW;
        }
        if self.z {
            p |= status::ZERO;
        }
        if self.c {
            p |= status::CARRY;
        }
        p
    }

    /// Unpack a status byte; bits other than NVZC are ignored.
    pub fn from_byte(p: u8) -> Self {
        Self {
            n: p & status::NEGATIVE != 0,
            v: p & status::OVERFLOW != 0,
            z: p & status::ZERO != 0,
            c: p & status::CARRY != 0,
        }
    }
}

/// CPU registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub flags: Flags,
}

impl Registers {
    /// Register state on entry to a freshly loaded image.
    ///
    /// The file server refuses to start unless A is 1 on entry.
    pub fn at_entry(pc: u16) -> Self {
        Self {
            a: 1,
            sp: 0xFF,
            pc,
            ..Self::default()
        }
    }
}
