//! OSWORD control blocks.
//!
//! OSWORD passes a pointer to a parameter block in X (low) and Y (high).
//! Handlers copy the block out of memory, work on the copy and write it back,
//! so field accessors never need to worry about address wrap.

use crate::memory::Memory;

/// Bytes copied for every control block; covers the largest layout (SCSI).
pub const BLOCK_SIZE: usize = 16;

/// A copied control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    addr: u16,
    bytes: [u8; BLOCK_SIZE],
}

impl ControlBlock {
    /// Copy the block at `addr` out of memory.
    pub fn read(mem: &Memory, addr: u16) -> Self {
        let mut bytes = [0u8; BLOCK_SIZE];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = mem.read(addr.wrapping_add(i as u16));
        }
        Self { addr, bytes }
    }

    /// Block at the address held in X/Y.
    pub fn at_xy(mem: &Memory, x: u8, y: u8) -> Self {
        Self::read(mem, u16::from_le_bytes([x, y]))
    }

    /// Store the (possibly modified) block back where it came from.
    pub fn write_back(&self, mem: &mut Memory) {
        for (i, &b) in self.bytes.iter().enumerate() {
            mem.write(self.addr.wrapping_add(i as u16), b);
        }
    }

    pub fn addr(&self) -> u16 {
        self.addr
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    pub fn set_byte(&mut self, offset: usize, value: u8) {
        self.bytes[offset] = value;
    }

    pub fn word(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    pub fn set_word(&mut self, offset: usize, value: u16) {
        self.bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn dword(&self, offset: usize) -> u32 {
        let b = &self.bytes[offset..offset + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn set_dword(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Fill `range` with `value`.
    pub fn fill(&mut self, range: std::ops::Range<usize>, value: u8) {
        self.bytes[range].fill(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_little_endian() {
        let mut mem = Memory::new();
        mem.store(0x0900, &[0x80, 0x99, 0x05, 0x00, 0x00, 0x30, 0x00, 0x00])
            .unwrap();
        let block = ControlBlock::at_xy(&mem, 0x00, 0x09);
        assert_eq!(block.byte(0), 0x80);
        assert_eq!(block.word(2), 5);
        assert_eq!(block.dword(4), 0x3000);
    }

    #[test]
    fn test_write_back_only_touches_block() {
        let mut mem = Memory::new();
        mem.write(0x0910, 0xAA);
        let mut block = ControlBlock::read(&mem, 0x0900);
        block.set_dword(9, 0x0001_2345);
        block.set_word(3, 0xFFFF);
        block.write_back(&mut mem);
        assert_eq!(mem.slice(0x0909, 4).unwrap(), &[0x45, 0x23, 0x01, 0x00]);
        assert_eq!(mem.read_word(0x0903), 0xFFFF);
        assert_eq!(mem.read(0x0910), 0xAA);
    }

    #[test]
    fn test_block_wraps_at_top_of_cpu_space() {
        let mut mem = Memory::new();
        mem.write(0x0001, 0x42);
        let block = ControlBlock::read(&mem, 0xFFFF);
        assert_eq!(block.byte(2), 0x42);
    }
}
