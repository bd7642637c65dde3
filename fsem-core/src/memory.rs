//! Flat memory image: 64 KiB CPU space followed by 32 KiB of host memory.
//!
//! The CPU sees a plain 16-bit space. Control blocks carry 32-bit addresses;
//! anything at or above `0x10000` names the host region, folded with
//! `0x10000 + (addr & 0xFFFF)`. Every 32-bit access goes through
//! [`Memory::translate`] so an out-of-range block is an error, not a panic.

use std::fmt::Write as _;
use std::ops::Range;

use crate::error::{FsemError, FsemResult};

/// Size of the CPU-visible address space.
pub const CPU_SPACE: usize = 0x1_0000;
/// Size of the host memory region appended after the CPU space.
pub const HOST_MEMORY: usize = 32 * 1024;
/// Total size of the arena.
pub const MEMORY_SIZE: usize = CPU_SPACE + HOST_MEMORY;

/// First address of the trap region. Never fetched as real bytes.
pub const ROM_BASE: u16 = 0xF800;
/// Base of the 6502 stack page.
pub const STACK_PAGE: u16 = 0x0100;

/// Well-known vectors in low memory.
pub mod vector {
    /// BRK vector (BRKV).
    pub const BRK: u16 = 0x0202;
    /// Event vector (EVNTV), entered for key events.
    pub const EVENT: u16 = 0x0220;
}

/// The emulated machine's memory.
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Read a byte from the CPU space.
    #[inline]
    pub fn read(&self, addr: u16) -> u8 {
        self.bytes[addr as usize]
    }

    /// Write a byte to the CPU space.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u8) {
        self.bytes[addr as usize] = value;
    }

    /// Read a little-endian word; the high byte wraps at 0xFFFF.
    pub fn read_word(&self, addr: u16) -> u16 {
        u16::from_le_bytes([self.read(addr), self.read(addr.wrapping_add(1))])
    }

    /// Read a little-endian word from page zero, wrapping within it.
    pub fn read_zp_word(&self, zp: u8) -> u16 {
        u16::from_le_bytes([self.read(zp as u16), self.read(zp.wrapping_add(1) as u16)])
    }

    /// Map a 32-bit control-block address and length to an arena range.
    pub fn translate(&self, addr: u32, len: usize) -> FsemResult<Range<usize>> {
        let start = if addr as usize >= CPU_SPACE {
            CPU_SPACE + (addr & 0xFFFF) as usize
        } else {
            addr as usize
        };
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(FsemError::AddressOutOfRange { addr, len }),
        }
    }

    /// Borrow a translated range.
    pub fn slice(&self, addr: u32, len: usize) -> FsemResult<&[u8]> {
        let range = self.translate(addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Mutably borrow a translated range.
    pub fn slice_mut(&mut self, addr: u32, len: usize) -> FsemResult<&mut [u8]> {
        let range = self.translate(addr, len)?;
        Ok(&mut self.bytes[range])
    }

    /// Copy `data` into memory at a translated address.
    pub fn store(&mut self, addr: u32, data: &[u8]) -> FsemResult<()> {
        self.slice_mut(addr, data.len())?.copy_from_slice(data);
        Ok(())
    }

    /// Install a program image. The image must end below [`ROM_BASE`].
    pub fn load(&mut self, address: u16, image: &[u8]) -> FsemResult<()> {
        let end = address as usize + image.len();
        if end >= ROM_BASE as usize {
            return Err(FsemError::ImageTooLarge {
                len: image.len(),
                load_address: address,
            });
        }
        self.bytes[address as usize..end].copy_from_slice(image);
        Ok(())
    }

    /// Render `len` bytes at `addr` as a hex line, for trace output.
    pub fn dump(&self, addr: u32, len: usize) -> String {
        let mut out = format!("{addr:08x}:");
        match self.slice(addr, len) {
            Ok(bytes) => {
                for b in bytes {
                    let _ = write!(out, " {b:02x}");
                }
            }
            Err(_) => out.push_str(" <out of range>"),
        }
        out
    }
}
