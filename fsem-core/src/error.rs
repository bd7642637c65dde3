//! Error types for the file server emulator.

use std::collections::TryReserveError;

use thiserror::Error;

/// Host-side errors: failures of the machinery around the emulated program.
#[derive(Error, Debug)]
pub enum FsemError {
    #[error("Image of {len} bytes at {load_address:#06X} overlaps ROM")]
    ImageTooLarge { len: usize, load_address: u16 },

    #[error("Address range {addr:#010X}+{len:#X} is outside the memory image")]
    AddressOutOfRange { addr: u32, len: usize },

    #[error("Invalid station number: {0}")]
    InvalidStation(u16),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Buffer allocation failed: {0}")]
    OutOfMemory(#[from] TryReserveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for emulator operations.
pub type FsemResult<T> = Result<T, FsemError>;

/// Why a run stopped for good. These halt the emulated program.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    #[error("BRK at {pc:#06X}")]
    Brk { pc: u16 },

    #[error("unknown opcode {opcode:#04X} at {pc:#06X}")]
    UnknownOpcode { opcode: u8, pc: u16 },

    #[error("unknown ROM call {addr:#06X} from {caller:#06X}")]
    UnknownRomCall { addr: u16, caller: u16 },

    #[error("reset vector entered from {caller:#06X}")]
    Reset { caller: u16 },

    #[error("unsupported OSWORD A={a:#04X} X={x:#04X} Y={y:#04X}")]
    UnsupportedOsword { a: u8, x: u8, y: u8 },

    #[error("unsupported OSBYTE A={a:#04X} X={x:#04X} Y={y:#04X}")]
    UnsupportedOsbyte { a: u8, x: u8, y: u8 },

    #[error("unsupported SCSI command {0:#04X}")]
    UnsupportedScsiCommand(u8),

    #[error("poll transmit called; transmissions complete synchronously")]
    PollTransmit,
}
