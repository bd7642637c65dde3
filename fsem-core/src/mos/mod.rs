//! BBC MOS surface the file server calls into.
//!
//! The hosted program reaches the operating system by jumping into the ROM
//! region. Each entry point is a [`RomCall`]; OSWORD and OSBYTE further
//! dispatch on the accumulator.

pub mod block;
pub mod vdu;

pub use block::{ControlBlock, BLOCK_SIZE};
pub use vdu::Vdu;

/// ROM entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RomCall {
    /// Reset vector
    Reset = 0xF800,
    /// Read character
    Osrdch = 0xFFE0,
    /// Write character, CR as LF CR
    Osasci = 0xFFE3,
    /// Write newline
    Osnewl = 0xFFE7,
    /// Write character to the VDU stream
    Oswrch = 0xFFEE,
    /// Control-block call, A = function, YX = block
    Osword = 0xFFF1,
    /// Register call, A = function
    Osbyte = 0xFFF4,
    /// Command line interpreter
    Oscli = 0xFFF7,
}

impl TryFrom<u16> for RomCall {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0xF800 => Ok(Self::Reset),
            0xFFE0 => Ok(Self::Osrdch),
            0xFFE3 => Ok(Self::Osasci),
            0xFFE7 => Ok(Self::Osnewl),
            0xFFEE => Ok(Self::Oswrch),
            0xFFF1 => Ok(Self::Osword),
            0xFFF4 => Ok(Self::Osbyte),
            0xFFF7 => Ok(Self::Oscli),
            _ => Err(value),
        }
    }
}

/// OSWORD functions used by the file server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsWord {
    /// 0x00: read a line of input
    ReadLine = 0x00,
    /// 0x0E: read the real-time clock
    ReadClock = 0x0E,
    /// 0x10: Econet transmit
    Transmit = 0x10,
    /// 0x11: Econet receive block create or read-and-delete
    Receive = 0x11,
    /// 0x13: read station information
    StationInfo = 0x13,
    /// 0x72: SCSI command
    ScsiCommand = 0x72,
    /// 0x73: SCSI last error
    ScsiLastError = 0x73,
}

impl TryFrom<u8> for OsWord {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::ReadLine),
            0x0E => Ok(Self::ReadClock),
            0x10 => Ok(Self::Transmit),
            0x11 => Ok(Self::Receive),
            0x13 => Ok(Self::StationInfo),
            0x72 => Ok(Self::ScsiCommand),
            0x73 => Ok(Self::ScsiLastError),
            _ => Err(value),
        }
    }
}

/// OSBYTE functions used by the file server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OsByte {
    /// 0x0D: disable event
    DisableEvent = 0x0D,
    /// 0x0E: enable event
    EnableEvent = 0x0E,
    /// 0x0F: flush buffer
    FlushBuffer = 0x0F,
    /// 0x32: poll transmit
    PollTransmit = 0x32,
    /// 0x33: poll receive, X = block, Y = wait class
    PollReceive = 0x33,
    /// 0x34: delete receive block X
    DeleteReceiveBlock = 0x34,
    /// 0x35: terminate remote connection
    TerminateConnection = 0x35,
    /// 0x85: bottom of display memory for a mode
    DisplayMemoryTop = 0x85,
    /// 0x86: text cursor position
    CursorPosition = 0x86,
    /// 0x87: character at cursor
    CharacterAtCursor = 0x87,
    /// 0x96: read SHEILA
    ReadSheila = 0x96,
    /// 0x97: write SHEILA
    WriteSheila = 0x97,
    /// 0xB4: read/write OSHWM (PAGE)
    PageBoundary = 0xB4,
    /// 0xE5: read/write ESCAPE status
    EscapeStatus = 0xE5,
}

impl TryFrom<u8> for OsByte {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0D => Ok(Self::DisableEvent),
            0x0E => Ok(Self::EnableEvent),
            0x0F => Ok(Self::FlushBuffer),
            0x32 => Ok(Self::PollTransmit),
            0x33 => Ok(Self::PollReceive),
            0x34 => Ok(Self::DeleteReceiveBlock),
            0x35 => Ok(Self::TerminateConnection),
            0x85 => Ok(Self::DisplayMemoryTop),
            0x86 => Ok(Self::CursorPosition),
            0x87 => Ok(Self::CharacterAtCursor),
            0x96 => Ok(Self::ReadSheila),
            0x97 => Ok(Self::WriteSheila),
            0xB4 => Ok(Self::PageBoundary),
            0xE5 => Ok(Self::EscapeStatus),
            _ => Err(value),
        }
    }
}

/// Poll-receive wait classes (Y register).
pub mod wait {
    /// Wait until something arrives or a key is pressed.
    pub const EVENT: u8 = 1;
    /// Short wait for a broadcast reply; never outstanding here.
    pub const SHORT: u8 = 2;
}

/// Result codes handed back to the hosted program.
pub mod result {
    /// X after poll-receive: nothing received.
    pub const NOTHING_RECEIVED: u8 = 0x00;
    /// X after poll-receive: data received.
    pub const DATA_RECEIVED: u8 = 0x80;
    /// A after transmit: acknowledged.
    pub const TRANSMIT_OK: u8 = 0x00;
    /// A after transmit: failed.
    pub const TRANSMIT_FAILED: u8 = 0x40;
    /// SCSI command block result: transfer incomplete.
    pub const SCSI_ERROR: u8 = 4;
}

/// Event number for a key press delivered through EVENTV.
pub const KEY_EVENT: u8 = 2;
