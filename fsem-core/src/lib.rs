//! Econet File Server Emulator Core
//!
//! Runs a BBC Micro Econet file server image on an emulated 6502 and connects
//! it to the outside world:
//! - MOS calls (OSWORD/OSBYTE/OSWRCH) serviced by the host
//! - Econet packets carried over UDP using the AUN protocol
//! - The SCSI disk backed by an image file
//!
//! # Architecture
//!
//! The emulator uses a layered design:
//! - `Memory` and `Cpu`: the 6502 and its address space
//! - `FileServerEmulator`: the CPU plus the MOS calls, buffer pool and disk
//! - `AunEngine`: station table and the Unicast/Ack/Immediate protocol over a
//!   `Transport`
//! - `FileServer`: the host loop that runs the emulator and drives the engine
//!   whenever the file server suspends itself

pub mod config;
pub mod console;
pub mod cpu;
pub mod econet;
pub mod emulator;
pub mod error;
pub mod memory;
pub mod mos;
pub mod scheduler;
pub mod scsi;

pub use config::FsemConfig;
pub use console::{Console, HeadlessConsole};
pub use econet::{AunEngine, EbufPool, MemoryTransport, RxOutcome, Transport, UdpTransport};
pub use emulator::{FileServerEmulator, SetupAnswers};
pub use error::{FsemError, FsemResult, HaltReason};
pub use memory::Memory;
pub use scheduler::{FileServer, Mode, Stop};
pub use scsi::{BlockStore, FileBlockStore, MemoryBlockStore};

/// What a run of the emulator ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    /// Time slice used up; call again to continue.
    Busy,
    /// Fatal condition; the program cannot continue.
    Break(HaltReason),
    /// Waiting for a packet or a key press, without time limit.
    WaitForEvent,
    /// Waiting for a packet, with the host's receive timeout.
    WaitTimeout,
    /// Slot 0 is staged; the host should transmit it.
    Send,
}
