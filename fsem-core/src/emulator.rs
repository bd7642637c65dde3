//! File server emulator: integrates the 6502 with the MOS calls the Econet
//! file server makes.

use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, error, info, trace, warn};

use crate::console::Console;
use crate::cpu::{Cpu, Registers, Step};
use crate::econet::{EbufPool, EbufState};
use crate::error::{FsemResult, HaltReason};
use crate::memory::{vector, Memory, HOST_MEMORY, ROM_BASE};
use crate::mos::{result, wait, ControlBlock, OsByte, OsWord, RomCall, Vdu, BLOCK_SIZE, KEY_EVENT};
use crate::scsi::{BlockStore, SECTOR_SIZE};
use crate::ExecState;

/// Instructions between wall-clock checks.
const TIME_CHECK_INTERVAL: u32 = 1024;

const SCSI_READ: u8 = 0x08;
const SCSI_WRITE: u8 = 0x0A;

/// Answers typed at the file server's startup prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupAnswers {
    /// Number of drives.
    pub drives: u8,
    /// Number of stations.
    pub stations: u8,
}

impl Default for SetupAnswers {
    fn default() -> Self {
        Self {
            drives: 1,
            stations: 10,
        }
    }
}

/// File server emulator state.
pub struct FileServerEmulator<C: Console, B: BlockStore> {
    cpu: Cpu,
    memory: Memory,
    /// Econet buffers registered by the hosted program.
    pool: EbufPool,
    vdu: Vdu,
    console: C,
    /// SCSI disk.
    disk: B,
    /// Our Econet station number.
    station: u8,
    /// Key presses are delivered through EVENTV.
    key_events: bool,
    setup: SetupAnswers,
    /// Lines answered so far through OSWORD 0.
    lines_answered: u32,
    state: ExecState,
}

impl<C: Console, B: BlockStore> FileServerEmulator<C, B> {
    /// Create an emulator with an empty memory image.
    pub fn new(console: C, disk: B, station: u8) -> Self {
        Self {
            cpu: Cpu::default(),
            memory: Memory::new(),
            pool: EbufPool::default(),
            vdu: Vdu::new(),
            console,
            disk,
            station,
            key_events: false,
            setup: SetupAnswers::default(),
            lines_answered: 0,
            state: ExecState::Busy,
        }
    }

    /// Set the answers given to the startup prompts.
    pub fn with_setup(mut self, setup: SetupAnswers) -> Self {
        self.setup = setup;
        self
    }

    /// Install the file server image and point the CPU at its entry.
    pub fn load(&mut self, address: u16, image: &[u8]) -> FsemResult<()> {
        self.memory.load(address, image)?;
        self.cpu = Cpu::at_entry(address);
        info!(address, len = image.len(), station = self.station, "image loaded");
        Ok(())
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn pool(&self) -> &EbufPool {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut EbufPool {
        &mut self.pool
    }

    /// Get console reference.
    pub fn console(&self) -> &C {
        &self.console
    }

    /// Get mutable console reference.
    pub fn console_mut(&mut self) -> &mut C {
        &mut self.console
    }

    pub fn disk(&self) -> &B {
        &self.disk
    }

    pub fn station(&self) -> u8 {
        self.station
    }

    pub fn key_events_enabled(&self) -> bool {
        self.key_events
    }

    /// Hand a result back in A before resuming.
    pub fn load_a(&mut self, value: u8) {
        self.cpu.load_a(value);
    }

    /// Hand a result back in X before resuming.
    pub fn load_x(&mut self, value: u8) {
        self.cpu.load_x(value);
    }

    /// Flush the disk.
    pub fn flush(&mut self) -> FsemResult<()> {
        self.disk.flush()?;
        Ok(())
    }

    /// Run for up to `budget`.
    ///
    /// In single-call mode the run also ends just before a return at the
    /// depth it started from, leaving that RTS unexecuted.
    pub fn exec(&mut self, budget: Duration, single_call: bool) -> ExecState {
        self.state = ExecState::Busy;
        let deadline = Instant::now() + budget;
        let mut executed: u32 = 0;

        while self.state == ExecState::Busy {
            if single_call && self.cpu.call_depth() == 0 && self.cpu.at_return(&self.memory) {
                break;
            }

            let pc = self.cpu.regs.pc;
            if let Step::Halt(reason) = self.cpu.step(&mut self.memory) {
                self.halt(reason);
                break;
            }
            if self.cpu.regs.pc >= ROM_BASE {
                if let Err(reason) = self.rom_call(pc) {
                    self.halt(reason);
                    break;
                }
            }

            executed = executed.wrapping_add(1);
            if executed % TIME_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                break;
            }
        }
        self.state
    }

    /// Deliver a key press event through EVENTV, if events are enabled.
    ///
    /// The handler runs in single-call mode; PC, A and Y are restored
    /// afterwards, X and the flags are not.
    pub fn send_key(&mut self, budget: Duration, key: u8) -> Option<ExecState> {
        if !self.key_events {
            trace!(key, "key events disabled");
            return None;
        }
        let Registers { pc, a, y, .. } = self.cpu.regs;
        let saved_state = self.state;

        self.cpu.regs.a = KEY_EVENT;
        self.cpu.regs.y = key;
        self.cpu.regs.pc = self.memory.read_word(vector::EVENT);
        self.cpu.reset_call_depth();
        debug!(key, handler = self.cpu.regs.pc, "delivering key event");
        let state = self.exec(budget, true);

        self.cpu.regs.pc = pc;
        self.cpu.regs.a = a;
        self.cpu.regs.y = y;
        self.state = saved_state;
        Some(state)
    }

    fn halt(&mut self, reason: HaltReason) {
        error!(%reason, pc = self.cpu.regs.pc, "execution halted");
        self.state = ExecState::Break(reason);
    }

    /// Service a jump into the ROM region. `caller` is the PC of the
    /// instruction that got there.
    fn rom_call(&mut self, caller: u16) -> Result<(), HaltReason> {
        let addr = self.cpu.regs.pc;
        let call =
            RomCall::try_from(addr).map_err(|addr| HaltReason::UnknownRomCall { addr, caller })?;

        match call {
            RomCall::Reset => return Err(HaltReason::Reset { caller }),
            RomCall::Osrdch => {
                self.cpu.regs.a = b'S';
                self.cpu.regs.flags.c = false;
            }
            RomCall::Osnewl => {
                self.cpu.regs.a = b'\r';
                self.osasci(b'\r');
            }
            RomCall::Osasci => self.osasci(self.cpu.regs.a),
            RomCall::Oswrch => self.vdu.write(&mut self.console, self.cpu.regs.a),
            RomCall::Osword => self.osword()?,
            RomCall::Osbyte => self.osbyte()?,
            RomCall::Oscli => {
                let Registers { x, y, .. } = self.cpu.regs;
                debug!(x, y, "OSCLI ignored");
            }
        }
        Ok(())
    }

    fn osasci(&mut self, ch: u8) {
        if ch == b'\r' {
            self.vdu.write(&mut self.console, b'\n');
        }
        self.vdu.write(&mut self.console, ch);
    }

    fn osword(&mut self) -> Result<(), HaltReason> {
        let Registers { a, x, y, .. } = self.cpu.regs;
        let Ok(op) = OsWord::try_from(a) else {
            return Err(HaltReason::UnsupportedOsword { a, x, y });
        };
        let mut block = ControlBlock::at_xy(&self.memory, x, y);
        trace!(?op, block = %self.memory.dump(block.addr() as u32, BLOCK_SIZE), "OSWORD");

        let modified = match op {
            OsWord::ReadLine => {
                self.read_line(&block);
                false
            }
            OsWord::ReadClock => {
                let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
                for (i, value) in clock_record(now).into_iter().enumerate() {
                    block.set_byte(i, value);
                }
                true
            }
            OsWord::Transmit => {
                self.transmit(&block);
                false
            }
            OsWord::Receive => {
                self.receive(&mut block);
                true
            }
            OsWord::StationInfo => {
                block.set_byte(1, self.station);
                true
            }
            OsWord::ScsiCommand => {
                self.scsi_command(&mut block)?;
                true
            }
            OsWord::ScsiLastError => {
                block.fill(0..5, 0);
                true
            }
        };
        if modified {
            block.write_back(&mut self.memory);
        }
        Ok(())
    }

    /// OSWORD 0: answer the next startup prompt.
    fn read_line(&mut self, block: &ControlBlock) {
        let buffer = block.word(0);
        let answer = if self.lines_answered == 0 {
            self.setup.drives
        } else {
            self.setup.stations
        };
        self.lines_answered += 1;

        let line = format!("{answer}\r");
        for (i, b) in line.bytes().enumerate() {
            self.memory.write(buffer.wrapping_add(i as u16), b);
        }
        for b in format!("{answer}\r\n").bytes() {
            self.console.write(b);
        }
        info!(answer, "answered startup prompt");

        self.cpu.regs.y = (line.len() - 1) as u8;
        self.cpu.regs.flags.c = false;
    }

    /// OSWORD 0x10: stage slot 0 and suspend for the host to send it.
    ///
    /// Completes to the caller's caller with A = 0x00 on success or 0x40.
    fn transmit(&mut self, block: &ControlBlock) {
        self.cpu.discard_return();

        let control = block.byte(0);
        let port = block.byte(1);
        let station = block.word(2);
        if control < 0x80 || port == 0 || station == 0xFFFF {
            debug!(control, port, station, "transmit refused");
            self.cpu.load_a(result::TRANSMIT_FAILED);
            return;
        }

        let start = block.dword(4);
        let len = block.dword(8).wrapping_sub(start) as usize;
        let payload = match self.memory.slice(start, len) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%e, "transmit buffer outside memory");
                self.cpu.load_a(result::TRANSMIT_FAILED);
                return;
            }
        };
        match self.pool.stage_transmit(payload) {
            Ok(tx) => {
                tx.station = station;
                tx.port = port;
                tx.control = control;
                tx.state = EbufState::Send;
            }
            Err(e) => {
                warn!(%e, "could not stage transmit buffer");
                self.cpu.load_a(result::TRANSMIT_FAILED);
                return;
            }
        }
        debug!(station, port, len, "transmit staged");
        self.state = ExecState::Send;
    }

    /// OSWORD 0x11: create a receive block, or read and delete one.
    fn receive(&mut self, block: &mut ControlBlock) {
        let index = block.byte(0);
        if index == 0 {
            let Some(slot) = self.pool.allocate_receive_slot() else {
                warn!("no free receive block");
                block.set_byte(0, 0);
                return;
            };
            let start = block.dword(5);
            let end = block.dword(9);
            if let Some(ebuf) = self.pool.get_mut(slot) {
                ebuf.control = block.byte(1);
                ebuf.port = block.byte(2);
                ebuf.station = block.word(3);
                ebuf.addr = start;
                ebuf.len = end.wrapping_sub(start) as usize;
                ebuf.state = EbufState::Listening;
            }
            block.set_byte(0, slot as u8);
            trace!(slot, station = block.word(3), port = block.byte(2), "receive block created");
            return;
        }

        let slot = index as usize;
        let Some(ebuf) = self.pool.get(slot) else {
            warn!(slot, "read of unknown receive block");
            return;
        };
        if ebuf.state == EbufState::Received {
            let addr = ebuf.addr;
            if let Err(e) = self.memory.store(addr, ebuf.payload()) {
                warn!(slot, %e, "received data does not fit in memory");
            }
            block.set_byte(1, ebuf.control);
            block.set_byte(2, ebuf.port);
            block.set_word(3, ebuf.station);
            block.set_dword(5, addr);
            block.set_dword(9, addr.wrapping_add(ebuf.len as u32));
            trace!(slot, len = ebuf.len, "receive block read");
        }
        self.pool.release(slot);
    }

    /// OSWORD 0x72: sector transfer between memory and the disk.
    fn scsi_command(&mut self, block: &mut ControlBlock) -> Result<(), HaltReason> {
        let addr = block.dword(1);
        let command = block.byte(5);
        let sector = ((block.byte(6) as u64 & 0x1F) << 16)
            | ((block.byte(7) as u64) << 8)
            | block.byte(8) as u64;
        let len = match block.byte(9) as usize * SECTOR_SIZE {
            0 => block.dword(11) as usize,
            len => len,
        };

        let write = match command {
            SCSI_READ => false,
            SCSI_WRITE => true,
            other => return Err(HaltReason::UnsupportedScsiCommand(other)),
        };
        let offset = sector * SECTOR_SIZE as u64;
        let status = match self.scsi_transfer(write, addr, offset, len) {
            Ok(n) if n == len => 0,
            Ok(n) => {
                warn!(sector, len, transferred = n, write, "short SCSI transfer");
                result::SCSI_ERROR
            }
            Err(e) => {
                warn!(sector, len, write, %e, "SCSI transfer failed");
                result::SCSI_ERROR
            }
        };
        trace!(sector, len, write, status, "SCSI command");
        block.set_byte(0, status);
        Ok(())
    }

    fn scsi_transfer(
        &mut self,
        write: bool,
        addr: u32,
        offset: u64,
        len: usize,
    ) -> FsemResult<usize> {
        let buf = self.memory.slice_mut(addr, len)?;
        let n = if write {
            self.disk.write_at(offset, buf)?
        } else {
            self.disk.read_at(offset, buf)?
        };
        Ok(n)
    }

    fn osbyte(&mut self) -> Result<(), HaltReason> {
        let Registers { a, x, y, .. } = self.cpu.regs;
        let Ok(op) = OsByte::try_from(a) else {
            return Err(HaltReason::UnsupportedOsbyte { a, x, y });
        };
        trace!(?op, x, y, "OSBYTE");

        match op {
            OsByte::DisableEvent => self.key_events = false,
            OsByte::EnableEvent => self.key_events = true,
            OsByte::PollTransmit => return Err(HaltReason::PollTransmit),
            OsByte::PollReceive => self.poll_receive(x, y),
            OsByte::DeleteReceiveBlock => self.pool.release(x as usize),
            OsByte::DisplayMemoryTop => {
                self.cpu.regs.x = 0;
                self.cpu.regs.y = (HOST_MEMORY >> 8) as u8;
            }
            OsByte::CursorPosition => {
                self.cpu.regs.x = 0;
                self.cpu.regs.y = 0;
            }
            OsByte::PageBoundary => self.cpu.regs.x = 0,
            OsByte::FlushBuffer
            | OsByte::TerminateConnection
            | OsByte::CharacterAtCursor
            | OsByte::ReadSheila
            | OsByte::WriteSheila
            | OsByte::EscapeStatus => {}
        }
        Ok(())
    }

    /// OSBYTE 0x33: arm receive block X and suspend, unless Y asks for the
    /// short broadcast wait, which never has anything to deliver.
    fn poll_receive(&mut self, x: u8, y: u8) {
        self.cpu.discard_return();
        if y == wait::SHORT {
            self.cpu.load_x(result::NOTHING_RECEIVED);
            return;
        }
        self.pool.listen(Some(x as usize));
        self.state = if y == wait::EVENT {
            ExecState::WaitForEvent
        } else {
            ExecState::WaitTimeout
        };
        trace!(slot = x, wait = y, "waiting for reception");
    }
}

/// OSWORD 14 record: year since 2000, month, day, weekday (Sunday = 1),
/// hour, minute, second. Binary, not BCD.
pub fn clock_record(now: OffsetDateTime) -> [u8; 7] {
    [
        (now.year() - 2000) as u8,
        u8::from(now.month()),
        now.day(),
        now.weekday().number_from_sunday(),
        now.hour(),
        now.minute(),
        now.second(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::HeadlessConsole;
    use crate::scsi::MemoryBlockStore;

    type Emu = FileServerEmulator<HeadlessConsole, MemoryBlockStore>;

    const SLICE: Duration = Duration::from_millis(200);
    const BLOCK: u16 = 0x0900;

    fn emulator(program: &[u8]) -> Emu {
        let mut emu = FileServerEmulator::new(
            HeadlessConsole::new(),
            MemoryBlockStore::with_sectors(8),
            254,
        );
        emu.load(0x0400, program).unwrap();
        emu
    }

    /// `LDX #<BLOCK; LDY #>BLOCK; LDA #op; JSR $FFF1; BRK`
    fn osword_call(op: u8) -> Vec<u8> {
        vec![0xA2, 0x00, 0xA0, 0x09, 0xA9, op, 0x20, 0xF1, 0xFF, 0x00]
    }

    fn set_block(emu: &mut Emu, bytes: &[u8]) {
        emu.memory_mut().store(BLOCK as u32, bytes).unwrap();
    }

    fn block(emu: &Emu) -> ControlBlock {
        ControlBlock::read(emu.memory(), BLOCK)
    }

    fn is_brk(state: ExecState) -> bool {
        matches!(state, ExecState::Break(HaltReason::Brk { .. }))
    }

    #[test]
    fn test_load_rejects_rom_overlap() {
        let mut emu = emulator(&[0x00]);
        assert!(emu.load(0xF700, &[0; 0x100]).is_err());
        assert_eq!(emu.cpu().regs.pc, 0x0400);
        assert_eq!(emu.cpu().regs.a, 1);
        assert_eq!(emu.cpu().regs.sp, 0xFF);
    }

    #[test]
    fn test_osrdch_returns_s() {
        // JSR OSRDCH; STA $20; BRK
        let mut emu = emulator(&[0x20, 0xE0, 0xFF, 0x85, 0x20, 0x00]);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().read(0x20), b'S');
        assert!(!emu.cpu().regs.flags.c);
    }

    #[test]
    fn test_character_output_routines() {
        // LDA #'A'; JSR OSWRCH; LDA #13; JSR OSASCI; JSR OSNEWL; BRK
        let mut emu = emulator(&[
            0xA9, b'A', 0x20, 0xEE, 0xFF, 0xA9, 0x0D, 0x20, 0xE3, 0xFF, 0x20, 0xE7, 0xFF, 0x00,
        ]);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.console().output(), b"A\n\r\n\r");
    }

    #[test]
    fn test_unknown_rom_call_halts() {
        let mut emu = emulator(&[0x20, 0xEA, 0xFF]);
        assert_eq!(
            emu.exec(SLICE, false),
            ExecState::Break(HaltReason::UnknownRomCall {
                addr: 0xFFEA,
                caller: 0x0400
            })
        );
    }

    #[test]
    fn test_reset_vector_halts() {
        let mut emu = emulator(&[0x4C, 0x00, 0xF8]);
        assert_eq!(
            emu.exec(SLICE, false),
            ExecState::Break(HaltReason::Reset { caller: 0x0400 })
        );
    }

    #[test]
    fn test_unsupported_os_calls_halt() {
        // LDA #$FF; JSR OSBYTE
        let mut emu = emulator(&[0xA9, 0xFF, 0x20, 0xF4, 0xFF]);
        assert_eq!(
            emu.exec(SLICE, false),
            ExecState::Break(HaltReason::UnsupportedOsbyte { a: 0xFF, x: 0, y: 0 })
        );

        let mut emu = emulator(&osword_call(0x01));
        assert_eq!(
            emu.exec(SLICE, false),
            ExecState::Break(HaltReason::UnsupportedOsword { a: 0x01, x: 0x00, y: 0x09 })
        );

        let mut emu = emulator(&[0xA9, 0x32, 0x20, 0xF4, 0xFF]);
        assert_eq!(emu.exec(SLICE, false), ExecState::Break(HaltReason::PollTransmit));
    }

    #[test]
    fn test_read_line_answers_drives_then_stations() {
        let mut program = osword_call(0x00);
        program.pop();
        // STY $20, then the same call again, STY $21; BRK
        program.extend_from_slice(&[0x84, 0x20]);
        program.extend_from_slice(&osword_call(0x00)[..9]);
        program.extend_from_slice(&[0x84, 0x21, 0x00]);

        let mut emu = emulator(&program);
        set_block(&mut emu, &[0x00, 0x0A, 0x20]);
        assert!(is_brk(emu.exec(SLICE, false)));

        assert_eq!(emu.memory().slice(0x0A00, 3).unwrap(), b"10\r");
        assert_eq!(emu.memory().read(0x20), 1);
        assert_eq!(emu.memory().read(0x21), 2);
        assert_eq!(emu.console().output_string(), "1\r\n10\r\n");
    }

    #[test]
    fn test_station_info_and_last_error() {
        let mut emu = emulator(&osword_call(0x13));
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(block(&emu).byte(1), 254);

        let mut emu = emulator(&osword_call(0x73));
        set_block(&mut emu, &[9, 9, 9, 9, 9, 9]);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().slice(BLOCK as u32, 6).unwrap(), &[0, 0, 0, 0, 0, 9]);
    }

    #[test]
    fn test_clock_record() {
        let t = OffsetDateTime::from_unix_timestamp(1_709_212_455).unwrap();
        // Thursday 29 February 2024, 13:14:15
        assert_eq!(clock_record(t), [24, 2, 29, 5, 13, 14, 15]);
    }

    #[test]
    fn test_receive_block_create_and_read() {
        let mut emu = emulator(&osword_call(0x11));
        // create: control, port 0x99, any station, buffer 0x3000..0x3100
        set_block(&mut emu, &[0, 0x7F, 0x99, 0, 0, 0x00, 0x30, 0, 0, 0x00, 0x31, 0, 0]);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(block(&emu).byte(0), 1);
        let slot = emu.pool().get(1).unwrap();
        assert_eq!(slot.state, EbufState::Listening);
        assert_eq!(slot.port, 0x99);
        assert_eq!(slot.len, 0x100);
        assert_eq!(slot.addr, 0x3000);

        // Simulate a delivery from station 7.
        let mut raw = vec![2, 0x99, 0x80, 0, 4, 0, 0, 0];
        raw.extend_from_slice(b"data");
        emu.pool_mut().bind(1, Some(raw));
        {
            let slot = emu.pool_mut().get_mut(1).unwrap();
            slot.station = 7;
            slot.control = 0x80;
            slot.state = EbufState::Received;
        }

        set_block(&mut emu, &[1]);
        emu.load(0x0400, &osword_call(0x11)).unwrap();
        assert!(is_brk(emu.exec(SLICE, false)));
        let b = block(&emu);
        assert_eq!(b.byte(1), 0x80);
        assert_eq!(b.byte(2), 0x99);
        assert_eq!(b.word(3), 7);
        assert_eq!(b.dword(5), 0x3000);
        assert_eq!(b.dword(9), 0x3004);
        assert_eq!(emu.memory().slice(0x3000, 4).unwrap(), b"data");
        assert!(emu.pool().get(1).unwrap().is_void());
    }

    #[test]
    fn test_receive_block_exhaustion() {
        let mut emu = emulator(&osword_call(0x11));
        for expected in [1, 2, 3, 4, 0] {
            set_block(&mut emu, &[0, 0x7F, 0x99]);
            emu.load(0x0400, &osword_call(0x11)).unwrap();
            assert!(is_brk(emu.exec(SLICE, false)));
            assert_eq!(block(&emu).byte(0), expected);
        }
    }

    /// `JSR $0410; STA $20; BRK` with the OSWORD call as a subroutine.
    fn transmit_program() -> Vec<u8> {
        let mut program = vec![0x20, 0x10, 0x04, 0x85, 0x20, 0x00];
        program.resize(0x10, 0xEA);
        program.extend_from_slice(&osword_call(0x10)[..9]);
        program.push(0x00);
        program
    }

    #[test]
    fn test_transmit_suspends_then_returns_to_caller() {
        let mut emu = emulator(&transmit_program());
        emu.memory_mut().write(0x20, 0xFF);
        emu.memory_mut().store(0x1000, b"hello").unwrap();
        set_block(&mut emu, &[0x80, 0x99, 5, 0, 0x00, 0x10, 0, 0, 0x05, 0x10, 0, 0]);

        assert_eq!(emu.exec(SLICE, false), ExecState::Send);
        let tx = emu.pool().tx();
        assert_eq!(tx.state, EbufState::Send);
        assert_eq!(tx.station, 5);
        assert_eq!(tx.port, 0x99);
        assert_eq!(tx.payload(), b"hello");

        emu.load_a(result::TRANSMIT_OK);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().read(0x20), 0x00);
    }

    #[test]
    fn test_transmit_refused_without_suspending() {
        let mut emu = emulator(&transmit_program());
        // control byte without the high bit
        set_block(&mut emu, &[0x00, 0x99, 5, 0, 0x00, 0x10, 0, 0, 0x05, 0x10, 0, 0]);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().read(0x20), result::TRANSMIT_FAILED);
        assert!(emu.pool().tx().is_void());
    }

    fn scsi_block(cmd: u8, addr: u32, sector: u32, count: u8, len: u32) -> Vec<u8> {
        let mut b = vec![0xFF];
        b.extend_from_slice(&addr.to_le_bytes());
        b.push(cmd);
        b.extend_from_slice(&[(sector >> 16) as u8, (sector >> 8) as u8, sector as u8]);
        b.push(count);
        b.push(0);
        b.extend_from_slice(&len.to_le_bytes());
        b
    }

    #[test]
    fn test_scsi_write_then_read() {
        let mut emu = emulator(&osword_call(0x72));
        emu.memory_mut().slice_mut(0x2000, SECTOR_SIZE).unwrap().fill(0xA5);
        set_block(&mut emu, &scsi_block(SCSI_WRITE, 0x2000, 2, 1, 0));
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(block(&emu).byte(0), 0);
        assert!(emu.disk().data()[2 * SECTOR_SIZE..3 * SECTOR_SIZE]
            .iter()
            .all(|&b| b == 0xA5));

        // Count 0: explicit byte length, into host memory.
        emu.load(0x0400, &osword_call(0x72)).unwrap();
        set_block(&mut emu, &scsi_block(SCSI_READ, 0xFFFF_0100, 2, 0, 16));
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(block(&emu).byte(0), 0);
        assert_eq!(emu.memory().slice(0x0001_0100, 16).unwrap(), &[0xA5; 16]);
    }

    #[test]
    fn test_scsi_short_read_reports_error() {
        let mut emu = emulator(&osword_call(0x72));
        set_block(&mut emu, &scsi_block(SCSI_READ, 0x2000, 7, 2, 0));
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(block(&emu).byte(0), result::SCSI_ERROR);
    }

    #[test]
    fn test_scsi_unknown_command_halts() {
        let mut emu = emulator(&osword_call(0x72));
        set_block(&mut emu, &scsi_block(0x15, 0x2000, 0, 1, 0));
        assert_eq!(
            emu.exec(SLICE, false),
            ExecState::Break(HaltReason::UnsupportedScsiCommand(0x15))
        );
    }

    /// `JSR $0410; STX $21; BRK`, subroutine `LDA #$33; LDX #1; LDY #wait; JSR OSBYTE`.
    fn poll_program(wait_class: u8) -> Vec<u8> {
        let mut program = vec![0x20, 0x10, 0x04, 0x86, 0x21, 0x00];
        program.resize(0x10, 0xEA);
        program.extend_from_slice(&[0xA9, 0x33, 0xA2, 0x01, 0xA0, wait_class, 0x20, 0xF4, 0xFF]);
        program
    }

    #[test]
    fn test_poll_receive_short_returns_nothing() {
        let mut emu = emulator(&poll_program(wait::SHORT));
        emu.memory_mut().write(0x21, 0xFF);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().read(0x21), result::NOTHING_RECEIVED);
        assert_eq!(emu.pool().listener(), None);
    }

    #[test]
    fn test_poll_receive_waits_and_resumes() {
        let mut emu = emulator(&poll_program(wait::EVENT));
        assert_eq!(emu.exec(SLICE, false), ExecState::WaitForEvent);
        assert_eq!(emu.pool().listener(), Some(1));

        emu.load_x(result::DATA_RECEIVED);
        assert!(emu.cpu().regs.flags.n);
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().read(0x21), result::DATA_RECEIVED);

        let mut emu = emulator(&poll_program(3));
        assert_eq!(emu.exec(SLICE, false), ExecState::WaitTimeout);
    }

    #[test]
    fn test_stub_osbytes() {
        // LDA #$85; JSR OSBYTE; STX $20; STY $21; BRK
        let mut emu = emulator(&[0xA9, 0x85, 0x20, 0xF4, 0xFF, 0x86, 0x20, 0x84, 0x21, 0x00]);
        emu.memory_mut().store(0x20, &[0xFF, 0xFF]).unwrap();
        assert!(is_brk(emu.exec(SLICE, false)));
        assert_eq!(emu.memory().slice(0x20, 2).unwrap(), &[0x00, 0x80]);
    }

    #[test]
    fn test_key_event_delivery() {
        // LDA #$0E; JSR OSBYTE; loop: JMP loop
        let mut emu = emulator(&[0xA9, 0x0E, 0x20, 0xF4, 0xFF, 0x4C, 0x05, 0x04]);
        assert_eq!(emu.send_key(SLICE, b'M'), None);

        assert_eq!(emu.exec(Duration::from_millis(5), false), ExecState::Busy);
        assert!(emu.key_events_enabled());

        // Handler: STY $30; STA $31; RTS
        emu.memory_mut().store(0x0600, &[0x84, 0x30, 0x85, 0x31, 0x60]).unwrap();
        emu.memory_mut().store(vector::EVENT as u32, &[0x00, 0x06]).unwrap();
        let before = emu.cpu().regs;

        assert_eq!(emu.send_key(SLICE, b'M'), Some(ExecState::Busy));
        assert_eq!(emu.memory().read(0x30), b'M');
        assert_eq!(emu.memory().read(0x31), KEY_EVENT);
        assert_eq!(emu.cpu().regs.pc, before.pc);
        assert_eq!(emu.cpu().regs.a, before.a);
        assert_eq!(emu.cpu().regs.y, before.y);
    }
}
