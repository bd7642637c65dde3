//! Host loop driving the emulator and the AUN engine.
//!
//! The emulator runs in slices until the file server suspends itself to send
//! a packet or to wait for one. The loop then drives the engine, watches the
//! clock and the keyboard, and resumes the emulator with the outcome in A or
//! X.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::FsemConfig;
use crate::console::Console;
use crate::econet::{AunEngine, RxOutcome, Transport, UdpTransport, POLL_TIMEOUT};
use crate::emulator::FileServerEmulator;
use crate::error::{FsemResult, HaltReason};
use crate::mos::result;
use crate::scsi::{BlockStore, FileBlockStore};
use crate::ExecState;

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// The operator pressed `q`.
    Quit,
    /// The hosted program hit a fatal condition.
    Halted(HaltReason),
}

/// What the loop is doing between emulator slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Execute a slice every iteration.
    Running,
    /// Execution disabled from the keyboard.
    Paused,
    /// Waiting for data; `None` waits until data or a key press.
    Receiving { deadline: Option<Instant> },
    /// Waiting for the Ack to transmission `attempt`.
    Transmitting { attempt: u32, deadline: Instant },
}

/// How a suspended OS call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    /// Wait timed out or a key was pressed.
    Nothing,
    Data,
    Acked,
    TransmitFailed,
}

/// The file server host.
pub struct FileServer<C: Console, B: BlockStore, T: Transport> {
    emulator: FileServerEmulator<C, B>,
    engine: AunEngine<T>,
    mode: Mode,
    slice: Duration,
    tx_attempts: u32,
    ack_timeout: Duration,
    rx_timeout: Duration,
}

impl<C: Console> FileServer<C, FileBlockStore, UdpTransport> {
    /// Load the image, open the disk and bind the socket described by
    /// `config`.
    pub fn open(config: &FsemConfig, console: C) -> FsemResult<Self> {
        config.validate()?;
        let station = config.station_number()?;
        let image = std::fs::read(&config.image)?;
        let disk = FileBlockStore::open(&config.disk)?;

        let mut emulator =
            FileServerEmulator::new(console, disk, station).with_setup(config.setup_answers());
        emulator.load(config.load_address()?, &image)?;
        info!(image = %config.image.display(), disk = %config.disk.display(), "file server ready");

        let engine = AunEngine::open(station, config.listen_addr, POLL_TIMEOUT)?;
        info!(station, addressing = ?engine.addressing(), "AUN socket bound");
        Ok(Self::new(emulator, engine, config))
    }
}

impl<C: Console, B: BlockStore, T: Transport> FileServer<C, B, T> {
    pub fn new(
        emulator: FileServerEmulator<C, B>,
        engine: AunEngine<T>,
        config: &FsemConfig,
    ) -> Self {
        Self {
            emulator,
            engine,
            mode: Mode::Running,
            slice: config.exec_slice(),
            tx_attempts: config.tx_attempts.max(1),
            ack_timeout: config.ack_timeout(),
            rx_timeout: config.rx_timeout(),
        }
    }

    pub fn emulator(&self) -> &FileServerEmulator<C, B> {
        &self.emulator
    }

    pub fn emulator_mut(&mut self) -> &mut FileServerEmulator<C, B> {
        &mut self.emulator
    }

    pub fn engine(&self) -> &AunEngine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut AunEngine<T> {
        &mut self.engine
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Loop until the operator quits or the program halts, then flush the
    /// disk.
    pub fn run(&mut self) -> FsemResult<Stop> {
        let stop = loop {
            if let Some(stop) = self.poll()? {
                break stop;
            }
        };
        self.emulator.flush()?;
        info!(?stop, "file server stopped");
        Ok(stop)
    }

    /// One iteration of the host loop.
    pub fn poll(&mut self) -> FsemResult<Option<Stop>> {
        if self.mode == Mode::Running {
            match self.emulator.exec(self.slice, false) {
                ExecState::Busy => {}
                ExecState::Break(reason) => return Ok(Some(Stop::Halted(reason))),
                ExecState::WaitForEvent => self.mode = Mode::Receiving { deadline: None },
                ExecState::WaitTimeout => {
                    self.mode = Mode::Receiving {
                        deadline: Some(Instant::now() + self.rx_timeout),
                    }
                }
                ExecState::Send => self.send_attempt(0)?,
            }
        }

        if self.emulator.console().has_key() {
            if let Some(key) = self.emulator.console_mut().get_key() {
                if let Some(stop) = self.on_key(key)? {
                    return Ok(Some(stop));
                }
            }
        }

        match self.mode {
            Mode::Running => {}
            Mode::Paused => {
                // Keep answering peeks; nothing is armed to deliver into.
                self.engine.receive(self.emulator.pool_mut(), false)?;
            }
            Mode::Receiving { deadline } => {
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    debug!("receive wait timed out");
                    self.complete(Completion::Nothing);
                } else if self.engine.receive(self.emulator.pool_mut(), false)?
                    == RxOutcome::DataReceived
                {
                    self.complete(Completion::Data);
                }
            }
            Mode::Transmitting { attempt, deadline } => {
                if Instant::now() >= deadline {
                    if attempt + 1 < self.tx_attempts {
                        debug!(attempt, "no ack, retrying");
                        self.send_attempt(attempt + 1)?;
                    } else {
                        info!(attempts = self.tx_attempts, "transmit failed, no ack");
                        self.complete(Completion::TransmitFailed);
                    }
                } else if self.engine.receive(self.emulator.pool_mut(), true)?
                    == RxOutcome::AckReceived
                {
                    self.complete(Completion::Acked);
                }
            }
        }
        Ok(None)
    }

    fn on_key(&mut self, key: u8) -> FsemResult<Option<Stop>> {
        match key.to_ascii_lowercase() {
            b'q' => {
                info!("quit");
                return Ok(Some(Stop::Quit));
            }
            b'x' => {
                info!("execution enabled");
                self.mode = Mode::Running;
                // Listen once more; data for the armed block ends its wait.
                let outcome = self.engine.receive(self.emulator.pool_mut(), false)?;
                if outcome == RxOutcome::DataReceived {
                    self.complete(Completion::Data);
                }
            }
            b'z' => {
                info!("execution disabled");
                if self.mode == Mode::Running {
                    self.mode = Mode::Paused;
                }
            }
            b'm' => return Ok(self.deliver_key(b'M')),
            b'r' => return Ok(self.deliver_key(b'Q')),
            other => debug!(key = other, "unbound key"),
        }
        Ok(None)
    }

    /// Pass a key to the file server's event handler. Ignored during the
    /// bounded receive wait; ends an unbounded one.
    fn deliver_key(&mut self, key: u8) -> Option<Stop> {
        if let Mode::Receiving { deadline: Some(_) } = self.mode {
            debug!(key, "key ignored during timed wait");
            return None;
        }
        if let Some(ExecState::Break(reason)) = self.emulator.send_key(self.slice, key) {
            return Some(Stop::Halted(reason));
        }
        if self.mode == (Mode::Receiving { deadline: None }) {
            self.complete(Completion::Nothing);
        }
        None
    }

    fn send_attempt(&mut self, attempt: u32) -> FsemResult<()> {
        if self.engine.transmit(self.emulator.pool_mut(), attempt > 0)? {
            self.mode = Mode::Transmitting {
                attempt,
                deadline: Instant::now() + self.ack_timeout,
            };
        } else {
            self.complete(Completion::TransmitFailed);
        }
        Ok(())
    }

    /// Hand the outcome back and resume execution.
    fn complete(&mut self, completion: Completion) {
        debug!(?completion, pool = ?self.emulator.pool().describe(), "resuming file server");
        match completion {
            Completion::Nothing => self.emulator.load_x(result::NOTHING_RECEIVED),
            Completion::Data => self.emulator.load_x(result::DATA_RECEIVED),
            Completion::Acked => self.emulator.load_a(result::TRANSMIT_OK),
            Completion::TransmitFailed => self.emulator.load_a(result::TRANSMIT_FAILED),
        }
        self.emulator.pool_mut().listen(None);
        self.mode = Mode::Running;
    }
}
