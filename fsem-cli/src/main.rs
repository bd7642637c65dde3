//! Econet file server emulator CLI.
//!
//! Usage:
//!   fsem [-s station] [-a listen-address] [--config fsem.json]
//!
//! Keys while running:
//!   q  quit
//!   x  force execution on
//!   z  pause execution
//!   m  send the file server an M key event (monitor on/off)
//!   r  send the file server a Q key event (restart)

use std::cell::Cell;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fsem_core::{Console, FileServer, FsemConfig, FsemResult, Stop};

/// Econet file server emulator
#[derive(Parser, Debug)]
#[command(name = "fsem")]
#[command(about = "Run an Econet file server image over AUN")]
struct Args {
    /// Econet station number (1-254)
    #[arg(short, long)]
    station: Option<u16>,

    /// Bind this address on port 32768 and address peers by IP
    #[arg(short = 'a', long)]
    listen_addr: Option<Ipv4Addr>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File server image
    #[arg(long)]
    image: Option<PathBuf>,

    /// SCSI disk image
    #[arg(long)]
    disk: Option<PathBuf>,

    /// Load address of the image (hex)
    #[arg(long)]
    load_address: Option<String>,

    /// Log every OS call and packet
    #[arg(short, long)]
    trace: bool,
}

impl Args {
    /// Config file (or defaults) with command line overrides applied.
    fn into_config(self) -> FsemResult<FsemConfig> {
        let mut config = match &self.config {
            Some(path) => FsemConfig::from_path(path)?,
            None => FsemConfig::default(),
        };
        if let Some(station) = self.station {
            config.station = station;
        }
        if self.listen_addr.is_some() {
            config.listen_addr = self.listen_addr;
        }
        if let Some(image) = self.image {
            config.image = image;
        }
        if let Some(disk) = self.disk {
            config.disk = disk;
        }
        if let Some(load_address) = self.load_address {
            config.load_address = load_address;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Console fed by the terminal input task; output goes straight to stdout.
struct ChannelConsole {
    key_rx: mpsc::Receiver<u8>,
    peeked: Cell<Option<u8>>,
}

impl ChannelConsole {
    fn new(key_rx: mpsc::Receiver<u8>) -> Self {
        Self {
            key_rx,
            peeked: Cell::new(None),
        }
    }
}

impl Console for ChannelConsole {
    fn write(&mut self, ch: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = match ch {
            0x07 => handle.write_all(b"\x07"),
            0x08 => handle.write_all(b"\x08 \x08"),
            0x0A | 0x0D | 0x20..=0x7E => handle.write_all(&[ch]),
            // Other VDU codes have no terminal equivalent
            _ => Ok(()),
        };
        let _ = handle.flush();
    }

    fn has_key(&self) -> bool {
        if self.peeked.get().is_some() {
            return true;
        }
        match self.key_rx.try_recv() {
            Ok(key) => {
                self.peeked.set(Some(key));
                true
            }
            Err(_) => false,
        }
    }

    fn get_key(&mut self) -> Option<u8> {
        self.peeked.take().or_else(|| self.key_rx.try_recv().ok())
    }
}

/// Translate crossterm key events to the scheduler's key bytes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return Some(b'q');
    }
    match code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Esc => Some(27),
        _ => None,
    }
}

fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.trace);

    let config = args.into_config()?;
    info!(
        station = config.station,
        image = %config.image.display(),
        disk = %config.disk.display(),
        "File Server Emulator"
    );

    // Create channel for keyboard input
    let (key_tx, key_rx) = mpsc::channel::<u8>();

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = tokio_mpsc::channel::<()>(1);

    let console = ChannelConsole::new(key_rx);

    // Enable raw mode (gracefully handle non-TTY)
    let raw_mode_enabled = enable_raw_mode().is_ok();

    // The host loop blocks on the socket, so it gets its own thread
    let server_handle = tokio::task::spawn_blocking(move || -> FsemResult<Stop> {
        let mut server = FileServer::open(&config, console)?;
        server.run()
    });

    // Spawn terminal input reader
    let input_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    if event::poll(Duration::from_millis(0)).unwrap_or(false) {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if key_event.kind != KeyEventKind::Press {
                                continue;
                            }
                            if let Some(ch) = translate_key(key_event.code, key_event.modifiers) {
                                if key_tx.send(ch).is_err() {
                                    break; // Channel closed
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    let result = server_handle.await?;

    // Signal input handler to stop
    let _ = shutdown_tx.send(()).await;
    let _ = input_handle.await;

    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    match result {
        Ok(Stop::Quit) => Ok(()),
        Ok(Stop::Halted(reason)) => {
            error!(%reason, "file server halted");
            Err(reason.into())
        }
        Err(e) => {
            error!(%e, "file server failed");
            Err(e.into())
        }
    }
}
