//! Runtime configuration.
//!
//! Read from an optional JSON file; every field has a default so an empty
//! object (or no file at all) gives the stock setup.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::emulator::SetupAnswers;
use crate::error::{FsemError, FsemResult};

/// Emulator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FsemConfig {
    /// Our station number, 1..=254.
    pub station: u16,
    /// Bind this address on the fixed host port and address peers by IP.
    pub listen_addr: Option<Ipv4Addr>,
    /// File server image.
    pub image: PathBuf,
    /// Load address, hex with optional 0x prefix.
    pub load_address: String,
    /// SCSI disk image.
    pub disk: PathBuf,
    /// Answer to the drive count prompt.
    pub drives: u8,
    /// Answer to the station count prompt.
    pub stations: u8,
    /// Longest uninterrupted execution slice.
    pub exec_slice_ms: u64,
    /// Transmit attempts before reporting failure.
    pub tx_attempts: u32,
    /// Wait for an Ack after each attempt.
    pub ack_timeout_secs: u64,
    /// Bounded poll-receive wait.
    pub rx_timeout_secs: u64,
}

impl Default for FsemConfig {
    fn default() -> Self {
        Self {
            station: 254,
            listen_addr: None,
            image: PathBuf::from("$.FS"),
            load_address: "0x0400".to_string(),
            disk: PathBuf::from("scsi1.dat"),
            drives: 1,
            stations: 10,
            exec_slice_ms: 1000,
            tx_attempts: 10,
            ack_timeout_secs: 1,
            rx_timeout_secs: 60,
        }
    }
}

impl FsemConfig {
    /// Load and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> FsemResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that serde cannot express.
    pub fn validate(&self) -> FsemResult<()> {
        if self.station == 0 || self.station >= 255 {
            return Err(FsemError::InvalidStation(self.station));
        }
        if self.tx_attempts == 0 {
            return Err(FsemError::Config("txAttempts must be at least 1".into()));
        }
        self.load_address()?;
        Ok(())
    }

    /// The station number as the wire byte.
    pub fn station_number(&self) -> FsemResult<u8> {
        match u8::try_from(self.station) {
            Ok(s) if s != 0 && s != 255 => Ok(s),
            _ => Err(FsemError::InvalidStation(self.station)),
        }
    }

    pub fn load_address(&self) -> FsemResult<u16> {
        parse_address(&self.load_address)
    }

    pub fn setup_answers(&self) -> SetupAnswers {
        SetupAnswers {
            drives: self.drives,
            stations: self.stations,
        }
    }

    pub fn exec_slice(&self) -> Duration {
        Duration::from_millis(self.exec_slice_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn rx_timeout(&self) -> Duration {
        Duration::from_secs(self.rx_timeout_secs)
    }
}

/// Parse a hex address such as `0x0400`, `0X400` or `400`.
pub fn parse_address(s: &str) -> FsemResult<u16> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16)
        .map_err(|e| FsemError::Config(format!("bad load address {s:?}: {e}")))
}
