//! Econet buffer pool.
//!
//! A handful of fixed slots describe packets in flight. Slot 0 is the one
//! transmit buffer; slots 1.. are receive control blocks registered by the
//! hosted program. At most one receive slot is armed as the listener that an
//! inbound packet may be delivered into.

use tracing::{debug, warn};

use super::packet::HEADER_SIZE;
use crate::error::FsemResult;

/// Number of slots in the pool.
pub const MAX_BUFFERS: usize = 5;

/// Index of the transmit slot.
pub const TX_SLOT: usize = 0;

/// Slot lifecycle.
///
/// Only Void, Listening, Received and Send are reached; the rest describe a
/// fuller transmit pipeline and are kept so slot states stay comparable with
/// the hosted program's own numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EbufState {
    #[default]
    Void = 0,
    Listening = 1,
    Received = 2,
    Send = 3,
    Sending = 4,
    Send2 = 5,
    Sending2 = 6,
    Sent = 7,
}

/// One buffer descriptor.
#[derive(Debug, Clone, Default)]
pub struct Ebuf {
    pub index: usize,
    pub state: EbufState,
    /// Remote station; 0 is a wildcard on receive blocks.
    pub station: u16,
    /// Econet port; 0 is a wildcard on receive blocks.
    pub port: u8,
    pub control: u8,
    /// Receive capacity while listening, payload length once bound.
    pub len: usize,
    /// Target address in the memory image.
    pub addr: u32,
    /// Wire bytes: header followed by payload.
    raw: Option<Vec<u8>>,
}

impl Ebuf {
    /// Wire bytes including the header.
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn raw_mut(&mut self) -> Option<&mut [u8]> {
        self.raw.as_deref_mut()
    }

    /// Payload view: the wire bytes after the header.
    pub fn payload(&self) -> &[u8] {
        self.raw
            .as_deref()
            .map(|raw| &raw[HEADER_SIZE.min(raw.len())..])
            .unwrap_or(&[])
    }

    pub fn is_void(&self) -> bool {
        self.state == EbufState::Void
    }
}

/// The fixed pool of buffer descriptors.
#[derive(Debug, Clone)]
pub struct EbufPool {
    slots: Vec<Ebuf>,
    listener: Option<usize>,
}

impl Default for EbufPool {
    fn default() -> Self {
        Self::new(MAX_BUFFERS)
    }
}

impl EbufPool {
    /// Create a pool with `count` slots (at least one, the transmit slot).
    pub fn new(count: usize) -> Self {
        let slots = (0..count.max(1))
            .map(|index| Ebuf {
                index,
                ..Ebuf::default()
            })
            .collect();
        Self {
            slots,
            listener: None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Ebuf> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Ebuf> {
        self.slots.get_mut(slot)
    }

    /// The transmit slot.
    pub fn tx(&self) -> &Ebuf {
        &self.slots[TX_SLOT]
    }

    /// First free receive slot.
    pub fn allocate_receive_slot(&mut self) -> Option<usize> {
        self.slots
            .iter()
            .skip(1)
            .find(|slot| slot.is_void())
            .map(|slot| slot.index)
    }

    /// Stage `payload` in the transmit slot behind room for a header.
    pub fn stage_transmit(&mut self, payload: &[u8]) -> FsemResult<&mut Ebuf> {
        let mut raw = Vec::new();
        raw.try_reserve_exact(HEADER_SIZE + payload.len())?;
        raw.resize(HEADER_SIZE, 0);
        raw.extend_from_slice(payload);

        let tx = &mut self.slots[TX_SLOT];
        tx.len = payload.len();
        tx.raw = Some(raw);
        Ok(tx)
    }

    /// Attach wire bytes to a slot, or clear them with `None`.
    pub fn bind(&mut self, slot: usize, raw: Option<Vec<u8>>) {
        if let Some(ebuf) = self.slots.get_mut(slot) {
            ebuf.len = raw
                .as_ref()
                .map_or(0, |raw| raw.len().saturating_sub(HEADER_SIZE));
            ebuf.raw = raw;
        }
    }

    /// Arm `slot` as the single listener, or disarm with `None`.
    /// Arming replaces any listener already armed; slot 0 disarms.
    pub fn listen(&mut self, slot: Option<usize>) {
        if let (Some(old), Some(new)) = (self.listener, slot) {
            if old != new {
                debug!(old, new, "replacing armed listener");
            }
        }
        if let Some(s) = slot.filter(|&s| s >= self.slots.len()) {
            warn!(slot = s, "refusing to arm listener on a slot outside the pool");
        }
        self.listener = slot.filter(|&s| s != TX_SLOT && s < self.slots.len());
    }

    pub fn listener(&self) -> Option<usize> {
        self.listener
    }

    /// Take the armed listener if it accepts packets from `station` on `port`.
    pub fn find_listener(&mut self, station: u16, port: u8) -> Option<usize> {
        let slot = self.listener?;
        let ebuf = &self.slots[slot];
        let port_ok = ebuf.port == 0 || ebuf.port == port;
        let station_ok = ebuf.station == 0 || ebuf.station == station;
        if port_ok && station_ok {
            self.listener = None;
            Some(slot)
        } else {
            None
        }
    }

    /// Free a slot's storage and mark it Void.
    pub fn release(&mut self, slot: usize) {
        if let Some(ebuf) = self.slots.get_mut(slot) {
            ebuf.state = EbufState::Void;
            ebuf.raw = None;
        }
    }

    /// One line per occupied slot, for debug logging.
    pub fn describe(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|slot| !slot.is_void())
            .map(|slot| {
                format!(
                    "ebuf index={} state={:?} stn={:#x} port={:#x} len={:#x} raw={:#x}",
                    slot.index,
                    slot.state,
                    slot.station,
                    slot.port,
                    slot.len,
                    slot.raw.as_ref().map_or(0, Vec::len),
                )
            })
            .collect()
    }
}
