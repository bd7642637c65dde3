//! AUN peer protocol engine.
//!
//! Maps UDP peers to Econet station numbers, acknowledges and de-duplicates
//! inbound Unicast data by handle, answers machine-type peeks and sends the
//! contents of the transmit slot with per-station handle sequencing.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::ebuf::{EbufPool, EbufState, TX_SLOT};
use super::packet::{
    AunHeader, AunType, HEADER_SIZE, IMMEDIATE_MACHINE_PEEK, MACHINE_PEEK_REPLY, MAX_DATAGRAM,
};
use super::transport::{Transport, UdpTransport};
use crate::error::{FsemError, FsemResult};

/// UDP port of station 0 in port-offset addressing.
pub const PORT_BASE: u16 = 10000;

/// Fixed port used by hosts that address stations by IP.
pub const HOST_PORT: u16 = 32768;

/// Size of the station table; valid stations are 1..=254.
pub const MAX_STATIONS: usize = 255;

/// How long an accepted handle suppresses redelivery.
pub const RX_WINDOW: Duration = Duration::from_secs(5);

/// How a peer's socket address maps to a station number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Station = source port - [`PORT_BASE`].
    PortOffset,
    /// Peers on [`HOST_PORT`] are the low byte of their IP; others fall back
    /// to port offset.
    HostLowByte,
}

/// Result of one receive poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Nothing of interest arrived.
    Idle,
    /// A Unicast was delivered into the armed listener.
    DataReceived,
    /// The outstanding transmission was acknowledged.
    AckReceived,
}

#[derive(Debug, Clone, Copy, Default)]
struct StationEntry {
    peer: Option<SocketAddrV4>,
    rx_handle: u32,
    rx_expiry: Option<Instant>,
    tx_handle: u32,
}

/// Local socket address and addressing mode for a station.
pub fn local_endpoint(station: u8, listen: Option<Ipv4Addr>) -> (SocketAddrV4, Addressing) {
    match listen {
        Some(ip) => (SocketAddrV4::new(ip, HOST_PORT), Addressing::HostLowByte),
        None => (
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, PORT_BASE + station as u16),
            Addressing::PortOffset,
        ),
    }
}

/// The protocol engine. Owns the transport and station table; borrows the
/// buffer pool per call.
pub struct AunEngine<T: Transport> {
    transport: T,
    local_station: u8,
    addressing: Addressing,
    stations: Vec<StationEntry>,
    /// Destination of the outstanding transmission.
    tx_station: Option<usize>,
    rx_buf: Vec<u8>,
}

impl AunEngine<UdpTransport> {
    /// Bind a UDP socket for `station`.
    pub fn open(station: u8, listen: Option<Ipv4Addr>, poll: Duration) -> FsemResult<Self> {
        if station == 0 || station as usize >= MAX_STATIONS {
            return Err(FsemError::InvalidStation(station as u16));
        }
        let (local, addressing) = local_endpoint(station, listen);
        let transport = UdpTransport::bind(local, poll)?;
        Ok(Self::new(transport, station, addressing))
    }
}

impl<T: Transport> AunEngine<T> {
    pub fn new(transport: T, local_station: u8, addressing: Addressing) -> Self {
        Self {
            transport,
            local_station,
            addressing,
            stations: vec![StationEntry::default(); MAX_STATIONS],
            tx_station: None,
            rx_buf: vec![0; MAX_DATAGRAM],
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn local_station(&self) -> u8 {
        self.local_station
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    /// Peer bound to `station`, if seen.
    pub fn peer(&self, station: u16) -> Option<SocketAddrV4> {
        self.stations.get(station as usize).and_then(|s| s.peer)
    }

    /// Last handle sent to `station`.
    pub fn tx_handle(&self, station: u16) -> Option<u32> {
        self.stations.get(station as usize).map(|s| s.tx_handle)
    }

    /// Station number a peer address claims.
    pub fn station_of(&self, peer: SocketAddrV4) -> u16 {
        match self.addressing {
            Addressing::HostLowByte if peer.port() == HOST_PORT => peer.ip().octets()[3] as u16,
            _ => peer.port().wrapping_sub(PORT_BASE),
        }
    }

    /// Poll the transport once and process at most one datagram.
    pub fn receive(&mut self, pool: &mut EbufPool, ack_wait: bool) -> FsemResult<RxOutcome> {
        self.receive_at(pool, ack_wait, Instant::now())
    }

    pub(crate) fn receive_at(
        &mut self,
        pool: &mut EbufPool,
        ack_wait: bool,
        now: Instant,
    ) -> FsemResult<RxOutcome> {
        let Some((len, peer)) = self.transport.recv_from(&mut self.rx_buf)? else {
            return Ok(RxOutcome::Idle);
        };
        let Some(header) = AunHeader::parse(&self.rx_buf[..len]) else {
            trace!(%peer, len, "runt datagram");
            return Ok(RxOutcome::Idle);
        };

        let station = self.station_of(peer);
        if station == 0 || station as usize >= MAX_STATIONS {
            warn!(%peer, station, "station number out of range");
            return Ok(RxOutcome::Idle);
        }
        if station == self.local_station as u16 {
            warn!(%peer, station, "peer claims our own station number");
            return Ok(RxOutcome::Idle);
        }

        let entry = &mut self.stations[station as usize];
        match entry.peer {
            None => {
                entry.peer = Some(peer);
                info!(station, %peer, "station bound");
            }
            Some(bound) if bound.ip() != peer.ip() => {
                warn!(station, %bound, %peer, "duplicate station");
                return Ok(RxOutcome::Idle);
            }
            Some(_) => {}
        }

        let datagram = self.rx_buf[..len].to_vec();
        match header.kind() {
            Ok(AunType::Unicast) => {
                self.on_unicast(pool, station, peer, header, datagram, ack_wait, now)
            }
            Ok(AunType::Ack) => Ok(self.on_ack(station, header, ack_wait)),
            Ok(AunType::Immediate) => {
                self.on_immediate(peer, header, &datagram)?;
                Ok(RxOutcome::Idle)
            }
            Ok(kind) => {
                trace!(station, ?kind, "ignored datagram");
                Ok(RxOutcome::Idle)
            }
            Err(kind) => {
                debug!(station, kind, "unknown datagram type");
                Ok(RxOutcome::Idle)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_unicast(
        &mut self,
        pool: &mut EbufPool,
        station: u16,
        peer: SocketAddrV4,
        header: AunHeader,
        datagram: Vec<u8>,
        ack_wait: bool,
        now: Instant,
    ) -> FsemResult<RxOutcome> {
        if ack_wait {
            trace!(station, "unicast ignored while awaiting ack");
            return Ok(RxOutcome::Idle);
        }

        let entry = self.stations[station as usize];
        let expired = entry.rx_expiry.map_or(true, |t| now > t);
        if header.handle == entry.rx_handle && !expired {
            debug!(station, handle = header.handle, "duplicate, re-acknowledging");
            self.send_ack(peer, &datagram)?;
            return Ok(RxOutcome::Idle);
        }
        if header.handle < entry.rx_handle && !expired {
            trace!(station, handle = header.handle, last = entry.rx_handle, "stale unicast");
            return Ok(RxOutcome::Idle);
        }

        // A fresh handle is recorded even if the packet is then dropped, so
        // its retries are only re-acknowledged.
        let entry = &mut self.stations[station as usize];
        entry.rx_handle = header.handle;
        entry.rx_expiry = Some(now + RX_WINDOW);

        let Some(slot) = pool.find_listener(station, header.port) else {
            warn!(station, port = header.port, "no receive block listening");
            return Ok(RxOutcome::Idle);
        };
        let payload_len = datagram.len() - HEADER_SIZE;
        let capacity = pool.get(slot).map_or(0, |ebuf| ebuf.len);
        if payload_len > capacity {
            warn!(station, slot, payload_len, capacity, "receive block too small");
            return Ok(RxOutcome::Idle);
        }

        self.send_ack(peer, &datagram)?;
        pool.bind(slot, Some(datagram));
        if let Some(ebuf) = pool.get_mut(slot) {
            ebuf.station = station;
            ebuf.port = header.port;
            ebuf.control = header.control | 0x80;
            ebuf.state = EbufState::Received;
        }
        debug!(station, slot, handle = header.handle, payload_len, "data received");
        Ok(RxOutcome::DataReceived)
    }

    fn on_ack(&self, station: u16, header: AunHeader, ack_wait: bool) -> RxOutcome {
        if !ack_wait || self.tx_station != Some(station as usize) {
            trace!(station, "unexpected ack");
            return RxOutcome::Idle;
        }
        let expected = self.stations[station as usize].tx_handle;
        if header.handle != expected {
            debug!(station, handle = header.handle, expected, "ack for another handle");
            return RxOutcome::Idle;
        }
        RxOutcome::AckReceived
    }

    fn on_immediate(
        &mut self,
        peer: SocketAddrV4,
        header: AunHeader,
        datagram: &[u8],
    ) -> FsemResult<()> {
        if header.control != IMMEDIATE_MACHINE_PEEK {
            debug!(%peer, control = header.control, "unsupported immediate operation");
            return Ok(());
        }
        let mut reply = [0u8; HEADER_SIZE + MACHINE_PEEK_REPLY.len()];
        reply[..HEADER_SIZE].copy_from_slice(&datagram[..HEADER_SIZE]);
        reply[0] = AunType::ImmediateReply as u8;
        reply[HEADER_SIZE..].copy_from_slice(&MACHINE_PEEK_REPLY);
        self.transport.send_to(&reply, peer)?;
        debug!(%peer, "answered machine peek");
        Ok(())
    }

    fn send_ack(&mut self, peer: SocketAddrV4, datagram: &[u8]) -> FsemResult<()> {
        let mut ack = [0u8; HEADER_SIZE];
        ack.copy_from_slice(&datagram[..HEADER_SIZE]);
        ack[0] = AunType::Ack as u8;
        self.transport.send_to(&ack, peer)?;
        Ok(())
    }

    /// Send the transmit slot. A retry reuses the previous handle.
    ///
    /// Returns false without sending if the destination is invalid or has
    /// never been seen.
    pub fn transmit(&mut self, pool: &mut EbufPool, retry: bool) -> FsemResult<bool> {
        let (station, port, control) = {
            let tx = pool.tx();
            (tx.station as usize, tx.port, tx.control)
        };
        if station == 0 || station >= MAX_STATIONS {
            warn!(station, "transmit to invalid station");
            return Ok(false);
        }
        let entry = &mut self.stations[station];
        let Some(peer) = entry.peer else {
            warn!(station, "transmit to unbound station");
            return Ok(false);
        };
        if !retry {
            entry.tx_handle = entry.tx_handle.wrapping_add(4);
        }
        let header = AunHeader::new(AunType::Unicast, port, control & 0x7F, entry.tx_handle);
        self.tx_station = Some(station);

        let Some(raw) = pool.get_mut(TX_SLOT).and_then(|tx| tx.raw_mut()) else {
            warn!(station, "transmit slot has nothing staged");
            return Ok(false);
        };
        header.write_to(raw);
        self.transport.send_to(raw, peer)?;
        debug!(station, %peer, handle = header.handle, retry, len = raw.len(), "transmitted");
        Ok(true)
    }
}
