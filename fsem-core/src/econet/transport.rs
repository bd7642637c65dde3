//! Datagram transport under the AUN engine.

use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::FsemResult;

/// Receive timeout so the host loop regains control regularly.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(1000 / 3);

/// A datagram socket. IPv4 only, as AUN is.
pub trait Transport: Send {
    /// Wait briefly for a datagram. `Ok(None)` when nothing arrived in time.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddrV4)>>;

    /// Send one datagram.
    fn send_to(&mut self, datagram: &[u8], peer: SocketAddrV4) -> io::Result<()>;
}

/// UDP socket with a short read timeout.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to `local` and set the poll timeout.
    pub fn bind(local: SocketAddrV4, poll: Duration) -> FsemResult<Self> {
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(poll))?;
        info!(%local, "AUN socket bound");
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddrV4)>> {
        match self.socket.recv_from(buf) {
            Ok((len, SocketAddr::V4(peer))) => Ok(Some((len, peer))),
            Ok((_, peer)) => {
                debug!(%peer, "ignoring non-IPv4 datagram");
                Ok(None)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn send_to(&mut self, datagram: &[u8], peer: SocketAddrV4) -> io::Result<()> {
        self.socket.send_to(datagram, peer)?;
        Ok(())
    }
}

/// In-memory datagram queue standing in for a socket.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: VecDeque<(Vec<u8>, SocketAddrV4)>,
    sent: Vec<(Vec<u8>, SocketAddrV4)>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a datagram as if it arrived from `peer`.
    pub fn push_inbound(&mut self, datagram: impl Into<Vec<u8>>, peer: SocketAddrV4) {
        self.inbound.push_back((datagram.into(), peer));
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Datagrams sent so far, oldest first.
    pub fn sent(&self) -> &[(Vec<u8>, SocketAddrV4)] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<(Vec<u8>, SocketAddrV4)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddrV4)>> {
        let Some((datagram, peer)) = self.inbound.pop_front() else {
            return Ok(None);
        };
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(Some((len, peer)))
    }

    fn send_to(&mut self, datagram: &[u8], peer: SocketAddrV4) -> io::Result<()> {
        self.sent.push((datagram.to_vec(), peer));
        Ok(())
    }
}
