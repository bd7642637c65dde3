//! AUN datagram framing.
//!
//! Every datagram starts with an 8-byte header:
//!
//! ```text
//! 0      type
//! 1      port
//! 2      control byte
//! 3      padding (0)
//! 4..8   handle, little-endian u32
//! ```

/// Header length in bytes.
pub const HEADER_SIZE: usize = 8;

/// Largest datagram accepted from the socket.
pub const MAX_DATAGRAM: usize = 2048;

/// Immediate operation control code: machine type query.
pub const IMMEDIATE_MACHINE_PEEK: u8 = 8;

/// Reply payload to a machine peek: BBC Micro running NFS 3.60.
pub const MACHINE_PEEK_REPLY: [u8; 4] = [1, 0, 0x60, 3];

/// AUN packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AunType {
    Broadcast = 1,
    Unicast = 2,
    Ack = 3,
    Nack = 4,
    Immediate = 5,
    ImmediateReply = 6,
}

impl TryFrom<u8> for AunType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Broadcast),
            2 => Ok(Self::Unicast),
            3 => Ok(Self::Ack),
            4 => Ok(Self::Nack),
            5 => Ok(Self::Immediate),
            6 => Ok(Self::ImmediateReply),
            _ => Err(value),
        }
    }
}

/// Decoded AUN header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AunHeader {
    /// Raw type byte; see [`AunType`].
    pub kind: u8,
    pub port: u8,
    pub control: u8,
    pub handle: u32,
}

impl AunHeader {
    pub fn new(kind: AunType, port: u8, control: u8, handle: u32) -> Self {
        Self {
            kind: kind as u8,
            port,
            control,
            handle,
        }
    }

    /// Parse the header at the front of `datagram`.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let h: &[u8; HEADER_SIZE] = datagram.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            kind: h[0],
            port: h[1],
            control: h[2],
            handle: u32::from_le_bytes([h[4], h[5], h[6], h[7]]),
        })
    }

    pub fn kind(&self) -> Result<AunType, u8> {
        AunType::try_from(self.kind)
    }

    /// Encode into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].copy_from_slice(&self.to_bytes());
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let [h0, h1, h2, h3] = self.handle.to_le_bytes();
        [self.kind, self.port, self.control, 0, h0, h1, h2, h3]
    }
}
