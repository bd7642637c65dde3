//! Econet over UDP: the buffer pool the hosted program drives through OSWORD
//! and OSBYTE, and the AUN engine that moves those buffers on the wire.

pub mod aun;
pub mod ebuf;
pub mod packet;
pub mod transport;

pub use aun::{local_endpoint, Addressing, AunEngine, RxOutcome};
pub use ebuf::{Ebuf, EbufPool, EbufState, MAX_BUFFERS, TX_SLOT};
pub use packet::{AunHeader, AunType, HEADER_SIZE};
pub use transport::{MemoryTransport, Transport, UdpTransport, POLL_TIMEOUT};
