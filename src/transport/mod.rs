//! QUIC transport boundary: identifiers, wire headers and the capabilities
//! the server core drives.

pub mod clock;
pub mod connection;
pub mod packet;
pub mod writer;

pub use clock::{Clock, MonotonicClock};
pub use connection::{
    ConnectionId, QuicConnection, QuicVersion, SequenceNumber, StreamFrame, StreamId,
    CRYPTO_STREAM_ID,
};
pub use packet::{PublicHeader, PublicResetPacket};
pub use writer::{BlockedWriter, PacketWriter, WriteResult};
