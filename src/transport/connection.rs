//! QUIC connection identity and the transport connection capability.
//!
//! The server core never frames, encrypts or retransmits packets itself. It
//! drives an implementation of [`QuicConnection`] that does, and only asks it
//! to write stream data, close, or hand back decoded stream frames.

use crate::error::{ParseError, QuicErrorCode};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Stream identifier within a connection.
pub type StreamId = u32;

/// Packet sequence number (48 bits on the wire).
pub type SequenceNumber = u64;

/// Stream carrying the crypto handshake.
pub const CRYPTO_STREAM_ID: StreamId = 1;

/// QUIC connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Decode a connection ID from its 8-byte little-endian wire form.
    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// Get the wire form of the connection ID.
    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// QUIC versions understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QuicVersion {
    Q018,
    Q019,
    Q021,
    Q022,
    Q023,
}

impl QuicVersion {
    /// All supported versions, newest first.
    pub fn all() -> &'static [QuicVersion] {
        &[
            QuicVersion::Q023,
            QuicVersion::Q022,
            QuicVersion::Q021,
            QuicVersion::Q019,
            QuicVersion::Q018,
        ]
    }

    /// 4-byte version tag as carried in the public header.
    pub fn tag(self) -> [u8; 4] {
        match self {
            QuicVersion::Q018 => *b"Q018",
            QuicVersion::Q019 => *b"Q019",
            QuicVersion::Q021 => *b"Q021",
            QuicVersion::Q022 => *b"Q022",
            QuicVersion::Q023 => *b"Q023",
        }
    }

    /// Look up a version by its tag.
    pub fn from_tag(tag: [u8; 4]) -> Result<Self, ParseError> {
        Self::all()
            .iter()
            .copied()
            .find(|version| version.tag() == tag)
            .ok_or(ParseError::UnknownVersion)
    }
}

impl Default for QuicVersion {
    fn default() -> Self {
        QuicVersion::Q023
    }
}

impl fmt::Display for QuicVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        f.write_str(std::str::from_utf8(&tag).unwrap_or("Q???"))
    }
}

/// A chunk of stream data decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    /// Stream the data belongs to
    pub stream_id: StreamId,
    /// Frame payload
    pub data: Bytes,
    /// Whether the peer finished its side of the stream
    pub fin: bool,
}

impl StreamFrame {
    /// Create a new stream frame.
    pub fn new(stream_id: StreamId, data: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            stream_id,
            data: data.into(),
            fin,
        }
    }
}

/// The underlying transport connection a session drives.
///
/// Implementations own framing, encryption, congestion control and
/// retransmission. Stream writes are assumed to be buffered by the
/// connection when the packet writer is blocked.
pub trait QuicConnection {
    /// Connection identifier.
    fn connection_id(&self) -> ConnectionId;

    /// Negotiated version.
    fn version(&self) -> QuicVersion;

    /// Address of the client.
    fn peer_address(&self) -> SocketAddr;

    /// Send a connection close with `error` and stop accepting data.
    fn send_connection_close(&mut self, error: QuicErrorCode);

    /// Write (or buffer) data on a stream. Returns the number of bytes consumed.
    fn write_stream_data(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> usize;

    /// Decode a received datagram into the stream frames it carries.
    fn process_udp_packet(
        &mut self,
        server_address: SocketAddr,
        client_address: SocketAddr,
        packet: &[u8],
    ) -> Vec<StreamFrame>;

    /// Retry writes after the packet writer became writable.
    fn on_can_write(&mut self) {}

    /// Hand over the serialized connection close packet, if one was sent.
    fn take_connection_close_packet(&mut self) -> Option<Bytes> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_wire_form() {
        let bytes = [0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE];
        let id = ConnectionId::from_le_bytes(bytes);
        assert_eq!(id, ConnectionId(0xFEDC_BA98_7654_3210));
        assert_eq!(id.to_le_bytes(), bytes);
        assert_eq!(id.to_string(), "fedcba9876543210");
    }

    #[test]
    fn test_version_tags() {
        for &version in QuicVersion::all() {
            assert_eq!(QuicVersion::from_tag(version.tag()).unwrap(), version);
        }
        assert_eq!(QuicVersion::Q021.to_string(), "Q021");
        assert_eq!(
            QuicVersion::from_tag(*b"Q999"),
            Err(ParseError::UnknownVersion)
        );
    }
}
