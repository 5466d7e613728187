//! QUIC public header and public reset packet encoding.
//!
//! All multi-byte integers on this layer are little-endian. The server only
//! ever issues and accepts full 8-byte connection ids.

use crate::error::ParseError;
use crate::transport::{ConnectionId, QuicVersion, SequenceNumber};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Version tag present.
pub const PUBLIC_FLAGS_VERSION: u8 = 0x01;
/// Packet is a public reset.
pub const PUBLIC_FLAGS_RESET: u8 = 0x02;
/// Full 8-byte connection id.
pub const PUBLIC_FLAGS_8BYTE_CONNECTION_ID: u8 = 0x0C;
/// 6-byte sequence number.
pub const PUBLIC_FLAGS_6BYTE_SEQUENCE_NUMBER: u8 = 0x30;

const CONNECTION_ID_LENGTH_MASK: u8 = 0x0C;
const SEQUENCE_NUMBER_LENGTH_MASK: u8 = 0x30;

const TAG_PUBLIC_RESET: [u8; 4] = *b"PRST";
const TAG_NONCE_PROOF: [u8; 4] = *b"RNON";
const TAG_REJECTED_SEQUENCE_NUMBER: [u8; 4] = *b"RSEQ";
const TAG_CLIENT_ADDRESS: [u8; 4] = *b"CADR";

const ADDRESS_FAMILY_IPV4: u16 = 2;
const ADDRESS_FAMILY_IPV6: u16 = 10;

/// Unencrypted header in front of every packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicHeader {
    /// Connection the packet belongs to
    pub connection_id: ConnectionId,
    /// Whether this is a public reset
    pub reset_flag: bool,
    /// Version carried by the client, if the version flag is set
    pub version: Option<QuicVersion>,
    /// Packet sequence number (absent on public resets)
    pub sequence_number: Option<SequenceNumber>,
}

impl PublicHeader {
    /// Create a header for a regular data packet.
    pub fn new(connection_id: ConnectionId, sequence_number: SequenceNumber) -> Self {
        Self {
            connection_id,
            reset_flag: false,
            version: None,
            sequence_number: Some(sequence_number),
        }
    }

    /// Attach a version tag to the header.
    pub fn with_version(mut self, version: QuicVersion) -> Self {
        self.version = Some(version);
        self
    }

    /// Encode the header, always using a 6-byte sequence number.
    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(19);

        let mut flags = PUBLIC_FLAGS_8BYTE_CONNECTION_ID;
        if self.version.is_some() {
            flags |= PUBLIC_FLAGS_VERSION;
        }
        if self.reset_flag {
            flags |= PUBLIC_FLAGS_RESET;
        } else {
            flags |= PUBLIC_FLAGS_6BYTE_SEQUENCE_NUMBER;
        }
        buffer.put_u8(flags);
        buffer.put_u64_le(self.connection_id.0);

        if let Some(version) = self.version {
            buffer.put_slice(&version.tag());
        }

        if !self.reset_flag {
            let sequence_number = self.sequence_number.unwrap_or(0);
            buffer.put_slice(&sequence_number.to_le_bytes()[..6]);
        }

        buffer.freeze()
    }

    /// Decode a public header. Returns the header and the number of bytes consumed.
    pub fn decode(mut data: &[u8]) -> Result<(Self, usize), ParseError> {
        let original_len = data.len();

        if !data.has_remaining() {
            return Err(ParseError::InvalidFormat("Unable to read public flags.".to_string()));
        }
        let flags = data.get_u8();

        if flags & CONNECTION_ID_LENGTH_MASK != PUBLIC_FLAGS_8BYTE_CONNECTION_ID {
            return Err(ParseError::UnsupportedConnectionIdLength(
                flags & CONNECTION_ID_LENGTH_MASK,
            ));
        }
        if data.remaining() < 8 {
            return Err(ParseError::InvalidFormat("Unable to read ConnectionId.".to_string()));
        }
        let connection_id = ConnectionId(data.get_u64_le());

        let reset_flag = flags & PUBLIC_FLAGS_RESET != 0;
        if reset_flag {
            let header = Self {
                connection_id,
                reset_flag,
                version: None,
                sequence_number: None,
            };
            return Ok((header, original_len - data.remaining()));
        }

        let version = if flags & PUBLIC_FLAGS_VERSION != 0 {
            if data.remaining() < 4 {
                return Err(ParseError::InvalidFormat(
                    "Unable to read protocol version.".to_string(),
                ));
            }
            let mut tag = [0u8; 4];
            data.copy_to_slice(&mut tag);
            Some(QuicVersion::from_tag(tag)?)
        } else {
            None
        };

        let sequence_number_length = match flags & SEQUENCE_NUMBER_LENGTH_MASK {
            0x30 => 6,
            0x20 => 4,
            0x10 => 2,
            _ => 1,
        };
        if data.remaining() < sequence_number_length {
            return Err(ParseError::InvalidFormat(
                "Unable to read sequence number.".to_string(),
            ));
        }
        let sequence_number = data.get_uint_le(sequence_number_length);

        let header = Self {
            connection_id,
            reset_flag,
            version,
            sequence_number: Some(sequence_number),
        };
        Ok((header, original_len - data.remaining()))
    }
}

/// Public reset telling a peer its connection id is no longer known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicResetPacket {
    /// Connection being reset
    pub connection_id: ConnectionId,
    /// Proof the reset comes from the server
    pub nonce_proof: u64,
    /// Sequence number of the packet that triggered the reset
    pub rejected_sequence_number: SequenceNumber,
    /// Address the triggering packet came from
    pub client_address: Option<SocketAddr>,
}

impl PublicResetPacket {
    /// Serialize the reset packet.
    pub fn encode(&self) -> Bytes {
        let address = self.client_address.map(encode_socket_address);
        let num_entries: u16 = if address.is_some() { 3 } else { 2 };

        let mut buffer = BytesMut::with_capacity(64);
        buffer.put_u8(PUBLIC_FLAGS_RESET | PUBLIC_FLAGS_8BYTE_CONNECTION_ID);
        buffer.put_u64_le(self.connection_id.0);

        buffer.put_slice(&TAG_PUBLIC_RESET);
        buffer.put_u16_le(num_entries);
        buffer.put_u16_le(0);

        // Tag index, sorted by tag value, each with the end offset of its value.
        buffer.put_slice(&TAG_NONCE_PROOF);
        buffer.put_u32_le(8);
        buffer.put_slice(&TAG_REJECTED_SEQUENCE_NUMBER);
        buffer.put_u32_le(16);
        if let Some(address) = &address {
            buffer.put_slice(&TAG_CLIENT_ADDRESS);
            buffer.put_u32_le(16 + address.len() as u32);
        }

        buffer.put_u64_le(self.nonce_proof);
        buffer.put_u64_le(self.rejected_sequence_number);
        if let Some(address) = &address {
            buffer.put_slice(address);
        }

        buffer.freeze()
    }

    /// Parse a reset packet, rejecting trailing bytes.
    pub fn decode(mut data: &[u8]) -> Result<Self, ParseError> {
        let (header, consumed) = PublicHeader::decode(data)?;
        if !header.reset_flag {
            return Err(ParseError::InvalidFormat("Not a public reset packet.".to_string()));
        }
        data.advance(consumed);

        let message_error = || ParseError::InvalidFormat("Unable to read reset message.".to_string());

        if data.remaining() < 8 {
            return Err(message_error());
        }
        let mut tag = [0u8; 4];
        data.copy_to_slice(&mut tag);
        if tag != TAG_PUBLIC_RESET {
            return Err(message_error());
        }
        let num_entries = data.get_u16_le() as usize;
        data.advance(2);

        if data.remaining() < num_entries * 8 {
            return Err(message_error());
        }
        let mut entries = Vec::with_capacity(num_entries);
        let mut start = 0usize;
        for _ in 0..num_entries {
            let mut tag = [0u8; 4];
            data.copy_to_slice(&mut tag);
            let end = data.get_u32_le() as usize;
            if end < start {
                return Err(message_error());
            }
            entries.push((tag, start, end));
            start = end;
        }
        if data.remaining() != start {
            return Err(message_error());
        }

        let values = data;
        let mut nonce_proof = None;
        let mut rejected_sequence_number = None;
        let mut client_address = None;
        for (tag, start, end) in entries {
            let value = &values[start..end];
            match tag {
                TAG_NONCE_PROOF if value.len() == 8 => {
                    nonce_proof = Some((&value[..]).get_u64_le());
                }
                TAG_REJECTED_SEQUENCE_NUMBER if value.len() == 8 => {
                    rejected_sequence_number = Some((&value[..]).get_u64_le());
                }
                TAG_CLIENT_ADDRESS => {
                    client_address = Some(decode_socket_address(value).ok_or_else(message_error)?);
                }
                _ => {}
            }
        }

        Ok(Self {
            connection_id: header.connection_id,
            nonce_proof: nonce_proof.ok_or_else(message_error)?,
            rejected_sequence_number: rejected_sequence_number.ok_or_else(message_error)?,
            client_address,
        })
    }
}

fn encode_socket_address(address: SocketAddr) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(20);
    match address.ip() {
        IpAddr::V4(ip) => {
            buffer.put_u16_le(ADDRESS_FAMILY_IPV4);
            buffer.put_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buffer.put_u16_le(ADDRESS_FAMILY_IPV6);
            buffer.put_slice(&ip.octets());
        }
    }
    buffer.put_u16_le(address.port());
    buffer
}

fn decode_socket_address(mut data: &[u8]) -> Option<SocketAddr> {
    if data.remaining() < 2 {
        return None;
    }
    let ip = match data.get_u16_le() {
        ADDRESS_FAMILY_IPV4 if data.remaining() == 6 => {
            let mut octets = [0u8; 4];
            data.copy_to_slice(&mut octets);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        ADDRESS_FAMILY_IPV6 if data.remaining() == 18 => {
            let mut octets = [0u8; 16];
            data.copy_to_slice(&mut octets);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, data.get_u16_le()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION_ID: ConnectionId = ConnectionId(0xFEDC_BA98_7654_3210);

    #[test]
    fn test_decode_data_packet_header() {
        let packet = [
            0x3C, // public flags (8 byte connection_id, 6 byte sequence number)
            0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE, // connection_id
            0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, // sequence number
            0x00, // private flags
        ];

        let (header, consumed) = PublicHeader::decode(&packet).unwrap();
        assert_eq!(consumed, 15);
        assert_eq!(header.connection_id, CONNECTION_ID);
        assert!(!header.reset_flag);
        assert_eq!(header.version, None);
        assert_eq!(header.sequence_number, Some(0x1234_5678_9ABC));
    }

    #[test]
    fn test_decode_header_with_version_and_short_sequence_number() {
        let packet = [
            0x1D, // version, 8 byte connection_id, 2 byte sequence number
            0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE,
            b'Q', b'0', b'2', b'3',
            0xBC, 0x9A,
        ];

        let (header, consumed) = PublicHeader::decode(&packet).unwrap();
        assert_eq!(consumed, packet.len());
        assert_eq!(header.version, Some(QuicVersion::Q023));
        assert_eq!(header.sequence_number, Some(0x9ABC));
    }

    #[test]
    fn test_decode_header_errors() {
        assert!(PublicHeader::decode(&[]).is_err());
        assert_eq!(
            PublicHeader::decode(&[0x38, 0x01, 0x02, 0x03, 0x04]),
            Err(ParseError::UnsupportedConnectionIdLength(0x08))
        );
        assert!(PublicHeader::decode(&[0x3C, 0x10, 0x32]).is_err());
        assert!(PublicHeader::decode(&[0x3C, 0, 0, 0, 0, 0, 0, 0, 0, 0x01]).is_err());
    }

    #[test]
    fn test_header_encode_decode() {
        let header = PublicHeader::new(CONNECTION_ID, 42).with_version(QuicVersion::Q021);
        let encoded = header.encode();
        let (decoded, consumed) = PublicHeader::decode(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_public_reset_encoding_is_bit_exact() {
        let expected: &[u8] = &[
            0x0E, // public flags (public reset, 8 byte connection_id)
            0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE,
            b'P', b'R', b'S', b'T',
            0x02, 0x00, 0x00, 0x00, // num_entries (2) + padding
            b'R', b'N', b'O', b'N', 0x08, 0x00, 0x00, 0x00,
            b'R', b'S', b'E', b'Q', 0x10, 0x00, 0x00, 0x00,
            0x89, 0x67, 0x45, 0x23, 0x01, 0xEF, 0xCD, 0xAB, // nonce proof
            0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, // rejected sequence number
        ];

        let packet = PublicResetPacket {
            connection_id: CONNECTION_ID,
            nonce_proof: 0xABCD_EF01_2345_6789,
            rejected_sequence_number: 0x1234_5678_9ABC,
            client_address: None,
        };
        assert_eq!(&packet.encode()[..], expected);
        assert_eq!(PublicResetPacket::decode(expected).unwrap(), packet);
    }

    #[test]
    fn test_public_reset_with_client_address() {
        let expected: &[u8] = &[
            0x0E,
            0x10, 0x32, 0x54, 0x76, 0x98, 0xBA, 0xDC, 0xFE,
            b'P', b'R', b'S', b'T',
            0x03, 0x00, 0x00, 0x00,
            b'R', b'N', b'O', b'N', 0x08, 0x00, 0x00, 0x00,
            b'R', b'S', b'E', b'Q', 0x10, 0x00, 0x00, 0x00,
            b'C', b'A', b'D', b'R', 0x18, 0x00, 0x00, 0x00,
            0x89, 0x67, 0x45, 0x23, 0x01, 0xEF, 0xCD, 0xAB,
            0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00,
            // client address: 4.31.198.44:443
            0x02, 0x00, 0x04, 0x1F, 0xC6, 0x2C, 0xBB, 0x01,
        ];

        let packet = PublicResetPacket {
            connection_id: CONNECTION_ID,
            nonce_proof: 0xABCD_EF01_2345_6789,
            rejected_sequence_number: 0x1234_5678_9ABC,
            client_address: Some("4.31.198.44:443".parse().unwrap()),
        };
        assert_eq!(&packet.encode()[..], expected);
        assert_eq!(PublicResetPacket::decode(expected).unwrap(), packet);
    }

    #[test]
    fn test_public_reset_ipv6_address() {
        let packet = PublicResetPacket {
            connection_id: ConnectionId(7),
            nonce_proof: 1,
            rejected_sequence_number: 2,
            client_address: Some("[::1]:8443".parse().unwrap()),
        };
        assert_eq!(PublicResetPacket::decode(&packet.encode()).unwrap(), packet);
    }

    #[test]
    fn test_public_reset_rejects_trailing_junk() {
        let packet = PublicResetPacket {
            connection_id: CONNECTION_ID,
            nonce_proof: 1,
            rejected_sequence_number: 2,
            client_address: None,
        };
        let mut bytes = packet.encode().to_vec();
        bytes.extend_from_slice(b"junk");
        assert!(PublicResetPacket::decode(&bytes).is_err());
    }
}
