//! Server side of the handshake stream.
//!
//! Handshake messages are tagged key/value maps (little-endian):
//!
//! ```text
//! +-----------+-------------+---------+
//! | tag (4)   | entries u16 | pad u16 |
//! +-----------+-------------+---------+
//! | entry tag (4) | end offset u32    |  x entries
//! +-----------------------------------+
//! | values ...                        |
//! +-----------------------------------+
//! ```
//!
//! The stream validates each client hello asynchronously. A validation that
//! completes after [`CryptoServerStream::cancel_outstanding_callbacks`] is
//! ignored.

use crate::error::{ParseError, QuicErrorCode};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;
use std::rc::Rc;

/// Client hello message tag.
pub const TAG_CLIENT_HELLO: [u8; 4] = *b"CHLO";
/// Server hello message tag.
pub const TAG_SERVER_HELLO: [u8; 4] = *b"SHLO";
/// Server config id entry tag.
pub const TAG_SERVER_CONFIG_ID: [u8; 4] = *b"SCID";

const MESSAGE_HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 8;

/// Server handshake configuration shared by every session.
#[derive(Debug, Clone)]
pub struct CryptoServerConfig {
    server_config_id: [u8; 16],
}

impl CryptoServerConfig {
    /// Create a config with a fresh random id.
    pub fn new() -> Self {
        let mut server_config_id = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut server_config_id);
        Self { server_config_id }
    }

    /// Identifier advertised to clients.
    pub fn server_config_id(&self) -> &[u8] {
        &self.server_config_id
    }
}

impl Default for CryptoServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifies one outstanding client hello validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidationHandle(u64);

/// Handshake stream of a server session.
#[derive(Debug)]
pub struct CryptoServerStream {
    config: Rc<CryptoServerConfig>,
    buffer: BytesMut,
    pending_validation: Option<ValidationHandle>,
    next_validation: u64,
    num_client_hellos: usize,
    handshake_confirmed: bool,
}

impl CryptoServerStream {
    /// Create a handshake stream using `config`.
    pub fn new(config: Rc<CryptoServerConfig>) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
            pending_validation: None,
            next_validation: 0,
            num_client_hellos: 0,
            handshake_confirmed: false,
        }
    }

    /// Consume handshake bytes.
    ///
    /// Returns the validation started by a complete client hello, if any.
    /// Any message other than a client hello is a connection error.
    pub fn process_data(&mut self, data: &[u8]) -> Result<Option<ValidationHandle>, QuicErrorCode> {
        self.buffer.extend_from_slice(data);

        let mut started = None;
        loop {
            let (tag, len) = match parse_message(&self.buffer) {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!("Malformed handshake message: {}", err);
                    return Err(QuicErrorCode::InvalidCryptoMessageType);
                }
            };
            self.buffer.advance(len);

            if tag != TAG_CLIENT_HELLO {
                tracing::debug!(
                    "Unexpected handshake message {}",
                    String::from_utf8_lossy(&tag)
                );
                return Err(QuicErrorCode::InvalidCryptoMessageType);
            }

            self.num_client_hellos += 1;
            let handle = ValidationHandle(self.next_validation);
            self.next_validation += 1;
            self.pending_validation = Some(handle);
            started = Some(handle);
        }

        Ok(started)
    }

    /// Finish a client hello validation.
    ///
    /// Returns the server hello to send, or `None` if `handle` is stale or
    /// was cancelled.
    pub fn complete_validation(&mut self, handle: ValidationHandle) -> Option<Bytes> {
        if self.pending_validation != Some(handle) {
            tracing::trace!("Ignoring stale validation {:?}", handle);
            return None;
        }
        self.pending_validation = None;
        self.handshake_confirmed = true;
        Some(encode_message(
            TAG_SERVER_HELLO,
            &[(TAG_SERVER_CONFIG_ID, self.config.server_config_id())],
        ))
    }

    /// Drop any outstanding validation so its completion is ignored.
    pub fn cancel_outstanding_callbacks(&mut self) {
        if self.pending_validation.take().is_some() {
            tracing::trace!("Cancelled outstanding client hello validation");
        }
    }

    /// Whether a client hello validation is in flight.
    pub fn has_pending_validation(&self) -> bool {
        self.pending_validation.is_some()
    }

    /// Whether the handshake has completed.
    pub fn handshake_confirmed(&self) -> bool {
        self.handshake_confirmed
    }

    /// Number of client hellos received.
    pub fn num_client_hellos(&self) -> usize {
        self.num_client_hellos
    }
}

/// Serialize a handshake message. `entries` must be sorted by tag.
pub fn encode_message(tag: [u8; 4], entries: &[([u8; 4], &[u8])]) -> Bytes {
    let values_len: usize = entries.iter().map(|(_, value)| value.len()).sum();
    let mut buffer =
        BytesMut::with_capacity(MESSAGE_HEADER_LEN + entries.len() * ENTRY_LEN + values_len);

    buffer.put_slice(&tag);
    buffer.put_u16_le(entries.len() as u16);
    buffer.put_u16_le(0);

    let mut end = 0u32;
    for (entry_tag, value) in entries {
        end += value.len() as u32;
        buffer.put_slice(entry_tag);
        buffer.put_u32_le(end);
    }
    for (_, value) in entries {
        buffer.put_slice(value);
    }

    buffer.freeze()
}

/// Find the first complete message in `data`. Returns its tag and length.
fn parse_message(data: &[u8]) -> Result<Option<([u8; 4], usize)>, ParseError> {
    let mut cursor = data;
    if cursor.remaining() < MESSAGE_HEADER_LEN {
        return Ok(None);
    }

    let mut tag = [0u8; 4];
    cursor.copy_to_slice(&mut tag);
    let num_entries = cursor.get_u16_le() as usize;
    cursor.advance(2);

    if cursor.remaining() < num_entries * ENTRY_LEN {
        return Ok(None);
    }
    let mut end = 0usize;
    for _ in 0..num_entries {
        cursor.advance(4);
        let entry_end = cursor.get_u32_le() as usize;
        if entry_end < end {
            return Err(ParseError::InvalidFormat(
                "handshake entry offsets out of order".to_string(),
            ));
        }
        end = entry_end;
    }

    if cursor.remaining() < end {
        return Ok(None);
    }
    Ok(Some((tag, MESSAGE_HEADER_LEN + num_entries * ENTRY_LEN + end)))
}
