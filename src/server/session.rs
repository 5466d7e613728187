//! Server session: owns the handshake stream and the request streams of one
//! connection, and reports lifecycle events to its visitor.

use crate::config::ServerConfig;
use crate::error::{QuicErrorCode, SessionError};
use crate::protocol::ResponseSource;
use crate::server::crypto_stream::{CryptoServerConfig, CryptoServerStream, ValidationHandle};
use crate::server::stream::{FinOutcome, ServerStream};
use crate::server::SessionVisitor;
use crate::transport::{
    BlockedWriter, ConnectionId, QuicConnection, QuicVersion, StreamFrame, StreamId,
    CRYPTO_STREAM_ID,
};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::rc::Rc;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, no handshake stream yet
    Created,
    /// Handshake stream created
    Initialized,
    /// Handshake confirmed
    Active,
    /// Connection closed; no further streams
    Closed,
}

/// One server-side QUIC connection and its streams.
pub struct ServerSession {
    connection: Box<dyn QuicConnection>,
    visitor: Rc<dyn SessionVisitor>,
    response_source: Rc<dyn ResponseSource>,
    crypto_stream: Option<CryptoServerStream>,
    streams: HashMap<StreamId, ServerStream>,
    /// Peer ids skipped over by a higher id, still allowed to open.
    implicitly_created_streams: HashSet<StreamId>,
    largest_peer_created_stream_id: StreamId,
    /// Validations started by client hellos, not yet handed to the validator.
    started_validations: Vec<ValidationHandle>,
    max_open_streams: usize,
    header_buffer_increment: usize,
    /// Close sent during the current frame, not yet reported.
    pending_close: Option<QuicErrorCode>,
    state: SessionState,
}

impl ServerSession {
    /// Create a session around `connection`.
    pub fn new(
        connection: Box<dyn QuicConnection>,
        visitor: Rc<dyn SessionVisitor>,
        response_source: Rc<dyn ResponseSource>,
        config: &ServerConfig,
    ) -> Self {
        tracing::info!(
            "Creating session for connection {} from {}",
            connection.connection_id(),
            connection.peer_address()
        );
        Self {
            connection,
            visitor,
            response_source,
            crypto_stream: None,
            streams: HashMap::new(),
            implicitly_created_streams: HashSet::new(),
            largest_peer_created_stream_id: CRYPTO_STREAM_ID,
            started_validations: Vec::new(),
            max_open_streams: config.max_open_streams,
            header_buffer_increment: config.header_buffer_increment,
            pending_close: None,
            state: SessionState::Created,
        }
    }

    /// Create the handshake stream. A session can only be initialized once.
    pub fn initialize_session(
        &mut self,
        crypto_config: Rc<CryptoServerConfig>,
    ) -> Result<(), SessionError> {
        if self.crypto_stream.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }

        self.crypto_stream = Some(CryptoServerStream::new(crypto_config));
        self.state = SessionState::Initialized;
        tracing::debug!("Session {} initialized", self.connection_id());
        Ok(())
    }

    /// Admission check for a peer-initiated stream.
    ///
    /// Rejection sends a connection close: even ids are reserved for the
    /// server, and the peer may not exceed the open stream limit. Ids skipped
    /// over by a higher id count as open.
    pub fn should_create_incoming_data_stream(&mut self, id: StreamId) -> bool {
        if id % 2 == 0 {
            tracing::debug!("Invalid incoming even stream id {}", id);
            self.send_connection_close(QuicErrorCode::InvalidStreamId);
            return false;
        }
        let open = self.num_open_streams();
        if open + self.streams_opened_by(id) > self.max_open_streams {
            tracing::debug!(
                "Failed to create stream {}: {} streams already open",
                id,
                open
            );
            self.send_connection_close(QuicErrorCode::TooManyOpenStreams);
            return false;
        }
        true
    }

    /// Create a request stream for a peer-initiated id.
    pub fn create_incoming_data_stream(&mut self, id: StreamId) -> Option<&mut ServerStream> {
        if self.crypto_stream.is_none() {
            tracing::debug!("Refusing stream {} before the session is initialized", id);
            return None;
        }
        if self.state == SessionState::Closed {
            tracing::debug!("Refusing stream {} on closed session", id);
            return None;
        }
        if !self.should_create_incoming_data_stream(id) {
            return None;
        }

        let stream = ServerStream::new(
            id,
            Rc::clone(&self.response_source),
            self.header_buffer_increment,
        );
        if id > self.largest_peer_created_stream_id {
            let skipped = (self.largest_peer_created_stream_id + 2..id).step_by(2);
            self.implicitly_created_streams.extend(skipped);
            self.largest_peer_created_stream_id = id;
        }
        self.implicitly_created_streams.remove(&id);
        tracing::trace!("Created stream {} on {}", id, self.connection_id());
        Some(self.streams.entry(id).or_insert(stream))
    }

    /// Servers never open streams of their own.
    pub fn create_outgoing_data_stream(&mut self) -> Option<&mut ServerStream> {
        tracing::debug!("Server push not supported");
        None
    }

    /// Hand a datagram to the connection and process the frames it carries.
    pub fn process_udp_packet(
        &mut self,
        server_address: SocketAddr,
        client_address: SocketAddr,
        packet: &[u8],
    ) {
        if self.state == SessionState::Closed {
            tracing::trace!("Dropping packet for closed session {}", self.connection_id());
            return;
        }

        let frames = self
            .connection
            .process_udp_packet(server_address, client_address, packet);
        for frame in frames {
            self.process_stream_frame(frame);
        }
    }

    /// Route one stream frame to its stream.
    pub fn process_stream_frame(&mut self, frame: StreamFrame) {
        if self.state == SessionState::Closed {
            return;
        }
        if frame.stream_id == CRYPTO_STREAM_ID {
            self.process_crypto_data(&frame.data);
            return;
        }

        let id = frame.stream_id;
        if !self.streams.contains_key(&id) {
            if self.is_closed_stream(id) {
                tracing::trace!("Ignoring frame for closed stream {}", id);
                return;
            }
            if self.create_incoming_data_stream(id).is_none() {
                self.report_pending_close();
                return;
            }
        }

        let Some(stream) = self.streams.get_mut(&id) else {
            return;
        };
        stream.process_data(&frame.data);
        if frame.fin && stream.on_fin_read(self.connection.as_mut()) == FinOutcome::CloseConnection
        {
            self.pending_close = Some(QuicErrorCode::NoError);
        }

        if stream.read_side_closed() && stream.write_side_closed() {
            self.streams.remove(&id);
        }
        self.report_pending_close();
    }

    fn process_crypto_data(&mut self, data: &[u8]) {
        let Some(crypto_stream) = self.crypto_stream.as_mut() else {
            tracing::warn!("Handshake data before the session is initialized");
            return;
        };

        match crypto_stream.process_data(data) {
            Ok(Some(handle)) => self.started_validations.push(handle),
            Ok(None) => {}
            Err(error) => self.close_connection(error),
        }
    }

    /// Hand over the client hello validations started since the last call.
    ///
    /// Each must later be finished with
    /// [`on_client_hello_validated`](Self::on_client_hello_validated).
    pub fn take_started_validations(&mut self) -> Vec<ValidationHandle> {
        std::mem::take(&mut self.started_validations)
    }

    /// Client hello validation finished; confirm the handshake.
    ///
    /// Completions for a closed session are ignored.
    pub fn on_client_hello_validated(&mut self, handle: ValidationHandle) {
        let Some(crypto_stream) = self.crypto_stream.as_mut() else {
            return;
        };
        let Some(server_hello) = crypto_stream.complete_validation(handle) else {
            return;
        };

        self.connection
            .write_stream_data(CRYPTO_STREAM_ID, server_hello, false);
        if self.state == SessionState::Initialized {
            self.state = SessionState::Active;
            tracing::info!("Handshake confirmed for {}", self.connection_id());
        }
    }

    /// Send a connection close and tear the session down.
    pub fn close_connection(&mut self, error: QuicErrorCode) {
        if self.state == SessionState::Closed {
            return;
        }
        self.connection.send_connection_close(error);
        self.on_connection_closed(error, false);
    }

    /// The connection is gone: drop all streams and tell the visitor.
    pub fn on_connection_closed(&mut self, error: QuicErrorCode, from_peer: bool) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some(crypto_stream) = self.crypto_stream.as_mut() {
            crypto_stream.cancel_outstanding_callbacks();
        }
        for (_, mut stream) in self.streams.drain() {
            stream.close();
        }
        self.implicitly_created_streams.clear();
        self.started_validations.clear();
        self.pending_close = None;
        self.state = SessionState::Closed;

        tracing::info!(
            "Session {} closed with {} (from peer: {})",
            self.connection_id(),
            error,
            from_peer
        );
        self.visitor.on_connection_closed(self.connection_id(), error);
    }

    /// The connection could not write; ask to be told when it can.
    pub fn on_write_blocked(&self) {
        self.visitor
            .on_write_blocked(BlockedWriter::Connection(self.connection_id()));
    }

    /// Writer became writable again.
    pub fn on_can_write(&mut self) {
        self.connection.on_can_write();
    }

    /// Close packet to replay from time-wait.
    pub fn take_connection_close_packet(&mut self) -> Option<Bytes> {
        self.connection.take_connection_close_packet()
    }

    fn send_connection_close(&mut self, error: QuicErrorCode) {
        self.connection.send_connection_close(error);
        self.pending_close = Some(error);
    }

    fn report_pending_close(&mut self) {
        if let Some(error) = self.pending_close.take() {
            self.on_connection_closed(error, false);
        }
    }

    fn is_closed_stream(&self, id: StreamId) -> bool {
        id <= self.largest_peer_created_stream_id
            && !self.streams.contains_key(&id)
            && !self.implicitly_created_streams.contains(&id)
    }

    /// How many streams become open if the peer opens `id`.
    fn streams_opened_by(&self, id: StreamId) -> usize {
        if self.implicitly_created_streams.contains(&id) {
            0
        } else if id > self.largest_peer_created_stream_id {
            ((id - self.largest_peer_created_stream_id) / 2) as usize
        } else {
            1
        }
    }

    /// Connection identifier.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }

    /// Version the connection negotiated.
    pub fn version(&self) -> QuicVersion {
        self.connection.version()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has closed.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Number of open request streams, including ids the peer skipped over.
    pub fn num_open_streams(&self) -> usize {
        self.streams.len() + self.implicitly_created_streams.len()
    }

    /// Look up an open request stream.
    pub fn stream(&self, id: StreamId) -> Option<&ServerStream> {
        self.streams.get(&id)
    }

    /// The handshake stream, once initialized.
    pub fn crypto_stream(&self) -> Option<&CryptoServerStream> {
        self.crypto_stream.as_ref()
    }
}
