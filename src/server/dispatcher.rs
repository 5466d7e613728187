//! Routes datagrams to sessions and retires closed connections into time-wait.

use crate::config::ServerConfig;
use crate::error::QuicErrorCode;
use crate::protocol::ResponseSource;
use crate::server::crypto_stream::{CryptoServerConfig, ValidationHandle};
use crate::server::session::ServerSession;
use crate::server::time_wait::TimeWaitListManager;
use crate::transport::{
    BlockedWriter, Clock, ConnectionId, PacketWriter, PublicHeader, QuicConnection, QuicVersion,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Instant;

/// Receives session lifecycle events.
pub trait SessionVisitor {
    /// A session's connection closed.
    fn on_connection_closed(&self, connection_id: ConnectionId, error: QuicErrorCode);

    /// A writer was refused and wants [`Dispatcher::on_can_write`] to retry it.
    fn on_write_blocked(&self, writer: BlockedWriter);
}

/// Builds the transport connection for a new session.
pub trait ConnectionFactory {
    fn create_connection(
        &mut self,
        connection_id: ConnectionId,
        version: QuicVersion,
        server_address: SocketAddr,
        client_address: SocketAddr,
    ) -> Box<dyn QuicConnection>;
}

/// Events queued by sessions and the time-wait list for the dispatcher.
#[derive(Debug, Default)]
struct DispatcherEvents {
    closed: RefCell<Vec<ConnectionId>>,
    write_blocked: RefCell<VecDeque<BlockedWriter>>,
}

impl SessionVisitor for DispatcherEvents {
    fn on_connection_closed(&self, connection_id: ConnectionId, error: QuicErrorCode) {
        tracing::debug!("Connection {} closed with {}", connection_id, error);
        self.closed.borrow_mut().push(connection_id);
    }

    fn on_write_blocked(&self, writer: BlockedWriter) {
        let mut blocked = self.write_blocked.borrow_mut();
        if !blocked.contains(&writer) {
            blocked.push_back(writer);
        }
    }
}

/// Owns every session of a server socket.
pub struct Dispatcher {
    config: ServerConfig,
    crypto_config: Rc<CryptoServerConfig>,
    sessions: HashMap<ConnectionId, ServerSession>,
    /// Client hello validations waiting to complete.
    pending_validations: VecDeque<(ConnectionId, ValidationHandle)>,
    time_wait: TimeWaitListManager,
    events: Rc<DispatcherEvents>,
    writer: Rc<dyn PacketWriter>,
    response_source: Rc<dyn ResponseSource>,
    factory: Box<dyn ConnectionFactory>,
}

impl Dispatcher {
    /// Create a dispatcher writing through `writer`.
    pub fn new(
        config: ServerConfig,
        writer: Rc<dyn PacketWriter>,
        response_source: Rc<dyn ResponseSource>,
        factory: Box<dyn ConnectionFactory>,
        clock: Rc<dyn Clock>,
    ) -> Self {
        let events = Rc::new(DispatcherEvents::default());
        let time_wait = TimeWaitListManager::new(
            Rc::clone(&writer),
            events.clone(),
            clock,
            config.time_wait_period,
        );
        Self {
            config,
            crypto_config: Rc::new(CryptoServerConfig::new()),
            sessions: HashMap::new(),
            pending_validations: VecDeque::new(),
            time_wait,
            events,
            writer,
            response_source,
            factory,
        }
    }

    /// Handle one received datagram.
    pub fn process_packet(
        &mut self,
        server_address: SocketAddr,
        client_address: SocketAddr,
        packet: &[u8],
    ) {
        let header = match PublicHeader::decode(packet) {
            Ok((header, _)) => header,
            Err(err) => {
                tracing::debug!("Dropping packet from {}: {}", client_address, err);
                return;
            }
        };
        let connection_id = header.connection_id;

        if header.reset_flag {
            match self.sessions.get_mut(&connection_id) {
                Some(session) => {
                    session.on_connection_closed(QuicErrorCode::PublicReset, true);
                    self.delete_sessions();
                }
                None => tracing::trace!(
                    "Ignoring public reset for connection {} without a session",
                    connection_id
                ),
            }
            return;
        }
        let sequence_number = header.sequence_number.unwrap_or(0);

        if self.time_wait.is_connection_id_in_time_wait(connection_id) {
            self.time_wait.process_packet(
                server_address,
                client_address,
                connection_id,
                sequence_number,
            );
            return;
        }

        if let Some(session) = self.sessions.get_mut(&connection_id) {
            session.process_udp_packet(server_address, client_address, packet);
            self.pending_validations.extend(
                session
                    .take_started_validations()
                    .into_iter()
                    .map(|handle| (connection_id, handle)),
            );
        } else if let Some(version) = header.version {
            if !self.config.supports_version(version) {
                tracing::debug!("Dropping packet with unsupported version {}", version);
                return;
            }
            self.create_session(connection_id, version, server_address, client_address, packet);
        } else {
            tracing::debug!(
                "Packet without version for unknown connection {}; sending public reset",
                connection_id
            );
            self.time_wait
                .add_connection_id_to_time_wait(connection_id, QuicVersion::default(), None);
            self.time_wait.process_packet(
                server_address,
                client_address,
                connection_id,
                sequence_number,
            );
        }

        self.delete_sessions();
    }

    fn create_session(
        &mut self,
        connection_id: ConnectionId,
        version: QuicVersion,
        server_address: SocketAddr,
        client_address: SocketAddr,
        packet: &[u8],
    ) {
        let connection =
            self.factory
                .create_connection(connection_id, version, server_address, client_address);
        let mut session = ServerSession::new(
            connection,
            self.events.clone(),
            Rc::clone(&self.response_source),
            &self.config,
        );
        if let Err(err) = session.initialize_session(Rc::clone(&self.crypto_config)) {
            tracing::warn!("Failed to initialize session {}: {}", connection_id, err);
            return;
        }

        session.process_udp_packet(server_address, client_address, packet);
        self.pending_validations.extend(
            session
                .take_started_validations()
                .into_iter()
                .map(|handle| (connection_id, handle)),
        );
        self.sessions.insert(connection_id, session);
    }

    /// Finish the client hello validations queued by earlier packets.
    ///
    /// Validations of sessions that closed in the meantime are dropped.
    pub fn complete_pending_validations(&mut self) {
        while let Some((connection_id, handle)) = self.pending_validations.pop_front() {
            match self.sessions.get_mut(&connection_id) {
                Some(session) => session.on_client_hello_validated(handle),
                None => tracing::trace!(
                    "Dropping validation for closed connection {}",
                    connection_id
                ),
            }
        }
    }

    /// Whether client hello validations are waiting to complete.
    pub fn has_pending_validations(&self) -> bool {
        !self.pending_validations.is_empty()
    }

    /// Move closed sessions into time-wait.
    pub fn delete_sessions(&mut self) {
        let closed: Vec<ConnectionId> = self.events.closed.borrow_mut().drain(..).collect();
        for connection_id in closed {
            let Some(mut session) = self.sessions.remove(&connection_id) else {
                continue;
            };
            self.events
                .write_blocked
                .borrow_mut()
                .retain(|writer| *writer != BlockedWriter::Connection(connection_id));

            let close_packet = session.take_connection_close_packet();
            self.time_wait
                .add_connection_id_to_time_wait(connection_id, session.version(), close_packet);
        }
    }

    /// The writer is writable again: let blocked writers retry in order.
    pub fn on_can_write(&mut self) {
        self.writer.set_writable();

        let num_writers = self.events.write_blocked.borrow().len();
        for _ in 0..num_writers {
            let next = self.events.write_blocked.borrow_mut().pop_front();
            let Some(blocked) = next else {
                return;
            };
            match blocked {
                BlockedWriter::TimeWaitList => self.time_wait.on_can_write(),
                BlockedWriter::Connection(connection_id) => {
                    if let Some(session) = self.sessions.get_mut(&connection_id) {
                        session.on_can_write();
                    }
                }
            }
            if self.writer.is_write_blocked() {
                return;
            }
        }
    }

    /// Whether any writer is waiting for [`on_can_write`](Self::on_can_write).
    pub fn has_blocked_writers(&self) -> bool {
        !self.events.write_blocked.borrow().is_empty()
    }

    /// Close every session.
    pub fn shutdown(&mut self) {
        tracing::info!("Closing {} sessions", self.sessions.len());
        for session in self.sessions.values_mut() {
            session.close_connection(QuicErrorCode::PeerGoingAway);
        }
        self.delete_sessions();
    }

    /// When the time-wait cleanup alarm should fire.
    pub fn cleanup_deadline(&self) -> Instant {
        self.time_wait.cleanup_deadline()
    }

    /// Time-wait cleanup alarm callback.
    pub fn on_cleanup_alarm(&mut self) {
        self.time_wait.on_cleanup_alarm();
    }

    /// Number of live sessions.
    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a live session.
    pub fn session(&self, connection_id: ConnectionId) -> Option<&ServerSession> {
        self.sessions.get(&connection_id)
    }

    /// The time-wait list.
    pub fn time_wait(&self) -> &TimeWaitListManager {
        &self.time_wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HeaderBlock, InMemoryResponseCache, Request, SpecialResponse};
    use crate::server::crypto_stream::{encode_message, TAG_CLIENT_HELLO};
    use crate::server::SessionState;
    use crate::test_util::{
        client_address, init_tracing, server_address, ConnectionLog, ManualClock,
        MockConnection, MockWriter,
    };
    use crate::transport::{PublicResetPacket, StreamFrame, CRYPTO_STREAM_ID};
    use bytes::Bytes;
    use http::StatusCode;

    type Logs = Rc<RefCell<HashMap<ConnectionId, Rc<RefCell<ConnectionLog>>>>>;

    /// Creates mock connections and queues `frames` on each one.
    struct MockFactory {
        logs: Logs,
        frames: Vec<StreamFrame>,
    }

    impl ConnectionFactory for MockFactory {
        fn create_connection(
            &mut self,
            connection_id: ConnectionId,
            _version: QuicVersion,
            _server_address: SocketAddr,
            _client_address: SocketAddr,
        ) -> Box<dyn QuicConnection> {
            let (connection, log) = MockConnection::new(connection_id);
            log.borrow_mut().next_frames.push_back(self.frames.clone());
            self.logs.borrow_mut().insert(connection_id, log);
            Box::new(connection)
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        writer: Rc<MockWriter>,
        logs: Logs,
    }

    fn fixture_with_frames(frames: Vec<StreamFrame>) -> Fixture {
        init_tracing();
        let writer = MockWriter::new();
        let logs = Logs::default();
        let mut cache = InMemoryResponseCache::new();
        cache.add_simple_response("www.google.com", "/foo", StatusCode::OK, "Yum");
        cache.add_special_response("www.google.com", "/close", SpecialResponse::CloseConnection);

        let dispatcher = Dispatcher::new(
            ServerConfig::default(),
            writer.clone(),
            Rc::new(cache),
            Box::new(MockFactory {
                logs: logs.clone(),
                frames,
            }),
            ManualClock::new(),
        );
        Fixture {
            dispatcher,
            writer,
            logs,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_frames(Vec::new())
    }

    fn request_frame(path: &str) -> StreamFrame {
        let headers = Request::get(path).host("www.google.com").build();
        StreamFrame::new(3, headers.encode(), true)
    }

    fn packet(connection_id: u64, with_version: bool) -> Bytes {
        let mut header = PublicHeader::new(ConnectionId(connection_id), 1);
        if with_version {
            header = header.with_version(QuicVersion::Q023);
        }
        header.encode()
    }

    fn deliver(f: &mut Fixture, packet: &[u8]) {
        f.dispatcher
            .process_packet(server_address(), client_address(), packet);
    }

    #[test]
    fn test_version_packet_creates_session() {
        let mut f = fixture_with_frames(vec![request_frame("/foo")]);
        deliver(&mut f, &packet(1, true));

        assert_eq!(f.dispatcher.num_sessions(), 1);
        let session = f.dispatcher.session(ConnectionId(1)).unwrap();
        assert!(session.crypto_stream().is_some());

        let logs = f.logs.borrow();
        let log = logs[&ConnectionId(1)].borrow();
        assert_eq!(log.packets.len(), 1);
        let headers = HeaderBlock::parse(&log.writes[0].data).unwrap().unwrap().0;
        assert_eq!(headers.get(":status"), Some("200 OK"));
    }

    #[test]
    fn test_unknown_connection_without_version_gets_reset() {
        let mut f = fixture();
        deliver(&mut f, &packet(5, false));

        assert_eq!(f.dispatcher.num_sessions(), 0);
        assert!(f
            .dispatcher
            .time_wait()
            .is_connection_id_in_time_wait(ConnectionId(5)));

        let written = f.writer.written();
        assert_eq!(written.len(), 1);
        let reset = PublicResetPacket::decode(&written[0].data).unwrap();
        assert_eq!(reset.connection_id, ConnectionId(5));
        assert_eq!(reset.rejected_sequence_number, 1);
    }

    #[test]
    fn test_closed_session_moves_to_time_wait() {
        let mut f = fixture_with_frames(vec![request_frame("/close")]);
        deliver(&mut f, &packet(9, true));

        assert_eq!(f.dispatcher.num_sessions(), 0);
        let time_wait = f.dispatcher.time_wait();
        assert!(time_wait.is_connection_id_in_time_wait(ConnectionId(9)));
        assert_eq!(
            time_wait.version_for_connection_id(ConnectionId(9)),
            Some(QuicVersion::default())
        );

        // Stray packet gets the connection close replayed.
        deliver(&mut f, &packet(9, false));
        let written = f.writer.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].data, b"close:QUIC_NO_ERROR".to_vec());
    }

    #[test]
    fn test_public_reset_closes_session() {
        let mut f = fixture();
        deliver(&mut f, &packet(2, true));
        assert_eq!(f.dispatcher.num_sessions(), 1);

        let reset = PublicResetPacket {
            connection_id: ConnectionId(2),
            nonce_proof: 7,
            rejected_sequence_number: 1,
            client_address: None,
        }
        .encode();
        deliver(&mut f, &reset);

        assert_eq!(f.dispatcher.num_sessions(), 0);
        assert!(f
            .dispatcher
            .time_wait()
            .is_connection_id_in_time_wait(ConnectionId(2)));
        assert!(f.logs.borrow()[&ConnectionId(2)].borrow().closes.is_empty());
    }

    #[test]
    fn test_public_reset_is_never_answered() {
        let mut f = fixture();
        deliver(&mut f, &packet(5, false));
        assert_eq!(f.writer.written_count(), 1);

        let reset = PublicResetPacket {
            connection_id: ConnectionId(5),
            nonce_proof: 7,
            rejected_sequence_number: 1,
            client_address: None,
        }
        .encode();
        for _ in 0..4 {
            deliver(&mut f, &reset);
        }
        assert_eq!(f.writer.written_count(), 1);

        let unknown = PublicResetPacket {
            connection_id: ConnectionId(6),
            nonce_proof: 7,
            rejected_sequence_number: 1,
            client_address: None,
        }
        .encode();
        deliver(&mut f, &unknown);
        assert_eq!(f.writer.written_count(), 1);
        assert!(!f
            .dispatcher
            .time_wait()
            .is_connection_id_in_time_wait(ConnectionId(6)));
    }

    #[test]
    fn test_handshake_completes_after_packet() {
        let hello = encode_message(TAG_CLIENT_HELLO, &[]);
        let mut f = fixture_with_frames(vec![StreamFrame::new(CRYPTO_STREAM_ID, hello, false)]);
        deliver(&mut f, &packet(1, true));

        assert!(f.dispatcher.has_pending_validations());
        let session = f.dispatcher.session(ConnectionId(1)).unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        assert!(f.logs.borrow()[&ConnectionId(1)].borrow().writes.is_empty());

        f.dispatcher.complete_pending_validations();
        assert!(!f.dispatcher.has_pending_validations());
        let session = f.dispatcher.session(ConnectionId(1)).unwrap();
        assert_eq!(session.state(), SessionState::Active);
        let logs = f.logs.borrow();
        let log = logs[&ConnectionId(1)].borrow();
        assert_eq!(&log.writes[0].data[..4], b"SHLO");
    }

    #[test]
    fn test_validation_for_reset_session_is_dropped() {
        let hello = encode_message(TAG_CLIENT_HELLO, &[]);
        let mut f = fixture_with_frames(vec![StreamFrame::new(CRYPTO_STREAM_ID, hello, false)]);
        deliver(&mut f, &packet(1, true));

        let reset = PublicResetPacket {
            connection_id: ConnectionId(1),
            nonce_proof: 7,
            rejected_sequence_number: 1,
            client_address: None,
        }
        .encode();
        deliver(&mut f, &reset);
        f.dispatcher.complete_pending_validations();

        assert_eq!(f.dispatcher.num_sessions(), 0);
        assert!(f.logs.borrow()[&ConnectionId(1)].borrow().writes.is_empty());
    }

    #[test]
    fn test_garbage_is_dropped() {
        let mut f = fixture();
        deliver(&mut f, &[0x00, 0x01]);
        deliver(&mut f, &[]);
        assert_eq!(f.dispatcher.num_sessions(), 0);
        assert_eq!(f.writer.written_count(), 0);
    }

    #[test]
    fn test_unsupported_version_is_dropped() {
        init_tracing();
        let writer = MockWriter::new();
        let config = ServerConfig::builder()
            .supported_versions(vec![QuicVersion::Q018])
            .build();
        let mut dispatcher = Dispatcher::new(
            config,
            writer.clone(),
            Rc::new(InMemoryResponseCache::new()),
            Box::new(MockFactory {
                logs: Logs::default(),
                frames: Vec::new(),
            }),
            ManualClock::new(),
        );
        dispatcher.process_packet(server_address(), client_address(), &packet(3, true));
        assert_eq!(dispatcher.num_sessions(), 0);
    }

    #[test]
    fn test_blocked_time_wait_replies_flush_on_can_write() {
        let mut f = fixture();
        f.writer.set_blocked(true);
        deliver(&mut f, &packet(5, false));
        deliver(&mut f, &packet(6, false));

        assert!(f.dispatcher.has_blocked_writers());
        assert_eq!(f.writer.written_count(), 0);

        f.dispatcher.on_can_write();
        assert!(!f.dispatcher.has_blocked_writers());
        let ids: Vec<ConnectionId> = f
            .writer
            .written()
            .iter()
            .map(|p| PublicResetPacket::decode(&p.data).unwrap().connection_id)
            .collect();
        assert_eq!(ids, vec![ConnectionId(5), ConnectionId(6)]);
    }

    #[test]
    fn test_shutdown_closes_sessions() {
        let mut f = fixture();
        deliver(&mut f, &packet(1, true));
        deliver(&mut f, &packet(2, true));
        assert_eq!(f.dispatcher.num_sessions(), 2);

        f.dispatcher.shutdown();
        assert_eq!(f.dispatcher.num_sessions(), 0);
        for id in [ConnectionId(1), ConnectionId(2)] {
            assert_eq!(
                f.logs.borrow()[&id].borrow().closes,
                vec![QuicErrorCode::PeerGoingAway]
            );
            assert!(f.dispatcher.time_wait().is_connection_id_in_time_wait(id));
        }
    }
}
