//! Recording doubles for the transport capabilities, shared by unit tests.

use crate::error::QuicErrorCode;
use crate::server::SessionVisitor;
use crate::transport::{
    BlockedWriter, Clock, ConnectionId, PacketWriter, QuicConnection, QuicVersion, StreamFrame,
    StreamId, WriteResult,
};
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn server_address() -> SocketAddr {
    "127.0.0.1:443".parse().unwrap()
}

pub fn client_address() -> SocketAddr {
    "192.168.0.7:51234".parse().unwrap()
}

/// A stream write recorded by [`MockConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWrite {
    pub stream_id: StreamId,
    pub data: Bytes,
    pub fin: bool,
}

/// Everything a [`MockConnection`] observed.
#[derive(Debug, Default)]
pub struct ConnectionLog {
    pub writes: Vec<StreamWrite>,
    pub closes: Vec<QuicErrorCode>,
    pub packets: Vec<Vec<u8>>,
    pub can_write_calls: usize,
    /// Frames handed out by the next `process_udp_packet`.
    pub next_frames: VecDeque<Vec<StreamFrame>>,
}

/// Connection double whose log stays readable after it is boxed.
#[derive(Debug)]
pub struct MockConnection {
    id: ConnectionId,
    version: QuicVersion,
    peer: SocketAddr,
    log: Rc<RefCell<ConnectionLog>>,
}

impl MockConnection {
    pub fn new(id: ConnectionId) -> (Self, Rc<RefCell<ConnectionLog>>) {
        let log = Rc::new(RefCell::new(ConnectionLog::default()));
        let connection = Self {
            id,
            version: QuicVersion::default(),
            peer: client_address(),
            log: Rc::clone(&log),
        };
        (connection, log)
    }
}

impl QuicConnection for MockConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn version(&self) -> QuicVersion {
        self.version
    }

    fn peer_address(&self) -> SocketAddr {
        self.peer
    }

    fn send_connection_close(&mut self, error: QuicErrorCode) {
        self.log.borrow_mut().closes.push(error);
    }

    fn write_stream_data(&mut self, stream_id: StreamId, data: Bytes, fin: bool) -> usize {
        let len = data.len();
        self.log.borrow_mut().writes.push(StreamWrite {
            stream_id,
            data,
            fin,
        });
        len
    }

    fn process_udp_packet(
        &mut self,
        _server_address: SocketAddr,
        _client_address: SocketAddr,
        packet: &[u8],
    ) -> Vec<StreamFrame> {
        let mut log = self.log.borrow_mut();
        log.packets.push(packet.to_vec());
        log.next_frames.pop_front().unwrap_or_default()
    }

    fn on_can_write(&mut self) {
        self.log.borrow_mut().can_write_calls += 1;
    }

    fn take_connection_close_packet(&mut self) -> Option<Bytes> {
        let log = self.log.borrow();
        log.closes
            .last()
            .map(|error| Bytes::from(format!("close:{}", error.as_str())))
    }
}

/// A datagram recorded by [`MockWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPacket {
    pub data: Vec<u8>,
    pub self_address: SocketAddr,
    pub peer_address: SocketAddr,
}

/// Packet writer double with scriptable backpressure.
#[derive(Debug, Default)]
pub struct MockWriter {
    blocked: Cell<bool>,
    writes_before_block: Cell<Option<usize>>,
    buffer_blocked_data: Cell<bool>,
    fail_writes: Cell<bool>,
    written: RefCell<Vec<WrittenPacket>>,
}

impl MockWriter {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.set(blocked);
    }

    /// Accept `writes` more packets, then refuse with `Blocked` and stay blocked.
    pub fn block_after(&self, writes: usize) {
        self.writes_before_block.set(Some(writes));
    }

    fn take_scheduled_block(&self) -> bool {
        match self.writes_before_block.get() {
            Some(0) => {
                self.writes_before_block.set(None);
                true
            }
            Some(n) => {
                self.writes_before_block.set(Some(n - 1));
                false
            }
            None => false,
        }
    }

    pub fn set_buffer_blocked_data(&self, buffered: bool) {
        self.buffer_blocked_data.set(buffered);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn written(&self) -> Vec<WrittenPacket> {
        self.written.borrow().clone()
    }

    pub fn written_count(&self) -> usize {
        self.written.borrow().len()
    }
}

impl PacketWriter for MockWriter {
    fn write_packet(
        &self,
        buf: &[u8],
        self_address: SocketAddr,
        peer_address: SocketAddr,
    ) -> WriteResult {
        if self.blocked.get() || self.take_scheduled_block() {
            self.blocked.set(true);
            return WriteResult::Blocked;
        }
        if self.fail_writes.get() {
            return WriteResult::Error(io::Error::new(io::ErrorKind::Other, "mock failure"));
        }
        self.written.borrow_mut().push(WrittenPacket {
            data: buf.to_vec(),
            self_address,
            peer_address,
        });
        WriteResult::Written(buf.len())
    }

    fn is_write_blocked(&self) -> bool {
        self.blocked.get()
    }

    fn is_write_blocked_data_buffered(&self) -> bool {
        self.buffer_blocked_data.get()
    }

    fn set_writable(&self) {
        self.blocked.set(false);
    }
}

/// Visitor double recording every notification.
#[derive(Debug, Default)]
pub struct MockVisitor {
    pub closed: RefCell<Vec<(ConnectionId, QuicErrorCode)>>,
    pub blocked: RefCell<Vec<BlockedWriter>>,
}

impl MockVisitor {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.borrow().len()
    }
}

impl SessionVisitor for MockVisitor {
    fn on_connection_closed(&self, connection_id: ConnectionId, error: QuicErrorCode) {
        self.closed.borrow_mut().push((connection_id, error));
    }

    fn on_write_blocked(&self, writer: BlockedWriter) {
        self.blocked.borrow_mut().push(writer);
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Cell<Instant>,
}

impl ManualClock {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            now: Cell::new(Instant::now()),
        })
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
