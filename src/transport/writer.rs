//! Packet writer abstraction with a tri-state write result.

use crate::transport::ConnectionId;
use std::io;
use std::net::SocketAddr;

/// Outcome of a packet write.
#[derive(Debug)]
pub enum WriteResult {
    /// The packet was written
    Written(usize),
    /// The writer cannot accept the packet right now
    Blocked,
    /// The write failed for a reason other than backpressure
    Error(io::Error),
}

/// Sends serialized packets to the network.
pub trait PacketWriter {
    /// Write a packet from `self_address` to `peer_address`.
    fn write_packet(&self, buf: &[u8], self_address: SocketAddr, peer_address: SocketAddr)
        -> WriteResult;

    /// Whether the writer is currently refusing writes.
    fn is_write_blocked(&self) -> bool;

    /// Whether a blocked write was nevertheless kept by the writer for later.
    fn is_write_blocked_data_buffered(&self) -> bool;

    /// Mark the writer writable again.
    fn set_writable(&self);
}

/// An object that refused to write and wants to be told when it can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockedWriter {
    /// The connection with this id
    Connection(ConnectionId),
    /// The time-wait list manager
    TimeWaitList,
}
