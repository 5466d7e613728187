//! Time-wait list for retired connection ids.
//!
//! After a connection closes its id lingers here for the time-wait period.
//! Stray packets for the id are answered with the connection's close packet,
//! or with a public reset when there is none. Replies are throttled to the
//! 1st, 2nd, 4th, 8th... packet so a flood of stale packets cannot turn the
//! server into an amplifier.

use crate::server::SessionVisitor;
use crate::transport::{
    BlockedWriter, Clock, ConnectionId, PacketWriter, PublicResetPacket, QuicVersion,
    SequenceNumber, WriteResult,
};
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Nonce proof carried in every public reset sent from time-wait.
pub const PUBLIC_RESET_NONCE_PROOF: u64 = 1010101;

/// A packet waiting for the writer to become writable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    /// Local address to send from
    pub server_address: SocketAddr,
    /// Peer to send to
    pub client_address: SocketAddr,
    /// Serialized packet
    pub packet: Bytes,
}

#[derive(Debug)]
struct ConnectionIdRecord {
    version: QuicVersion,
    packets_received: u64,
    close_packet: Option<Bytes>,
    time_added: Instant,
    order: u64,
}

/// Tracks connection ids in time-wait and answers packets sent to them.
pub struct TimeWaitListManager {
    records: HashMap<ConnectionId, ConnectionIdRecord>,
    /// Insertion order, oldest first.
    by_age: BTreeMap<u64, ConnectionId>,
    next_order: u64,
    pending_packets: VecDeque<QueuedPacket>,
    writer: Rc<dyn PacketWriter>,
    visitor: Rc<dyn SessionVisitor>,
    clock: Rc<dyn Clock>,
    time_wait_period: Duration,
    cleanup_deadline: Instant,
}

impl TimeWaitListManager {
    /// Create an empty list and arm the cleanup alarm one period out.
    pub fn new(
        writer: Rc<dyn PacketWriter>,
        visitor: Rc<dyn SessionVisitor>,
        clock: Rc<dyn Clock>,
        time_wait_period: Duration,
    ) -> Self {
        let cleanup_deadline = clock.now() + time_wait_period;
        Self {
            records: HashMap::new(),
            by_age: BTreeMap::new(),
            next_order: 0,
            pending_packets: VecDeque::new(),
            writer,
            visitor,
            clock,
            time_wait_period,
            cleanup_deadline,
        }
    }

    /// Put `connection_id` into time-wait.
    ///
    /// Re-adding an id refreshes its age and close packet but keeps its
    /// packet counter, so throttling continues where it left off.
    pub fn add_connection_id_to_time_wait(
        &mut self,
        connection_id: ConnectionId,
        version: QuicVersion,
        close_packet: Option<Bytes>,
    ) {
        let mut packets_received = 0;
        if let Some(old) = self.records.remove(&connection_id) {
            self.by_age.remove(&old.order);
            packets_received = old.packets_received;
        }

        let order = self.next_order;
        self.next_order += 1;
        self.by_age.insert(order, connection_id);
        self.records.insert(
            connection_id,
            ConnectionIdRecord {
                version,
                packets_received,
                close_packet,
                time_added: self.clock.now(),
                order,
            },
        );
        tracing::debug!("Connection {} added to time-wait", connection_id);
    }

    /// Whether `connection_id` is currently in time-wait.
    pub fn is_connection_id_in_time_wait(&self, connection_id: ConnectionId) -> bool {
        self.records.contains_key(&connection_id)
    }

    /// Version the connection was using when it entered time-wait.
    pub fn version_for_connection_id(&self, connection_id: ConnectionId) -> Option<QuicVersion> {
        self.records.get(&connection_id).map(|record| record.version)
    }

    /// Handle a packet received for a connection id in time-wait.
    ///
    /// Callers must check [`is_connection_id_in_time_wait`] first.
    ///
    /// [`is_connection_id_in_time_wait`]: Self::is_connection_id_in_time_wait
    pub fn process_packet(
        &mut self,
        server_address: SocketAddr,
        client_address: SocketAddr,
        connection_id: ConnectionId,
        sequence_number: SequenceNumber,
    ) {
        let Some(record) = self.records.get_mut(&connection_id) else {
            debug_assert!(false, "connection {connection_id} is not in time-wait");
            tracing::warn!("Packet for connection {} which is not in time-wait", connection_id);
            return;
        };

        record.packets_received += 1;
        let count = record.packets_received;
        if count & (count - 1) != 0 {
            tracing::trace!(
                "Throttled reply for connection {} (packet {})",
                connection_id,
                count
            );
            return;
        }

        let packet = match &record.close_packet {
            Some(close_packet) => close_packet.clone(),
            None => PublicResetPacket {
                connection_id,
                nonce_proof: PUBLIC_RESET_NONCE_PROOF,
                rejected_sequence_number: sequence_number,
                client_address: Some(client_address),
            }
            .encode(),
        };

        self.send_or_queue_packet(QueuedPacket {
            server_address,
            client_address,
            packet,
        });
    }

    /// Send `packet` now, or queue it behind the writer.
    pub fn send_or_queue_packet(&mut self, packet: QueuedPacket) {
        if !self.write_to_wire(&packet) {
            self.pending_packets.push_back(packet);
        }
    }

    /// Try to write `packet`. Returns `false` if it must be retried later.
    fn write_to_wire(&self, packet: &QueuedPacket) -> bool {
        if self.writer.is_write_blocked() {
            self.visitor.on_write_blocked(BlockedWriter::TimeWaitList);
            return false;
        }

        match self
            .writer
            .write_packet(&packet.packet, packet.server_address, packet.client_address)
        {
            WriteResult::Written(_) => true,
            WriteResult::Blocked => {
                self.visitor.on_write_blocked(BlockedWriter::TimeWaitList);
                self.writer.is_write_blocked_data_buffered()
            }
            WriteResult::Error(err) => {
                tracing::warn!(
                    "Failed to send time-wait reply to {}: {}",
                    packet.client_address,
                    err
                );
                true
            }
        }
    }

    /// Flush queued packets in order, stopping at the first one the writer refuses.
    pub fn on_can_write(&mut self) {
        while let Some(packet) = self.pending_packets.front() {
            if !self.write_to_wire(packet) {
                return;
            }
            self.pending_packets.pop_front();
        }
    }

    /// Evict every id that has completed its time-wait period and re-arm the alarm.
    pub fn clean_up_old_connection_ids(&mut self) {
        let now = self.clock.now();
        while let Some((&order, &connection_id)) = self.by_age.first_key_value() {
            let expired = self
                .records
                .get(&connection_id)
                .map_or(true, |record| now.duration_since(record.time_added) >= self.time_wait_period);
            if !expired {
                break;
            }
            self.by_age.remove(&order);
            self.records.remove(&connection_id);
            tracing::debug!("Connection {} left time-wait", connection_id);
        }

        self.set_cleanup_alarm(now);
    }

    fn set_cleanup_alarm(&mut self, now: Instant) {
        let oldest = self
            .by_age
            .first_key_value()
            .and_then(|(_, id)| self.records.get(id))
            .map(|record| record.time_added);

        self.cleanup_deadline = match oldest {
            None => now + self.time_wait_period,
            Some(time_added) => {
                let expiry = time_added + self.time_wait_period;
                if expiry <= now {
                    tracing::error!("Connection id lingered longer than the time-wait period");
                    now
                } else {
                    expiry
                }
            }
        };
    }

    /// When the cleanup alarm should next fire.
    pub fn cleanup_deadline(&self) -> Instant {
        self.cleanup_deadline
    }

    /// Cleanup alarm callback.
    pub fn on_cleanup_alarm(&mut self) {
        self.clean_up_old_connection_ids();
    }

    /// Number of ids in time-wait.
    pub fn num_connections(&self) -> usize {
        self.records.len()
    }

    /// Number of packets waiting for the writer.
    pub fn num_pending_packets(&self) -> usize {
        self.pending_packets.len()
    }
}
