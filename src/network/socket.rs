//! UDP socket binding and the socket-backed packet writer.

use crate::error::{NetworkError, ServerResult};
use crate::transport::{PacketWriter, WriteResult};
use std::cell::Cell;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::Rc;
use tokio::net::UdpSocket;

/// Resolve `addr` and bind a non-blocking UDP socket to it.
pub async fn bind<A: ToSocketAddrs>(addr: A) -> ServerResult<UdpSocket> {
    let addr = match addr.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => return Err(NetworkError::AddressResolutionFailed.into()),
        },
        Err(e) => return Err(NetworkError::IoError(e).into()),
    };

    tracing::debug!("Binding UDP socket to {}", addr);
    let socket = UdpSocket::bind(addr).await.map_err(NetworkError::IoError)?;
    Ok(socket)
}

/// Packet writer sending straight to a UDP socket.
///
/// A send that would block marks the writer blocked until
/// [`PacketWriter::set_writable`] is called. Blocked packets are not kept.
#[derive(Debug)]
pub struct UdpPacketWriter {
    socket: Rc<UdpSocket>,
    write_blocked: Cell<bool>,
}

impl UdpPacketWriter {
    /// Create a writer over `socket`.
    pub fn new(socket: Rc<UdpSocket>) -> Self {
        Self {
            socket,
            write_blocked: Cell::new(false),
        }
    }
}

impl PacketWriter for UdpPacketWriter {
    fn write_packet(
        &self,
        buf: &[u8],
        _self_address: SocketAddr,
        peer_address: SocketAddr,
    ) -> WriteResult {
        if self.write_blocked.get() {
            return WriteResult::Blocked;
        }

        match self.socket.try_send_to(buf, peer_address) {
            Ok(n) => {
                tracing::trace!("Sent {} bytes to {}", n, peer_address);
                WriteResult::Written(n)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.write_blocked.set(true);
                WriteResult::Blocked
            }
            Err(e) => WriteResult::Error(e),
        }
    }

    fn is_write_blocked(&self) -> bool {
        self.write_blocked.get()
    }

    fn is_write_blocked_data_buffered(&self) -> bool {
        false
    }

    fn set_writable(&self) {
        self.write_blocked.set(false);
    }
}
