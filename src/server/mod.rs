//! QUIC server: sessions, request streams, time-wait and the UDP driver loop.

pub mod crypto_stream;
pub mod dispatcher;
pub mod session;
pub mod stream;
pub mod time_wait;

pub use crypto_stream::{CryptoServerConfig, CryptoServerStream, ValidationHandle};
pub use dispatcher::{ConnectionFactory, Dispatcher, SessionVisitor};
pub use session::{ServerSession, SessionState};
pub use stream::{FinOutcome, ServerStream, StreamState};
pub use time_wait::{QueuedPacket, TimeWaitListManager, PUBLIC_RESET_NONCE_PROOF};

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::network::{self, UdpPacketWriter};
use crate::protocol::ResponseSource;
use crate::transport::MonotonicClock;
use std::future::Future;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::net::UdpSocket;

/// QUIC server bound to a UDP socket.
///
/// The server is single-threaded; run it on a current-thread runtime or a
/// `LocalSet`.
pub struct Server {
    socket: Rc<UdpSocket>,
    local_addr: SocketAddr,
    dispatcher: Dispatcher,
    max_packet_size: usize,
}

impl Server {
    /// Bind the server to the given address.
    pub async fn bind(
        addr: &str,
        config: ServerConfig,
        response_source: Rc<dyn ResponseSource>,
        factory: Box<dyn ConnectionFactory>,
    ) -> ServerResult<Self> {
        config.validate()?;
        tracing::info!("Binding QUIC server to: {}", addr);

        let socket = Rc::new(network::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let writer = Rc::new(UdpPacketWriter::new(Rc::clone(&socket)));
        let max_packet_size = config.max_packet_size;
        let dispatcher = Dispatcher::new(
            config,
            writer,
            response_source,
            factory,
            Rc::new(MonotonicClock),
        );

        Ok(Self {
            socket,
            local_addr,
            dispatcher,
            max_packet_size,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The dispatcher owning every session.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve until the task is cancelled.
    pub async fn serve(&mut self) -> ServerResult<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serve until `shutdown` completes, then close every session.
    pub async fn serve_until<F>(&mut self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Starting QUIC server on {}", self.local_addr);
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; self.max_packet_size];

        loop {
            let cleanup_deadline =
                tokio::time::Instant::from_std(self.dispatcher.cleanup_deadline());
            let write_blocked = self.dispatcher.has_blocked_writers();

            tokio::select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, client_address)) => {
                        tracing::trace!("Received {} bytes from {}", len, client_address);
                        self.dispatcher
                            .process_packet(self.local_addr, client_address, &buf[..len]);
                    }
                    Err(e) => tracing::warn!("Failed to receive packet: {}", e),
                },
                _ = tokio::time::sleep_until(cleanup_deadline) => {
                    self.dispatcher.on_cleanup_alarm();
                }
                writable = self.socket.writable(), if write_blocked => {
                    writable?;
                    self.dispatcher.on_can_write();
                }
            }
            self.dispatcher.complete_pending_validations();
        }

        tracing::info!("Shutting down QUIC server");
        self.dispatcher.shutdown();
        Ok(())
    }
}
