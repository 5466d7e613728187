//! # QUIC SPDY Server
//!
//! Server-side core of a QUIC endpoint carrying SPDY-style requests.
//!
//! ## Features
//!
//! - **Sessions**: stream admission, handshake stream wiring and close notifications
//! - **Request streams**: header block framing, body accounting and cached responses
//! - **Time-wait**: throttled public resets and close packet replay for retired connection ids
//! - **Single-threaded**: sans-IO core driven by a tokio current-thread loop
//!
//! Packet framing, encryption and congestion control live behind the
//! [`QuicConnection`] trait and are supplied by the embedder.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use quic_spdy_server::{ConnectionFactory, InMemoryResponseCache, Server, ServerConfig, StatusCode};
//! use std::rc::Rc;
//!
//! # fn factory() -> Box<dyn ConnectionFactory> { unimplemented!() }
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cache = InMemoryResponseCache::new();
//!     cache.add_simple_response("www.example.com", "/", StatusCode::OK, "hello");
//!
//!     let mut server =
//!         Server::bind("0.0.0.0:443", ServerConfig::default(), Rc::new(cache), factory()).await?;
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_util;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use error::{QuicErrorCode, ServerError, ServerResult};
pub use server::{
    ConnectionFactory, Dispatcher, Server, ServerSession, ServerStream, SessionVisitor,
    TimeWaitListManager,
};
pub use transport::{ConnectionId, PacketWriter, QuicConnection, QuicVersion};

// Re-export protocol types
pub use protocol::{HeaderBlock, InMemoryResponseCache, Lookup, Request, Response, ResponseSource};

// Re-export common HTTP types
pub use http::{Method, StatusCode};
