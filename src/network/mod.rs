//! UDP networking for the server driver.

pub mod socket;

pub use socket::{bind, UdpPacketWriter};
