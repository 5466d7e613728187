//! HTTP-over-QUIC request/response protocol.

pub mod header_block;
pub mod request;
pub mod response;

pub use header_block::HeaderBlock;
pub use request::{Request, RequestBuilder};
pub use response::{
    InMemoryResponseCache, Lookup, Response, ResponseSource, SpecialResponse,
    ERROR_RESPONSE_BODY,
};
