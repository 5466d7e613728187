//! Server request stream: buffers a header block and body, then answers.

use crate::error::QuicErrorCode;
use crate::protocol::{HeaderBlock, Lookup, Request, Response, ResponseSource};
use crate::transport::{QuicConnection, StreamId};
use bytes::{Bytes, BytesMut};
use std::rc::Rc;

/// Lifecycle of a request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Collecting the request header block
    AwaitingHeaders,
    /// Headers parsed, collecting the body
    HeadersParsed,
    /// Peer finished sending, no response written yet
    ReadClosed,
    /// Response written, peer still sending
    Sending,
    /// Both directions closed
    Done,
}

/// What happened when the peer finished its side of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinOutcome {
    /// A response was written
    Responded,
    /// The request asked for the whole connection to be closed
    CloseConnection,
    /// The request is deliberately left unanswered
    Ignored,
    /// The stream had already answered
    AlreadyFinished,
}

/// A peer-initiated request stream.
pub struct ServerStream {
    id: StreamId,
    header_buffer: BytesMut,
    header_buffer_increment: usize,
    headers_received: bool,
    request: Option<Request>,
    body: BytesMut,
    read_side_closed: bool,
    write_side_closed: bool,
    fin_buffered: bool,
    response_source: Rc<dyn ResponseSource>,
}

impl ServerStream {
    /// Create a stream answering from `response_source`.
    pub fn new(
        id: StreamId,
        response_source: Rc<dyn ResponseSource>,
        header_buffer_increment: usize,
    ) -> Self {
        Self {
            id,
            header_buffer: BytesMut::with_capacity(header_buffer_increment),
            header_buffer_increment,
            headers_received: false,
            request: None,
            body: BytesMut::new(),
            read_side_closed: false,
            write_side_closed: false,
            fin_buffered: false,
            response_source,
        }
    }

    /// Stream id.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Accept request bytes. Always consumes everything offered.
    pub fn process_data(&mut self, data: &[u8]) -> usize {
        if self.headers_received {
            self.body.extend_from_slice(data);
            return data.len();
        }

        let remaining = self.header_buffer.capacity() - self.header_buffer.len();
        if remaining < data.len() {
            self.header_buffer.reserve(self.header_buffer_increment.max(data.len()));
        }
        self.header_buffer.extend_from_slice(data);

        match HeaderBlock::parse(&self.header_buffer) {
            Ok(Some((headers, consumed))) => {
                self.headers_received = true;
                self.request = Some(Request::from_headers(headers));
                let trailing = self.header_buffer.split_off(consumed);
                self.body.extend_from_slice(&trailing);
                self.header_buffer = BytesMut::new();
                tracing::trace!(
                    "Stream {} received headers with {} body bytes",
                    self.id,
                    self.body.len()
                );
            }
            Ok(None) => {}
            Err(err) => {
                tracing::trace!("Stream {} header block not parseable yet: {}", self.id, err);
            }
        }

        data.len()
    }

    /// Handle the peer's fin and answer the request.
    pub fn on_fin_read(&mut self, connection: &mut dyn QuicConnection) -> FinOutcome {
        self.read_side_closed = true;
        if self.write_side_closed || self.fin_buffered {
            return FinOutcome::AlreadyFinished;
        }

        let Some(request) = &self.request else {
            tracing::debug!("Stream {} finished before its headers", self.id);
            self.send_error_response(connection);
            return FinOutcome::Responded;
        };

        if let Some(content_length) = request.content_length() {
            if content_length != self.body.len() as u64 {
                tracing::debug!(
                    "Stream {} body length {} does not match content-length {}",
                    self.id,
                    self.body.len(),
                    content_length
                );
                self.send_error_response(connection);
                return FinOutcome::Responded;
            }
        }

        match self.response_source.lookup(request) {
            Lookup::Found(response) => {
                let (headers, body) = response.into_parts();
                self.send_headers_and_body(connection, &headers, body);
                FinOutcome::Responded
            }
            Lookup::CloseConnection => {
                tracing::debug!("Stream {} requested connection close", self.id);
                connection.send_connection_close(QuicErrorCode::NoError);
                FinOutcome::CloseConnection
            }
            Lookup::IgnoreRequest => {
                tracing::debug!("Stream {} request ignored", self.id);
                FinOutcome::Ignored
            }
            Lookup::NotFound => {
                tracing::debug!("No response for {}", request.cache_key());
                self.send_error_response(connection);
                FinOutcome::Responded
            }
        }
    }

    /// Write the 500 error response.
    pub fn send_error_response(&mut self, connection: &mut dyn QuicConnection) {
        let (headers, body) = Response::error().into_parts();
        self.send_headers_and_body(connection, &headers, body);
    }

    /// Write a header block, then the body, finishing the stream.
    pub fn send_headers_and_body(
        &mut self,
        connection: &mut dyn QuicConnection,
        headers: &HeaderBlock,
        body: Bytes,
    ) {
        self.read_side_closed = true;

        let fin_with_headers = body.is_empty();
        connection.write_stream_data(self.id, headers.encode(), fin_with_headers);
        if !fin_with_headers {
            connection.write_stream_data(self.id, body, true);
        }

        self.fin_buffered = true;
        self.write_side_closed = true;
    }

    /// Close both directions without responding.
    pub fn close(&mut self) {
        self.read_side_closed = true;
        self.write_side_closed = true;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        match (self.read_side_closed, self.write_side_closed) {
            (true, true) => StreamState::Done,
            (false, true) => StreamState::Sending,
            (true, false) => StreamState::ReadClosed,
            (false, false) if self.headers_received => StreamState::HeadersParsed,
            (false, false) => StreamState::AwaitingHeaders,
        }
    }

    /// Request body received so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parsed request, once headers are complete.
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Whether the full request header block has arrived.
    pub fn headers_received(&self) -> bool {
        self.headers_received
    }

    /// Whether the peer's fin has been read.
    pub fn read_side_closed(&self) -> bool {
        self.read_side_closed
    }

    /// Whether the response has been written with fin.
    pub fn write_side_closed(&self) -> bool {
        self.write_side_closed
    }
}
