//! SPDY/3 name/value header block encoding.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! +------------------------------------+
//! | Number of name/value pairs (u32)   |
//! +------------------------------------+
//! | Length of name (u32) | Name        |
//! +------------------------------------+
//! | Length of value (u32) | Value      |
//! +------------------------------------+
//! | ...                                |
//! ```

use crate::error::ParseError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Ordered set of header name/value pairs.
///
/// Names are lowercase; pseudo-headers (`:method`, `:path`, ...) are plain
/// entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlock {
    entries: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Create an empty header block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing an existing entry in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_ascii_lowercase();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a header value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Check if a header is present.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the block.
    pub fn encode(&self) -> Bytes {
        let size = 4 + self
            .entries
            .iter()
            .map(|(name, value)| 8 + name.len() + value.len())
            .sum::<usize>();
        let mut buffer = BytesMut::with_capacity(size);

        buffer.put_u32(self.entries.len() as u32);
        for (name, value) in &self.entries {
            buffer.put_u32(name.len() as u32);
            buffer.put_slice(name.as_bytes());
            buffer.put_u32(value.len() as u32);
            buffer.put_slice(value.as_bytes());
        }

        buffer.freeze()
    }

    /// Parse a header block from the front of `data`.
    ///
    /// Returns `Ok(Some((block, consumed)))` for a complete block, `Ok(None)`
    /// if more data is needed, or `Err` if the bytes can never form a valid
    /// block.
    pub fn parse(data: &[u8]) -> Result<Option<(HeaderBlock, usize)>, ParseError> {
        let mut cursor = data;

        let Some(count) = read_u32(&mut cursor) else {
            return Ok(None);
        };

        let mut block = HeaderBlock::new();
        for _ in 0..count {
            let Some(name) = read_string(&mut cursor) else {
                return Ok(None);
            };
            let name = std::str::from_utf8(name).map_err(|_| ParseError::InvalidUtf8)?;
            if name.is_empty() {
                return Err(ParseError::InvalidFormat("empty header name".to_string()));
            }
            if name.bytes().any(|b| b.is_ascii_uppercase()) {
                return Err(ParseError::InvalidFormat(format!(
                    "uppercase header name: {name}"
                )));
            }
            if block.contains(name) {
                return Err(ParseError::InvalidFormat(format!("duplicate header: {name}")));
            }

            let Some(value) = read_string(&mut cursor) else {
                return Ok(None);
            };
            let value = std::str::from_utf8(value).map_err(|_| ParseError::InvalidUtf8)?;

            block.entries.push((name.to_string(), value.to_string()));
        }

        Ok(Some((block, data.len() - cursor.len())))
    }
}

fn read_u32(cursor: &mut &[u8]) -> Option<u32> {
    if cursor.remaining() < 4 {
        return None;
    }
    Some(cursor.get_u32())
}

fn read_string<'a>(cursor: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = read_u32(cursor)? as usize;
    let data: &'a [u8] = *cursor;
    if data.len() < len {
        return None;
    }
    let (value, rest) = data.split_at(len);
    *cursor = rest;
    Some(value)
}
