//! Frame codec for the murmur P2P protocol.
//!
//! Frames are newline-delimited JSON records:
//!
//! ```text
//! +------------------------------+------+
//! |  JSON-encoded Message        |  \n  |
//! |  (at most max_size bytes)    |      |
//! +------------------------------+------+
//! ```
//!
//! JSON string escaping guarantees the record itself never contains a raw
//! newline. Blank lines are ignored.

use crate::{Message, NetworkError, MAX_MESSAGE_SIZE};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const DELIMITER: u8 = b'\n';

/// Message codec for the murmur P2P protocol.
pub struct MessageCodec {
    /// Maximum allowed frame size, delimiter excluded.
    max_size: usize,
    /// Index up to which the buffer has already been scanned for a delimiter.
    next_index: usize,
}

impl MessageCodec {
    /// Create a new codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_size(MAX_MESSAGE_SIZE)
    }

    /// Create a codec with a custom size limit.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            max_size,
            next_index: 0,
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Result<Option<Message>, NetworkError> {
        let frame = trim_ascii(frame);
        if frame.is_empty() {
            return Ok(None);
        }
        if frame.len() > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: frame.len(),
                max: self.max_size,
            });
        }
        Message::decode(frame).map(Some)
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == DELIMITER) else {
                // Partial frame: remember how far we scanned
                if src.len() > self.max_size {
                    return Err(NetworkError::MessageTooLarge {
                        size: src.len(),
                        max: self.max_size,
                    });
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let end = self.next_index + offset;
            self.next_index = 0;
            let frame = src.split_to(end + 1);

            if let Some(message) = self.decode_frame(&frame[..end])? {
                return Ok(Some(message));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(message) = self.decode(src)? {
            return Ok(Some(message));
        }

        // Trailing frame without delimiter
        self.next_index = 0;
        let frame = src.split();
        self.decode_frame(&frame)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = item.encode()?;

        if payload.len() > self.max_size {
            return Err(NetworkError::MessageTooLarge {
                size: payload.len(),
                max: self.max_size,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(DELIMITER);

        Ok(())
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end]
}
