//! Byte-wise IP-T framer state machine.
//!
//! Drives `STREAM -> ESC -> HEAD(8) -> DATA(length-8) -> STREAM`. The
//! framer consumes already-descrambled octets; it never touches the
//! cipher (spec §4.2). It is deliberately a pure, I/O-free state machine
//! in the same shape as the teacher's connection/room state machines:
//! feed it bytes, get back events, the caller owns the socket.

use bytes::{Bytes, BytesMut};

use super::header::{FrameHeader, HEADER_SIZE};
use crate::errors::{ProtocolError, Result};

/// Escape octet. Two consecutive escapes inside `DATA` collapse to one
/// literal escape byte; a lone escape elsewhere starts a new frame.
pub const ESCAPE: u8 = 0x1b;

/// Events the framer emits as bytes are fed in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FramerEvent {
    /// A complete frame was decoded.
    Frame {
        /// Command code from the header.
        command: u16,
        /// Sequence number from the header.
        sequence: u8,
        /// Frame body.
        body: Bytes,
    },
}

#[derive(Debug)]
enum State {
    Stream,
    Esc,
    Head(BytesMut),
    Data { header: FrameHeader, buf: BytesMut },
    DataEsc { header: FrameHeader, buf: BytesMut },
}

/// Byte-wise IP-T framer.
///
/// Malformed lengths (shorter than the header, or beyond
/// [`super::header::MAX_FRAME_LENGTH`]) are reported as [`ProtocolError`] and the framer
/// resets to `STREAM`; the caller is expected to tear the session down
/// rather than keep feeding it (spec §4.2).
#[derive(Debug)]
pub struct Framer {
    state: State,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    /// Creates a framer positioned at `STREAM`.
    #[must_use]
    pub fn new() -> Self {
        Self { state: State::Stream }
    }

    /// Feeds a single octet, returning a completed frame event if this
    /// byte finished one.
    pub fn feed(&mut self, byte: u8) -> Result<Option<FramerEvent>> {
        match std::mem::replace(&mut self.state, State::Stream) {
            State::Stream => {
                if byte == ESCAPE {
                    self.state = State::Esc;
                } else {
                    self.state = State::Stream;
                }
                Ok(None)
            }
            State::Esc => {
                if byte == ESCAPE {
                    // Two escapes outside DATA: treat as a no-op resync, stay in STREAM.
                    self.state = State::Stream;
                } else {
                    let mut head = BytesMut::with_capacity(HEADER_SIZE);
                    head.extend_from_slice(&[byte]);
                    self.state = State::Head(head);
                }
                Ok(None)
            }
            State::Head(mut head) => {
                head.extend_from_slice(&[byte]);
                if head.len() < HEADER_SIZE {
                    self.state = State::Head(head);
                    return Ok(None);
                }
                match FrameHeader::from_bytes(&head) {
                    Ok(header) => {
                        let body_len = header.body_len() as usize;
                        if body_len == 0 {
                            let event = FramerEvent::Frame {
                                command: header.command(),
                                sequence: header.sequence(),
                                body: Bytes::new(),
                            };
                            self.state = State::Stream;
                            return Ok(Some(event));
                        }
                        self.state = State::Data { header, buf: BytesMut::with_capacity(body_len) };
                        Ok(None)
                    }
                    Err(err) => {
                        self.state = State::Stream;
                        Err(err)
                    }
                }
            }
            State::Data { header, buf } => {
                if byte == ESCAPE {
                    // First half of a doubled escape inside DATA; wait for the
                    // companion byte before deciding literal-vs-dangling.
                    self.state = State::DataEsc { header, buf };
                    return Ok(None);
                }
                let mut buf = buf;
                buf.extend_from_slice(&[byte]);
                self.finish_data(header, buf)
            }
            State::DataEsc { header, buf } => {
                if byte != ESCAPE {
                    self.state = State::Stream;
                    return Err(ProtocolError::DanglingEscape);
                }
                // Doubled escape inside DATA collapses to one literal byte.
                let mut buf = buf;
                buf.extend_from_slice(&[ESCAPE]);
                self.finish_data(header, buf)
            }
        }
    }

    fn finish_data(&mut self, header: FrameHeader, buf: BytesMut) -> Result<Option<FramerEvent>> {
        let body_len = header.body_len() as usize;
        if buf.len() < body_len {
            self.state = State::Data { header, buf };
            return Ok(None);
        }
        let event = FramerEvent::Frame {
            command: header.command(),
            sequence: header.sequence(),
            body: buf.freeze(),
        };
        self.state = State::Stream;
        Ok(Some(event))
    }

    /// Feeds a whole slice, returning every frame it completes in order.
    pub fn feed_slice(&mut self, bytes: &[u8]) -> Result<Vec<FramerEvent>> {
        let mut events = Vec::new();
        for &byte in bytes {
            if let Some(event) = self.feed(byte)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// True if the framer is mid-frame; a caller tearing down the session
    /// can use this to decide whether a dangling escape is an error.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(command: u16, sequence: u8, body: &[u8]) -> Vec<u8> {
        let header = FrameHeader::new(command, sequence, body.len()).unwrap();
        let mut out = vec![ESCAPE];
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn decodes_a_simple_frame() {
        let mut framer = Framer::new();
        let wire = encode(0x1000, 3, b"payload");
        let events = framer.feed_slice(&wire).unwrap();
        assert_eq!(
            events,
            vec![FramerEvent::Frame { command: 0x1000, sequence: 3, body: Bytes::from_static(b"payload") }]
        );
        assert!(framer.is_idle());
    }

    #[test]
    fn decodes_a_zero_length_body() {
        let mut framer = Framer::new();
        let wire = encode(0x4007, 0, b"");
        let events = framer.feed_slice(&wire).unwrap();
        assert_eq!(events, vec![FramerEvent::Frame { command: 0x4007, sequence: 0, body: Bytes::new() }]);
    }

    #[test]
    fn doubled_escape_in_body_collapses_to_one_literal_byte() {
        let mut framer = Framer::new();
        let body = [ESCAPE, ESCAPE, b'x'];
        let header = FrameHeader::new(0x1000, 0, body.len()).unwrap();
        let mut wire = vec![ESCAPE];
        wire.extend_from_slice(&header.to_bytes());
        // Stuff the literal ESCAPE byte as a doubled pair, then a plain byte.
        wire.push(ESCAPE);
        wire.push(ESCAPE);
        wire.push(b'x');
        let events = framer.feed_slice(&wire).unwrap();
        assert_eq!(
            events,
            vec![FramerEvent::Frame {
                command: 0x1000,
                sequence: 0,
                body: Bytes::from(vec![ESCAPE, b'x'])
            }]
        );
    }

    #[test]
    fn dangling_escape_in_body_is_an_error() {
        let mut framer = Framer::new();
        let header = FrameHeader::new(0x1000, 0, 2).unwrap();
        let mut wire = vec![ESCAPE];
        wire.extend_from_slice(&header.to_bytes());
        wire.push(ESCAPE);
        let result = framer.feed_slice(&[wire.as_slice(), &[b'x']].concat());
        assert!(matches!(result, Err(ProtocolError::DanglingEscape)));
        assert!(framer.is_idle());
    }

    #[test]
    fn multiple_frames_back_to_back() {
        let mut framer = Framer::new();
        let mut wire = encode(0x1000, 1, b"a");
        wire.extend(encode(0x1001, 2, b"bc"));
        let events = framer.feed_slice(&wire).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn malformed_header_resets_to_stream() {
        let mut framer = Framer::new();
        let mut wire = vec![ESCAPE];
        wire.extend_from_slice(&[0u8, 0, 0, 0, 3, 0, 0, 0]); // length 3 < HEADER_SIZE
        let result = framer.feed_slice(&wire);
        assert!(result.is_err());
        assert!(framer.is_idle());
    }
}
