//! A complete IP-T frame: header plus body.

use bytes::Bytes;

use super::header::{FrameHeader, HEADER_SIZE};
use crate::errors::{ProtocolError, Result};

/// A decoded IP-T frame: a command code, a sequence number, and an
/// opaque body. Bodies are interpreted per-command by [`super::body::IptBody`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    body: Bytes,
}

impl Frame {
    /// Builds a frame from a command, sequence, and body.
    pub fn new(command: u16, sequence: u8, body: Bytes) -> Result<Self> {
        let header = FrameHeader::new(command, sequence, body.len())?;
        Ok(Self { header, body })
    }

    /// Decodes a complete frame from `bytes`, which must hold at least
    /// the header's declared length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::from_bytes(bytes)?;
        let total = header.length() as usize;
        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated { expected: total, actual: bytes.len() });
        }
        let body = Bytes::copy_from_slice(&bytes[HEADER_SIZE..total]);
        Ok(Self { header, body })
    }

    /// Encodes this frame to its wire form: header followed by body.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.body);
        Bytes::from(out)
    }

    /// IP-T command code.
    #[must_use]
    pub const fn command(&self) -> u16 {
        self.header.command()
    }

    /// Sequence number this frame carries.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.header.sequence()
    }

    /// The frame's body, excluding the header.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn frame_round_trips() {
        let frame = Frame::new(0x1000, 3, Bytes::from_static(b"hello")).unwrap();
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn decode_rejects_truncated_body() {
        let frame = Frame::new(0x1000, 0, Bytes::from_static(b"hello")).unwrap();
        let encoded = frame.encode();
        assert!(matches!(
            Frame::decode(&encoded[..encoded.len() - 2]),
            Err(ProtocolError::FrameTruncated { .. })
        ));
    }

    proptest! {
        #[test]
        fn frame_round_trip_arbitrary(command: u16, sequence: u8, body in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = Frame::new(command, sequence, Bytes::from(body)).unwrap();
            let decoded = Frame::decode(&frame.encode()).unwrap();
            prop_assert_eq!(frame, decoded);
        }
    }
}
