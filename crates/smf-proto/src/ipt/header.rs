//! The fixed 8-byte IP-T frame header.
//!
//! Laid out the way the teacher's frame header is: a `#[repr(C, packed)]`
//! struct with `zerocopy` derives so a received buffer can be reinterpreted
//! in place with no copy, and manual `Debug`/`PartialEq` because packed
//! layouts block those derives.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Frame header is always exactly this many bytes (spec §6).
pub const HEADER_SIZE: usize = 8;

/// Largest body length this implementation will allocate for.
///
/// Not part of the wire format itself (the wire `length` field is a full
/// `u32`); this bounds how much a peer can make us buffer before framing
/// gives up and tears the session down (spec §4.2, `FrameError`).
pub const MAX_FRAME_LENGTH: u32 = 16 * 1024 * 1024;

/// Fixed 8-byte IP-T frame header.
///
/// Wire layout: 1 reserved octet (always 0, ignored on read), a
/// big-endian 16-bit command, an 8-bit sequence, and a little-endian
/// 32-bit length (spec §6) that includes this 8-byte header itself.
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FrameHeader {
    reserved: u8,
    command_be: [u8; 2],
    sequence: u8,
    length_le: [u8; 4],
}

impl FrameHeader {
    /// Builds a header for a frame carrying `body_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::LengthTooLarge`] if the total frame length
    /// (header + body) would not fit in a `u32` or exceeds
    /// [`MAX_FRAME_LENGTH`].
    pub fn new(command: u16, sequence: u8, body_len: usize) -> Result<Self> {
        let total = u32::try_from(body_len)
            .ok()
            .and_then(|n| n.checked_add(HEADER_SIZE as u32))
            .ok_or(ProtocolError::LengthTooLarge { length: u32::MAX, max: MAX_FRAME_LENGTH })?;
        if total > MAX_FRAME_LENGTH {
            return Err(ProtocolError::LengthTooLarge { length: total, max: MAX_FRAME_LENGTH });
        }
        Ok(Self {
            reserved: 0,
            command_be: command.to_be_bytes(),
            sequence,
            length_le: total.to_le_bytes(),
        })
    }

    /// Parses a header from exactly [`HEADER_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::FrameTruncated { expected: HEADER_SIZE, actual: bytes.len() });
        }
        let header = Self::ref_from_prefix(bytes)
            .map(|(header, _rest)| *header)
            .map_err(|_| ProtocolError::FrameTruncated { expected: HEADER_SIZE, actual: bytes.len() })?;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        let length = self.length();
        if length < HEADER_SIZE as u32 {
            return Err(ProtocolError::LengthTooShort { length });
        }
        if length > MAX_FRAME_LENGTH {
            return Err(ProtocolError::LengthTooLarge { length, max: MAX_FRAME_LENGTH });
        }
        Ok(())
    }

    /// Serializes this header to its 8-byte wire form.
    #[must_use]
    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        self.as_bytes().try_into().expect("FrameHeader is exactly HEADER_SIZE bytes")
    }

    /// IP-T command code.
    #[must_use]
    pub const fn command(&self) -> u16 {
        u16::from_be_bytes(self.command_be)
    }

    /// Per-direction sequence number, echoed by the responder.
    #[must_use]
    pub const fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Total frame length (header + body), little-endian on the wire.
    #[must_use]
    pub const fn length(&self) -> u32 {
        u32::from_le_bytes(self.length_le)
    }

    /// Body length implied by `length() - HEADER_SIZE`.
    #[must_use]
    pub const fn body_len(&self) -> u32 {
        self.length() - HEADER_SIZE as u32
    }
}

impl std::fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameHeader")
            .field("command", &format_args!("{:#06x}", self.command()))
            .field("sequence", &self.sequence())
            .field("length", &self.length())
            .finish()
    }
}

impl PartialEq for FrameHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}
impl Eq for FrameHeader {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_round_trips() {
        let header = FrameHeader::new(0xC001, 0x07, 42).unwrap();
        let bytes = header.to_bytes();
        let parsed = FrameHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, parsed);
        assert_eq!(parsed.command(), 0xC001);
        assert_eq!(parsed.sequence(), 0x07);
        assert_eq!(parsed.body_len(), 42);
    }

    #[test]
    fn reject_short_buffer() {
        assert!(FrameHeader::from_bytes(&[0u8; 4]).is_err());
    }

    #[test]
    fn reject_length_too_short() {
        let mut bytes = FrameHeader::new(0x1000, 0, 0).unwrap().to_bytes();
        bytes[4..8].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::LengthTooShort { .. })
        ));
    }

    #[test]
    fn reject_oversized_length() {
        let mut bytes = FrameHeader::new(0x1000, 0, 0).unwrap().to_bytes();
        bytes[4..8].copy_from_slice(&(MAX_FRAME_LENGTH + 1).to_le_bytes());
        assert!(matches!(
            FrameHeader::from_bytes(&bytes),
            Err(ProtocolError::LengthTooLarge { .. })
        ));
    }

    proptest! {
        #[test]
        fn header_round_trip_arbitrary(command: u16, sequence: u8, body_len in 0usize..1024) {
            let header = FrameHeader::new(command, sequence, body_len).unwrap();
            let parsed = FrameHeader::from_bytes(&header.to_bytes()).unwrap();
            prop_assert_eq!(parsed.command(), command);
            prop_assert_eq!(parsed.sequence(), sequence);
            prop_assert_eq!(parsed.body_len() as usize, body_len);
        }
    }
}
