//! Error types for wire-level decoding.
//!
//! One enum per concern (IP-T framing, SML, M-Bus) rather than a single
//! grab-bag, so callers can match on the failure without string-sniffing.
//! These map onto the error taxonomy every layer above eventually folds
//! into; the taxonomy names (kinds, not exceptions) appear on each variant
//! doc line.

use thiserror::Error;

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while framing or parsing the IP-T transport stream.
///
/// Corresponds to the `FrameError` taxonomy kind: malformed IP-T headers
/// are never recoverable in place, the caller tears down the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame declared a length shorter than the 8-byte header.
    #[error("frame length {length} shorter than header size 8")]
    LengthTooShort {
        /// Declared length field.
        length: u32,
    },

    /// Frame declared a length beyond `MAX_FRAME_LENGTH`.
    #[error("frame length {length} exceeds maximum {max}")]
    LengthTooLarge {
        /// Declared length field.
        length: u32,
        /// Configured maximum.
        max: u32,
    },

    /// Buffer ended before the declared length was reached.
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    FrameTruncated {
        /// Bytes the header promised.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// A dangling escape octet at end-of-stream (the framer's ESC state
    /// never resolved to either a literal escape or a HEAD start).
    #[error("dangling escape octet at end of stream")]
    DanglingEscape,

    /// SML CRC16 did not match the trailer.
    ///
    /// Corresponds to the `ChecksumError` taxonomy kind.
    #[error("SML CRC mismatch: computed {computed:#06x}, expected {expected:#06x}")]
    SmlCrcMismatch {
        /// CRC computed over the envelope.
        computed: u16,
        /// CRC read from the trailer.
        expected: u16,
    },

    /// Malformed SML TLV stream (bad type nibble, stack underflow, unterminated list).
    #[error("malformed SML TLV stream: {0}")]
    SmlMalformed(String),

    /// M-Bus 8-bit arithmetic checksum did not match.
    ///
    /// Corresponds to the `ChecksumError` taxonomy kind.
    #[error("M-Bus checksum mismatch: computed {computed:#04x}, expected {expected:#04x}")]
    MbusChecksumMismatch {
        /// Checksum computed over the user-data octets.
        computed: u8,
        /// Checksum octet read from the frame.
        expected: u8,
    },

    /// M-Bus frame with a length byte of 0, or length bytes that disagree.
    #[error("M-Bus frame has invalid length field")]
    MbusInvalidLength,

    /// M-Bus frame did not match any recognised link-layer shape.
    #[error("M-Bus frame does not match any known link-layer shape")]
    MbusUnrecognizedFrame,

    /// `ServerId` byte buffer was not 8 or 9 bytes.
    #[error("ServerId must be 8 or 9 bytes, got {0}")]
    InvalidServerId(usize),

    /// OBIS code byte buffer was not exactly 6 bytes.
    #[error("Obis code must be exactly 6 bytes, got {0}")]
    InvalidObis(usize),
}
