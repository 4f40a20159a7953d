//! M-Bus link-layer frame recognition (spec §4.6, §6).
//!
//! Three shapes, selected by the first octet: a single-byte ACK, a 5-byte
//! short frame, and a variable-length long frame whose two length octets
//! are repeated for validation.

use bytes::Bytes;

use crate::errors::{ProtocolError, Result};
use crate::model::ServerId;

const ACK: u8 = 0xE5;
const SHORT_START: u8 = 0x10;
const LONG_START: u8 = 0x68;
const FRAME_END: u8 = 0x16;

/// A recognized M-Bus link-layer frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MbusFrame {
    /// Single-octet acknowledgement.
    Ack,
    /// Short frame: control + address, no user data.
    Short {
        /// Control field.
        control: u8,
        /// Primary address.
        address: u8,
    },
    /// Long (or control) frame: control, address, CI, and user data.
    Long {
        /// Control field.
        control: u8,
        /// Primary address (0xFD/0xFE have broadcast/network meaning).
        address: u8,
        /// Control-information field, selects the application-layer shape.
        ci: u8,
        /// Everything after CI, up to (not including) the checksum octet.
        user_data: Bytes,
    },
}

/// 8-bit arithmetic checksum (sum mod 256) over the given octets (spec
/// §4.6).
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Recognizes one complete frame at the start of `data`, returning it
/// along with the number of bytes it consumed.
pub fn recognize(data: &[u8]) -> Result<(MbusFrame, usize)> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    };
    match first {
        ACK => Ok((MbusFrame::Ack, 1)),
        SHORT_START => parse_short(data),
        LONG_START => parse_long(data),
        _ => Err(ProtocolError::MbusUnrecognizedFrame),
    }
}

fn parse_short(data: &[u8]) -> Result<(MbusFrame, usize)> {
    if data.len() < 5 {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let control = data[1];
    let address = data[2];
    let expected_cs = data[3];
    let end = data[4];
    if end != FRAME_END {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let computed_cs = checksum(&[control, address]);
    if computed_cs != expected_cs {
        return Err(ProtocolError::MbusChecksumMismatch { computed: computed_cs, expected: expected_cs });
    }
    Ok((MbusFrame::Short { control, address }, 5))
}

fn parse_long(data: &[u8]) -> Result<(MbusFrame, usize)> {
    if data.len() < 6 {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let len_a = data[1];
    let len_b = data[2];
    if len_a != len_b {
        return Err(ProtocolError::MbusInvalidLength);
    }
    if len_a == 0 {
        return Err(ProtocolError::MbusInvalidLength);
    }
    if data[3] != LONG_START {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let user_len = len_a as usize; // length covers control+address+ci+user data
    let total = 4 + user_len + 2; // header(4) + user block + checksum + end
    if data.len() < total {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let block = &data[4..4 + user_len];
    let &[control, address, ci, ref rest @ ..] = block else {
        return Err(ProtocolError::MbusInvalidLength);
    };
    let expected_cs = data[4 + user_len];
    let end = data[4 + user_len + 1];
    if end != FRAME_END {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    let computed_cs = checksum(block);
    if computed_cs != expected_cs {
        return Err(ProtocolError::MbusChecksumMismatch { computed: computed_cs, expected: expected_cs });
    }
    Ok((MbusFrame::Long { control, address, ci, user_data: Bytes::copy_from_slice(rest) }, total))
}

/// Secondary-address long header carried at the start of a wM-Bus
/// application-layer payload (spec §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LongHeader {
    /// Device serial number.
    pub serial: u32,
    /// Manufacturer code (packed per spec §6).
    pub manufacturer: u16,
    /// Device/protocol version.
    pub version: u8,
    /// Medium code (electricity, gas, heat, water, ...).
    pub medium: u8,
    /// Access (frame) number, used in IV derivation for wM-Bus (spec §4.7).
    pub access_no: u8,
    /// Status byte.
    pub status: u8,
    /// Encryption-mode/signature field.
    pub signature: u16,
}

impl LongHeader {
    /// Parses the 12-byte long header from the start of `data`.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 12 {
            return Err(ProtocolError::MbusUnrecognizedFrame);
        }
        let serial = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let manufacturer = u16::from_le_bytes([data[4], data[5]]);
        let version = data[6];
        let medium = data[7];
        let access_no = data[8];
        let status = data[9];
        let signature = u16::from_le_bytes([data[10], data[11]]);
        Ok((Self { serial, manufacturer, version, medium, access_no, status, signature }, 12))
    }

    /// Derives a [`ServerId`] from this header (spec §3).
    #[must_use]
    pub fn to_server_id(&self) -> ServerId {
        ServerId::new(self.medium, self.manufacturer, self.serial, self.version, Some(self.medium))
    }

    /// Encryption mode encoded in the low byte of `signature` per OMS
    /// (used to pick between mode 5 and mode 7 wM-Bus decryption).
    #[must_use]
    pub const fn encryption_mode(&self) -> u8 {
        (self.signature & 0x00FF) as u8
    }
}
