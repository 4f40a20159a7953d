//! M-Bus / wireless M-Bus link- and application-layer parsing (spec §4.6).
//!
//! [`frame::recognize`] peels off the link layer (ACK, short, long).
//! A long frame's user data is, for wM-Bus, an application layer that
//! starts with a [`frame::LongHeader`] (CI `0x72`/`0x7A`) identifying the
//! meter and carrying the access number and encryption-mode signature
//! used to decrypt the remainder, followed by [`vdb::Record`]s once
//! decrypted (or immediately, for CI `0x73`/unencrypted payloads).

pub mod dif;
pub mod frame;
pub mod vdb;
pub mod vif;

use bytes::Bytes;

use crate::errors::{ProtocolError, Result};
use crate::model::ServerId;

pub use dif::{DataField, Dif, Function};
pub use frame::{checksum, recognize, LongHeader, MbusFrame};
pub use vdb::{read_records, Record};
pub use vif::{decode_vif, Quantity, VifInfo};

/// Control-information codes that carry a long (secondary) address
/// header before the application-layer payload.
const CI_LONG_HEADER_PLAIN: u8 = 0x72;
const CI_LONG_HEADER_ENCRYPTED: u8 = 0x7A;
/// No address header; records start immediately.
const CI_SHORT_HEADER: u8 = 0x73;

/// An application-layer payload split into its (optional) address header
/// and the bytes that follow it, still possibly encrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationLayer {
    /// Secondary address header, when the CI byte indicates one is
    /// present.
    pub header: Option<LongHeader>,
    /// Bytes following the header: either cleartext VDB records or, when
    /// `header` indicates an encryption mode, ciphertext for the
    /// decryptor to handle before [`read_records`] is called.
    pub payload: Bytes,
    /// Whether `payload` is ciphertext (CI indicated an encrypted long
    /// header).
    pub encrypted: bool,
}

/// Splits a long frame's `user_data` (the bytes after CI) into an
/// [`ApplicationLayer`] per the given `ci` byte.
pub fn split_application_layer(ci: u8, user_data: &Bytes) -> Result<ApplicationLayer> {
    match ci {
        CI_LONG_HEADER_PLAIN | CI_LONG_HEADER_ENCRYPTED => {
            let (header, consumed) = LongHeader::decode(user_data)?;
            Ok(ApplicationLayer {
                header: Some(header),
                payload: user_data.slice(consumed..),
                encrypted: ci == CI_LONG_HEADER_ENCRYPTED,
            })
        }
        CI_SHORT_HEADER => {
            Ok(ApplicationLayer { header: None, payload: user_data.clone(), encrypted: false })
        }
        other => Err(ProtocolError::SmlMalformed(format!("unsupported M-Bus CI field {other:#x}"))),
    }
}

/// Convenience: derives the originating [`ServerId`] from a parsed long
/// frame, when it carries an address header.
#[must_use]
pub fn server_id_of(layer: &ApplicationLayer) -> Option<ServerId> {
    layer.header.as_ref().map(LongHeader::to_server_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_bytes(mode_signature: u16) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x0016_0913u32.to_le_bytes());
        bytes.extend_from_slice(&0x1ee6u16.to_le_bytes());
        bytes.push(0x3c);
        bytes.push(0x07);
        bytes.push(0x2A);
        bytes.push(0x00);
        bytes.extend_from_slice(&mode_signature.to_le_bytes());
        bytes
    }

    #[test]
    fn plain_long_header_yields_cleartext_payload() {
        let mut data = sample_header_bytes(0x0000);
        data.extend_from_slice(&[0x04, 0x03, 0x01, 0x00, 0x00, 0x00]);
        let user_data = Bytes::from(data);
        let layer = split_application_layer(CI_LONG_HEADER_PLAIN, &user_data).unwrap();
        assert!(!layer.encrypted);
        assert!(layer.header.is_some());
        let records = read_records(&layer.payload).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn encrypted_long_header_is_flagged() {
        let mut data = sample_header_bytes(0x0005);
        data.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        let user_data = Bytes::from(data);
        let layer = split_application_layer(CI_LONG_HEADER_ENCRYPTED, &user_data).unwrap();
        assert!(layer.encrypted);
        assert_eq!(&layer.payload[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(server_id_of(&layer).unwrap().serial(), 0x0016_0913);
    }

    #[test]
    fn short_header_has_no_address() {
        let user_data = Bytes::from_static(&[0x04, 0x03, 0x01, 0x00, 0x00, 0x00]);
        let layer = split_application_layer(CI_SHORT_HEADER, &user_data).unwrap();
        assert!(layer.header.is_none());
        assert!(server_id_of(&layer).is_none());
    }

    #[test]
    fn unsupported_ci_is_rejected() {
        let user_data = Bytes::from_static(&[0x00]);
        assert!(split_application_layer(0xFF, &user_data).is_err());
    }
}
