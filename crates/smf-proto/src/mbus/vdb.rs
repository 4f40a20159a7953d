//! Variable Data Block (VDB) reader (spec §4.6).
//!
//! A VDB is one DIF (plus DIFE chain), one VIF (plus VIFE chain), and a
//! value whose width/shape comes from the DIF's data field. The reader
//! walks a user-data payload record by record until it hits a terminator
//! DIF or runs out of bytes, skipping records whose VIF it cannot
//! interpret rather than aborting the whole payload.

use bytes::Bytes;

use super::dif::{DataField, Dif};
use super::vif::{decode_vif, VifInfo};
use crate::errors::{ProtocolError, Result};

/// One decoded variable-data record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Storage number, instantaneous/max/min/error selector.
    pub dif: Dif,
    /// Physical quantity, unit, and scaling exponent.
    pub vif: VifInfo,
    /// Raw value bytes as carried on the wire (binary little-endian, or
    /// BCD digit pairs for BCD-shaped data fields — callers that need the
    /// numeric value decode per [`DataField`]).
    pub raw: Bytes,
}

fn read_fixed_value(data: &[u8], width: u8) -> Result<(Bytes, usize)> {
    let width = width as usize;
    if data.len() < width {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    Ok((Bytes::copy_from_slice(&data[..width]), width))
}

fn read_variable_value(data: &[u8]) -> Result<(Bytes, usize)> {
    let Some(&len) = data.first() else {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    };
    let len = len as usize;
    if data.len() < 1 + len {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    }
    Ok((Bytes::copy_from_slice(&data[1..1 + len]), 1 + len))
}

/// Reads all variable-data records from `data`, stopping at the first
/// terminator DIF or at end of buffer. Records whose VIF is unrecognized
/// are dropped from the result but still consumed from the stream, so a
/// single unknown unit never derails the rest of the payload.
pub fn read_records(data: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (dif, dif_len) = Dif::decode(&data[offset..])?;
        offset += dif_len;
        if dif.is_terminator() {
            break;
        }
        let (vif, vif_len) = decode_vif(&data[offset..])?;
        offset += vif_len;
        let (raw, value_len) = match dif.data_field {
            DataField::None => (Bytes::new(), 0),
            DataField::FixedWidth(width) => read_fixed_value(&data[offset..], width)?,
            DataField::Variable => read_variable_value(&data[offset..])?,
            DataField::Terminator => unreachable!("terminator handled above"),
        };
        offset += value_len;
        if let Some(vif) = vif {
            records.push(Record { dif, vif, raw });
        }
    }
    Ok(records)
}
