//! Value Information Field (VIF/VIFE) decoding (spec §4.6).
//!
//! The primary VIF byte selects a physical quantity, a unit, and a
//! decimal scaling exponent; bit 7 chains VIFE extension bytes. Extension
//! codes beyond the primary table are not decoded here — per spec §4.6 an
//! unknown VIFE does not abort the frame, it only disqualifies the
//! current record, so [`decode_vif`] returns `Ok((None, consumed))`
//! rather than an error in that case.

use crate::errors::{ProtocolError, Result};

const EXTENSION_BIT: u8 = 0x80;
const CODE_MASK: u8 = 0x7F;

/// Physical quantity a VIF selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quantity {
    /// Energy (Wh or kJ family).
    Energy,
    /// Volume (m³ family).
    Volume,
    /// Mass (kg family).
    Mass,
    /// Cumulative on-time.
    OnTime,
    /// Cumulative operating time.
    OperatingTime,
    /// Power (W or kJ/h family).
    Power,
    /// Volume flow rate.
    VolumeFlow,
    /// Mass flow rate.
    MassFlow,
    /// Supply-side (flow) temperature.
    FlowTemperature,
    /// Return-side temperature.
    ReturnTemperature,
    /// Temperature difference.
    TemperatureDifference,
    /// Pressure.
    Pressure,
}

/// A decoded VIF: quantity, unit label, and base-10 scaling exponent.
///
/// The physical value is `raw_value * 10^exponent` in `unit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VifInfo {
    /// Physical quantity this register represents.
    pub quantity: Quantity,
    /// Unit label (not a full UN/CEFACT code — the value is what the
    /// cache/report layers display alongside the reading).
    pub unit: &'static str,
    /// Decimal scaling exponent.
    pub exponent: i8,
}

fn primary_vif(code: u8) -> Option<VifInfo> {
    let exp = |base: u8, offset: i8| i8::try_from(code - base).ok().map(|n| n + offset);
    match code {
        0x00..=0x07 => Some(VifInfo { quantity: Quantity::Energy, unit: "Wh", exponent: exp(0x00, -3)? }),
        0x08..=0x0F => Some(VifInfo { quantity: Quantity::Energy, unit: "kJ", exponent: exp(0x08, -3)? }),
        0x10..=0x17 => Some(VifInfo { quantity: Quantity::Volume, unit: "m3", exponent: exp(0x10, -6)? }),
        0x18..=0x1F => Some(VifInfo { quantity: Quantity::Mass, unit: "kg", exponent: exp(0x18, -3)? }),
        0x20..=0x23 => Some(VifInfo { quantity: Quantity::OnTime, unit: "s", exponent: 0 }),
        0x24..=0x27 => Some(VifInfo { quantity: Quantity::OperatingTime, unit: "s", exponent: 0 }),
        0x28..=0x2F => Some(VifInfo { quantity: Quantity::Power, unit: "W", exponent: exp(0x28, -3)? }),
        0x30..=0x37 => Some(VifInfo { quantity: Quantity::Power, unit: "kJ/h", exponent: exp(0x30, -3)? }),
        0x38..=0x3F => {
            Some(VifInfo { quantity: Quantity::VolumeFlow, unit: "m3/h", exponent: exp(0x38, -6)? })
        }
        0x40..=0x47 => {
            Some(VifInfo { quantity: Quantity::VolumeFlow, unit: "m3/min", exponent: exp(0x40, -7)? })
        }
        0x48..=0x4F => {
            Some(VifInfo { quantity: Quantity::VolumeFlow, unit: "m3/s", exponent: exp(0x48, -9)? })
        }
        0x50..=0x57 => Some(VifInfo { quantity: Quantity::MassFlow, unit: "kg/h", exponent: exp(0x50, -3)? }),
        0x58..=0x5B => {
            Some(VifInfo { quantity: Quantity::FlowTemperature, unit: "C", exponent: exp(0x58, -3)? })
        }
        0x5C..=0x5F => {
            Some(VifInfo { quantity: Quantity::ReturnTemperature, unit: "C", exponent: exp(0x5C, -3)? })
        }
        0x60..=0x63 => {
            Some(VifInfo { quantity: Quantity::TemperatureDifference, unit: "K", exponent: exp(0x60, -3)? })
        }
        0x68..=0x6B => Some(VifInfo { quantity: Quantity::Pressure, unit: "bar", exponent: exp(0x68, -3)? }),
        _ => None,
    }
}

/// Reads one VIF, plus any chained VIFE bytes, from the start of `data`.
///
/// Returns `(None, consumed)` when the primary code or any chained VIFE
/// is outside the known table — the caller skips the current record but
/// does not abort the frame (spec §4.6).
pub fn decode_vif(data: &[u8]) -> Result<(Option<VifInfo>, usize)> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::MbusUnrecognizedFrame);
    };
    let info = primary_vif(first & CODE_MASK);
    let mut consumed = 1;
    let mut extending = first & EXTENSION_BIT != 0;
    let mut known = info.is_some();
    while extending {
        let Some(&vife) = data.get(consumed) else {
            return Err(ProtocolError::MbusUnrecognizedFrame);
        };
        // No VIFE extension table is implemented; any chained VIFE marks
        // the record unknown, but we must still consume it to stay in sync.
        known = false;
        extending = vife & EXTENSION_BIT != 0;
        consumed += 1;
    }
    Ok((if known { info } else { None }, consumed))
}
