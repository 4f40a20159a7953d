//! Core data model: `ServerId`, `Obis`, `Profile`, and slot arithmetic.
//!
//! These are the entities every codec in this crate produces or consumes.
//! Kept free of any codec-specific concern (SML, M-Bus) so both can share
//! one definition of "what a register address is" and "what a time slot
//! is".

use std::fmt;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Binary identity of a meter or gateway (8 or 9 octets on the wire).
///
/// Byte 0 is the medium class (wired vs. wireless), bytes 1-2 the
/// manufacturer code, bytes 3-6 the device serial (little-endian on the
/// wire), byte 7 the protocol version, and the optional byte 8 the medium.
///
/// # Invariants
///
/// Round-trips through [`ServerId::decode`]/[`ServerId::encode`] are
/// bit-exact; the [`fmt::Display`] form is stable across equal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId {
    medium_class: u8,
    manufacturer: u16,
    serial: u32,
    version: u8,
    medium: Option<u8>,
}

impl ServerId {
    /// Builds a `ServerId` from its logical fields.
    #[must_use]
    pub const fn new(
        medium_class: u8,
        manufacturer: u16,
        serial: u32,
        version: u8,
        medium: Option<u8>,
    ) -> Self {
        Self { medium_class, manufacturer, serial, version, medium }
    }

    /// Medium class octet (byte 0).
    #[must_use]
    pub const fn medium_class(&self) -> u8 {
        self.medium_class
    }

    /// Manufacturer code (bytes 1-2, big-endian on the wire).
    #[must_use]
    pub const fn manufacturer(&self) -> u16 {
        self.manufacturer
    }

    /// Device serial number (bytes 3-6, little-endian on the wire).
    #[must_use]
    pub const fn serial(&self) -> u32 {
        self.serial
    }

    /// Protocol version octet (byte 7).
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    /// Medium octet (byte 8), present only in the 9-byte form.
    #[must_use]
    pub const fn medium(&self) -> Option<u8> {
        self.medium
    }

    /// Packs a 3-letter ASCII manufacturer code into the wire's 5-bit-per-letter form.
    ///
    /// `((c1-64)<<10)|((c2-64)<<5)|(c3-64)` per the external wire format.
    #[must_use]
    pub fn pack_manufacturer(code: [u8; 3]) -> u16 {
        let c1 = u16::from(code[0].saturating_sub(64) & 0x1F);
        let c2 = u16::from(code[1].saturating_sub(64) & 0x1F);
        let c3 = u16::from(code[2].saturating_sub(64) & 0x1F);
        (c1 << 10) | (c2 << 5) | c3
    }

    /// Unpacks the 5-bit-per-letter manufacturer code into 3 ASCII letters.
    #[must_use]
    pub fn unpack_manufacturer(packed: u16) -> [u8; 3] {
        let c1 = ((packed >> 10) & 0x1F) as u8 + 64;
        let c2 = ((packed >> 5) & 0x1F) as u8 + 64;
        let c3 = (packed & 0x1F) as u8 + 64;
        [c1, c2, c3]
    }

    /// Decodes a `ServerId` from its 8- or 9-byte wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 8 && bytes.len() != 9 {
            return Err(ProtocolError::InvalidServerId(bytes.len()));
        }
        let medium_class = bytes[0];
        let manufacturer = u16::from_be_bytes([bytes[1], bytes[2]]);
        let serial = u32::from_le_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
        let version = bytes[7];
        let medium = if bytes.len() == 9 { Some(bytes[8]) } else { None };
        Ok(Self { medium_class, manufacturer, serial, version, medium })
    }

    /// Encodes this `ServerId` to its 8- or 9-byte wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        out.push(self.medium_class);
        out.extend_from_slice(&self.manufacturer.to_be_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.push(self.version);
        if let Some(medium) = self.medium {
            out.push(medium);
        }
        out
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}-{:04x}-{:08x}-{:02x}",
            self.medium_class, self.manufacturer, self.serial, self.version
        )?;
        if let Some(medium) = self.medium {
            write!(f, "-{medium:02x}")?;
        }
        Ok(())
    }
}

/// A 6-octet OBIS register address (`A-B:C.D.E*F`).
///
/// # Invariants
///
/// Equality and ordering are lexicographic over the 6 bytes — the derived
/// `Ord`/`PartialOrd` on `[u8; 6]` already has this shape, so no custom
/// implementation is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Obis(pub [u8; 6]);

impl Obis {
    /// Builds an `Obis` from its 6 octets.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Decodes an `Obis` from a byte slice, requiring exactly 6 bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let array: [u8; 6] =
            bytes.try_into().map_err(|_| ProtocolError::InvalidObis(bytes.len()))?;
        Ok(Self(array))
    }

    /// The 6 raw octets.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for Obis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a}-{b}:{c}.{d}.{e}*{g}")
    }
}

/// A sampling granularity identified by an OBIS code (spec §3, §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Profile {
    /// 1-minute profile.
    Minute1,
    /// 15-minute profile.
    Minute15,
    /// 60-minute (hourly) profile.
    Minute60,
    /// 24-hour (daily) profile.
    Hour24,
    /// Calendar-month profile.
    Monthly,
    /// Calendar-year profile.
    Yearly,
}

impl Profile {
    /// The fixed-width profiles have a constant period in seconds; calendar
    /// profiles (monthly/yearly) do not and return `None`.
    #[must_use]
    pub const fn fixed_period_seconds(self) -> Option<i64> {
        match self {
            Self::Minute1 => Some(60),
            Self::Minute15 => Some(15 * 60),
            Self::Minute60 => Some(60 * 60),
            Self::Hour24 => Some(24 * 60 * 60),
            Self::Monthly | Self::Yearly => None,
        }
    }

    /// Maps a UTC instant to its slot index for this profile.
    ///
    /// For fixed-width profiles this is `floor(unix_seconds / period)`. For
    /// calendar profiles it is the number of whole months/years since the
    /// Unix epoch, which correctly advances across months of 28-31 days
    /// (spec §8 boundary behaviour).
    #[must_use]
    pub fn to_slot(self, t: DateTime<Utc>) -> i64 {
        match self.fixed_period_seconds() {
            Some(period) => t.timestamp().div_euclid(period),
            None => match self {
                Self::Monthly => i64::from(t.year()) * 12 + i64::from(t.month()) - 1,
                Self::Yearly => i64::from(t.year()),
                _ => unreachable!("fixed_period_seconds covers all non-calendar variants"),
            },
        }
    }

    /// Maps a slot index back to its canonical start-of-slot timestamp.
    ///
    /// # Invariants
    ///
    /// `from_slot(to_slot(t)) <= t < from_slot(to_slot(t) + 1)` for every
    /// `t` (spec §8).
    #[must_use]
    pub fn from_slot(self, slot: i64) -> DateTime<Utc> {
        match self.fixed_period_seconds() {
            Some(period) => {
                Utc.timestamp_opt(slot * period, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
            },
            None => match self {
                Self::Monthly => {
                    let year = slot.div_euclid(12);
                    let month = slot.rem_euclid(12) + 1;
                    Utc.with_ymd_and_hms(year as i32, month as u32, 1, 0, 0, 0)
                        .single()
                        .unwrap_or(DateTime::<Utc>::MIN_UTC)
                },
                Self::Yearly => Utc
                    .with_ymd_and_hms(slot as i32, 1, 1, 0, 0, 0)
                    .single()
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
                _ => unreachable!("fixed_period_seconds covers all non-calendar variants"),
            },
        }
    }

    /// Duration from `from_slot(slot)` to `from_slot(slot + 1)`.
    ///
    /// Only meaningful as a "width" for fixed profiles; for calendar
    /// profiles the width varies by slot (a 28- vs 31-day month), so
    /// callers needing the width should diff two `from_slot` calls.
    #[must_use]
    pub fn slot_width(self, slot: i64) -> ChronoDuration {
        self.from_slot(slot + 1) - self.from_slot(slot)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn server_id_round_trips_9_byte_form() {
        let bytes = [0x01, 0xa8, 0x15, 0x04, 0x45, 0x31, 0x74, 0x01, 0x02];
        let id = ServerId::decode(&bytes).unwrap();
        assert_eq!(id.encode(), bytes);
        assert_eq!(id.to_string(), "01-a815-74314504-01-02");
    }

    #[test]
    fn server_id_round_trips_8_byte_form() {
        let bytes = [0x01, 0xa8, 0x15, 0x04, 0x45, 0x31, 0x74, 0x01];
        let id = ServerId::decode(&bytes).unwrap();
        assert_eq!(id.encode(), bytes);
        assert!(id.medium().is_none());
    }

    #[test]
    fn server_id_rejects_bad_length() {
        assert!(ServerId::decode(&[0u8; 7]).is_err());
        assert!(ServerId::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn manufacturer_pack_unpack_round_trips() {
        let code = *b"LUG";
        let packed = ServerId::pack_manufacturer(code);
        assert_eq!(ServerId::unpack_manufacturer(packed), code);
    }

    #[test]
    fn obis_ordering_is_lexicographic_over_bytes() {
        let a = Obis::new([1, 0, 1, 8, 0, 255]);
        let b = Obis::new([1, 0, 2, 8, 0, 255]);
        assert!(a < b);
    }

    #[test]
    fn obis_display_format() {
        let obis = Obis::new([1, 0, 1, 8, 0, 255]);
        assert_eq!(obis.to_string(), "1-0:1.8.0*255");
    }

    #[test]
    fn slot_round_trip_invariant_minute15() {
        let t = Utc.with_ymd_and_hms(2022, 7, 19, 0, 37, 12).unwrap();
        let slot = Profile::Minute15.to_slot(t);
        let start = Profile::Minute15.from_slot(slot);
        let next_start = Profile::Minute15.from_slot(slot + 1);
        assert!(start <= t);
        assert!(t < next_start);
    }

    #[test]
    fn monthly_slot_advances_across_varying_month_lengths() {
        // Feb (28 days in 2021) -> Mar -> Apr (30 days)
        let feb = Utc.with_ymd_and_hms(2021, 2, 15, 0, 0, 0).unwrap();
        let mar = Utc.with_ymd_and_hms(2021, 3, 15, 0, 0, 0).unwrap();
        let apr = Utc.with_ymd_and_hms(2021, 4, 15, 0, 0, 0).unwrap();
        assert_eq!(Profile::Monthly.to_slot(mar), Profile::Monthly.to_slot(feb) + 1);
        assert_eq!(Profile::Monthly.to_slot(apr), Profile::Monthly.to_slot(mar) + 1);
        let feb_start = Profile::Monthly.from_slot(Profile::Monthly.to_slot(feb));
        assert_eq!(feb_start.day(), 1);
        assert_eq!(feb_start.month(), 2);
    }

    #[test]
    fn yearly_slot_boundary() {
        let dec31 = Utc.with_ymd_and_hms(2021, 12, 31, 23, 59, 59).unwrap();
        let jan1 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Profile::Yearly.to_slot(jan1), Profile::Yearly.to_slot(dec31) + 1);
    }

    proptest! {
        #[test]
        fn slot_invariant_holds_for_arbitrary_unix_seconds(secs in 0i64..2_000_000_000) {
            let t = Utc.timestamp_opt(secs, 0).single().unwrap();
            for profile in [Profile::Minute1, Profile::Minute15, Profile::Minute60, Profile::Hour24] {
                let slot = profile.to_slot(t);
                let start = profile.from_slot(slot);
                let next_start = profile.from_slot(slot + 1);
                prop_assert!(start <= t);
                prop_assert!(t < next_start);
            }
        }

        #[test]
        fn server_id_encode_decode_round_trips(
            medium_class in any::<u8>(),
            manufacturer in any::<u16>(),
            serial in any::<u32>(),
            version in any::<u8>(),
            has_medium in any::<bool>(),
            medium in any::<u8>(),
        ) {
            let id = ServerId::new(medium_class, manufacturer, serial, version, has_medium.then_some(medium));
            let encoded = id.encode();
            let decoded = ServerId::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, id);
        }
    }
}
