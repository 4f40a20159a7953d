//! The storage-independent seam the report engine reads through (spec
//! §4.11). Kept as a trait, never a concrete storage type, so this crate
//! does not depend on `smf-server`'s storage internals — grounded in the
//! teacher's pattern of depending on the `Storage` *trait* across crate
//! boundaries, never a concrete implementation.

use chrono::{DateTime, Utc};
use smf_proto::{Obis, Profile, ServerId};
use thiserror::Error;

/// Errors a [`ReadoutSource`] implementation may surface.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The underlying storage failed to read.
    #[error("readout source error: {0}")]
    Backend(String),
}

/// One decoded register reading, as stored by `smf-server`'s readout
/// persistence (C10), reduced to what the report engine needs: a numeric
/// value at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRow {
    /// Meter this reading came from.
    pub meter: ServerId,
    /// Register address.
    pub register: Obis,
    /// Sample time (already normalised to the profile's slot boundary by
    /// the writer, spec §4.10).
    pub act_time: DateTime<Utc>,
    /// Decoded numeric value (after applying the SML decimal scaler).
    pub value: f64,
    /// Physical unit code, carried through for the CSV header.
    pub unit: u8,
    /// Protocol-level status word for this readout's envelope.
    pub status: u32,
}

/// Abstraction over wherever readouts are stored, so the report engine
/// can be tested and used without depending on `smf-server`.
pub trait ReadoutSource {
    /// Stream every reading for `meter` (optionally filtered to
    /// `register`) with `act_time` in `[start, end)`, for the given
    /// `profile`, ordered by `act_time`.
    fn rows_in_range(
        &self,
        meter: ServerId,
        register: Option<Obis>,
        profile: Profile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReadingRow>, SourceError>;

    /// Every distinct meter known to this source (used by the gap report
    /// to enumerate which meters to check for missing slots).
    fn known_meters(&self) -> Result<Vec<ServerId>, SourceError>;
}

/// An in-memory [`ReadoutSource`], useful for tests and for feeding the
/// report engine from data already loaded by the caller.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rows: Vec<ReadingRow>,
}

impl MemorySource {
    /// Build a source from a fixed set of rows.
    pub fn new(rows: Vec<ReadingRow>) -> Self {
        Self { rows }
    }
}

impl ReadoutSource for MemorySource {
    fn rows_in_range(
        &self,
        meter: ServerId,
        register: Option<Obis>,
        _profile: Profile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReadingRow>, SourceError> {
        let mut rows: Vec<ReadingRow> = self
            .rows
            .iter()
            .filter(|r| {
                r.meter == meter
                    && register.is_none_or(|reg| reg == r.register)
                    && r.act_time >= start
                    && r.act_time < end
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.act_time);
        Ok(rows)
    }

    fn known_meters(&self) -> Result<Vec<ServerId>, SourceError> {
        let mut meters: Vec<ServerId> = self.rows.iter().map(|r| r.meter).collect();
        meters.sort_by_key(ServerId::serial);
        meters.dedup();
        Ok(meters)
    }
}
