//! Readout persistence (spec §4.10, §6, §8).
//!
//! Two redb tables — `SML_READOUT` (the envelope) and `SML_READOUT_DATA`
//! (one row per register) — keyed the way the teacher's `storage/redb.rs`
//! keys its frame log: composite big-endian byte keys, `(meter_id, gen)`
//! for the envelope and `(meter_id, gen, register)` for data rows. A
//! single `WriteTransaction` wraps the envelope insert and all of its data
//! rows, giving the all-or-nothing guarantee natively.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use smf_proto::{Obis, Profile, ServerId};
use smf_report::{ReadingRow, ReadoutSource, SourceError};

use crate::error::StoreError;

const SML_READOUT: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sml_readout");
const SML_READOUT_DATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("sml_readout_data");

/// The envelope row for one inbound SML readout (spec §4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmlReadout {
    /// The 36-char textual UUID tag identifying this readout (spec §6).
    pub tag: String,
    /// Generation: monotone per-meter readout counter.
    pub gen: u64,
    /// Identity of the meter this readout came from.
    pub meter_id: ServerId,
    /// Sampling granularity this readout was taken at.
    pub profile: Profile,
    /// SML transaction id echoed from the request.
    pub trx: String,
    /// Protocol-level status word.
    pub status: u32,
    /// Sample time, normalised to the profile's slot boundary (spec §4.10).
    pub act_time: DateTime<Utc>,
    /// Wall-clock time the gateway received this readout.
    pub received: DateTime<Utc>,
}

/// A single register's data row under a readout envelope (spec §4.10).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmlReadoutData {
    /// Tag of the owning envelope.
    pub tag: String,
    /// Register address.
    pub register: Obis,
    /// Generation, matching the owning envelope's `gen`.
    pub gen: u64,
    /// Reading value, formatted as text (the wire-level SML value already
    /// decoded to its display form).
    pub reading: String,
    /// SML type code of the original value.
    pub value_type: u16,
    /// Decimal scaler applied to `reading`.
    pub scaler: i8,
    /// Physical unit code.
    pub unit: u8,
}

/// A complete readout: one envelope plus its data rows, inserted together
/// under a single transaction (spec §8: "inserting r creates exactly one
/// envelope row and `|registers(r)|` data rows, all under one
/// transaction").
#[derive(Debug, Clone)]
pub struct Readout {
    /// The envelope.
    pub envelope: SmlReadout,
    /// This readout's per-register rows.
    pub data: Vec<SmlReadoutData>,
}

fn encode_envelope_key(meter_id: &ServerId, gen: u64) -> Vec<u8> {
    let mut key = meter_id.encode();
    key.extend_from_slice(&gen.to_be_bytes());
    key
}

fn encode_data_key(meter_id: &ServerId, gen: u64, register: &Obis) -> Vec<u8> {
    let mut key = encode_envelope_key(meter_id, gen);
    key.extend_from_slice(register.as_bytes());
    key
}

fn to_io(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

fn to_ser(err: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(err.to_string())
}

/// Durable readout storage backed by redb.
///
/// Thread-safe through redb's internal locking; `Clone` is cheap (`Arc`).
#[derive(Clone)]
pub struct ReadoutStore {
    db: Arc<Database>,
}

impl ReadoutStore {
    /// Open or create a redb database at `path`, creating the readout
    /// tables if they do not yet exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(to_io)?;

        let txn = db.begin_write().map_err(to_io)?;
        {
            let _ = txn.open_table(SML_READOUT).map_err(to_io)?;
            let _ = txn.open_table(SML_READOUT_DATA).map_err(to_io)?;
        }
        txn.commit().map_err(to_io)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Insert a readout: its envelope and all data rows, atomically.
    pub fn insert_readout(&self, readout: &Readout) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(to_io)?;
        {
            let mut envelope_table = txn.open_table(SML_READOUT).map_err(to_io)?;
            let mut data_table = txn.open_table(SML_READOUT_DATA).map_err(to_io)?;

            let envelope_key =
                encode_envelope_key(&readout.envelope.meter_id, readout.envelope.gen);
            let mut envelope_bytes = Vec::new();
            ciborium::into_writer(&readout.envelope, &mut envelope_bytes).map_err(to_ser)?;
            envelope_table
                .insert(envelope_key.as_slice(), envelope_bytes.as_slice())
                .map_err(to_io)?;

            for row in &readout.data {
                let data_key = encode_data_key(
                    &readout.envelope.meter_id,
                    readout.envelope.gen,
                    &row.register,
                );
                let mut row_bytes = Vec::new();
                ciborium::into_writer(row, &mut row_bytes).map_err(to_ser)?;
                data_table.insert(data_key.as_slice(), row_bytes.as_slice()).map_err(to_io)?;
            }
        }
        txn.commit().map_err(to_io)?;
        Ok(())
    }

    /// Load the envelope and data rows for one `(meter_id, gen)` readout.
    pub fn load_readout(
        &self,
        meter_id: &ServerId,
        gen: u64,
    ) -> Result<Option<Readout>, StoreError> {
        let txn = self.db.begin_read().map_err(to_io)?;
        let envelope_table = txn.open_table(SML_READOUT).map_err(to_io)?;
        let data_table = txn.open_table(SML_READOUT_DATA).map_err(to_io)?;

        let envelope_key = encode_envelope_key(meter_id, gen);
        let Some(envelope_bytes) = envelope_table.get(envelope_key.as_slice()).map_err(to_io)?
        else {
            return Ok(None);
        };
        let envelope: SmlReadout =
            ciborium::from_reader(envelope_bytes.value()).map_err(to_ser)?;

        let start = encode_data_key(meter_id, gen, &Obis::new([0; 6]));
        let end = encode_data_key(meter_id, gen, &Obis::new([0xFF; 6]));
        let mut data = Vec::new();
        for entry in data_table.range(start.as_slice()..=end.as_slice()).map_err(to_io)? {
            let (_, value) = entry.map_err(to_io)?;
            let row: SmlReadoutData = ciborium::from_reader(value.value()).map_err(to_ser)?;
            data.push(row);
        }

        Ok(Some(Readout { envelope, data }))
    }

    /// Stream every envelope for `meter_id` with `gen` in `[from, to)`,
    /// ordered by generation (used by the report engine, C11).
    pub fn scan_meter(
        &self,
        meter_id: &ServerId,
        from_gen: u64,
        to_gen: u64,
    ) -> Result<Vec<SmlReadout>, StoreError> {
        let txn = self.db.begin_read().map_err(to_io)?;
        let envelope_table = txn.open_table(SML_READOUT).map_err(to_io)?;

        let start = encode_envelope_key(meter_id, from_gen);
        let end = encode_envelope_key(meter_id, to_gen);
        let mut out = Vec::new();
        for entry in envelope_table.range(start.as_slice()..end.as_slice()).map_err(to_io)? {
            let (_, value) = entry.map_err(to_io)?;
            out.push(ciborium::from_reader(value.value()).map_err(to_ser)?);
        }
        Ok(out)
    }
}

fn to_source(err: StoreError) -> SourceError {
    SourceError::Backend(err.to_string())
}

/// Lets the report engine (C11) read directly off the durable readout
/// store without either crate depending on the other's internals: the
/// report engine only ever sees `ReadoutSource`, never `ReadoutStore`.
impl ReadoutSource for ReadoutStore {
    fn rows_in_range(
        &self,
        meter: ServerId,
        register: Option<Obis>,
        _profile: Profile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReadingRow>, SourceError> {
        let txn = self.db.begin_read().map_err(to_io).map_err(to_source)?;
        let envelope_table = txn.open_table(SML_READOUT).map_err(to_io).map_err(to_source)?;
        let data_table = txn.open_table(SML_READOUT_DATA).map_err(to_io).map_err(to_source)?;

        let scan_start = encode_envelope_key(&meter, 0);
        let scan_end = encode_envelope_key(&meter, u64::MAX);
        let mut rows = Vec::new();
        for entry in envelope_table
            .range(scan_start.as_slice()..=scan_end.as_slice())
            .map_err(to_io)
            .map_err(to_source)?
        {
            let (_, value) = entry.map_err(to_io).map_err(to_source)?;
            let envelope: SmlReadout =
                ciborium::from_reader(value.value()).map_err(to_ser).map_err(to_source)?;
            if envelope.act_time < start || envelope.act_time >= end {
                continue;
            }

            let data_start = encode_data_key(&meter, envelope.gen, &Obis::new([0; 6]));
            let data_end = encode_data_key(&meter, envelope.gen, &Obis::new([0xFF; 6]));
            for data_entry in data_table
                .range(data_start.as_slice()..=data_end.as_slice())
                .map_err(to_io)
                .map_err(to_source)?
            {
                let (_, data_value) = data_entry.map_err(to_io).map_err(to_source)?;
                let row: SmlReadoutData =
                    ciborium::from_reader(data_value.value()).map_err(to_ser).map_err(to_source)?;
                if register.is_some_and(|reg| reg != row.register) {
                    continue;
                }
                let value: f64 = row.reading.parse().map_err(|_| {
                    SourceError::Backend(format!("non-numeric reading {:?}", row.reading))
                })?;
                rows.push(ReadingRow {
                    meter,
                    register: row.register,
                    act_time: envelope.act_time,
                    value,
                    unit: row.unit,
                    status: envelope.status,
                });
            }
        }
        rows.sort_by_key(|r| r.act_time);
        Ok(rows)
    }

    fn known_meters(&self) -> Result<Vec<ServerId>, SourceError> {
        let txn = self.db.begin_read().map_err(to_io).map_err(to_source)?;
        let envelope_table = txn.open_table(SML_READOUT).map_err(to_io).map_err(to_source)?;

        let mut meters = Vec::new();
        for entry in envelope_table.iter().map_err(to_io).map_err(to_source)? {
            let (_, value) = entry.map_err(to_io).map_err(to_source)?;
            let envelope: SmlReadout =
                ciborium::from_reader(value.value()).map_err(to_ser).map_err(to_source)?;
            if !meters.contains(&envelope.meter_id) {
                meters.push(envelope.meter_id);
            }
        }
        Ok(meters)
    }
}
