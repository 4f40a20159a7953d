//! LPEx-style feed report generation (spec §4.11, §6).
//!
//! Bounded memory: only one profile-period's worth of per-`(meter,
//! register)` rows is buffered at a time; the generator flushes to a CSV
//! file whenever a row's slot crosses the current period boundary, then
//! advances the window and keeps streaming (spec §4.11 step 4).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use smf_proto::{Obis, Profile, ServerId};
use thiserror::Error;

use crate::source::{ReadingRow, ReadoutSource, SourceError};

/// Errors raised while generating a feed report.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The underlying readout source failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// Writing the CSV output failed.
    #[error("I/O error: {0}")]
    Io(String),
    /// The CSV writer failed (quoting/escaping or flush error).
    #[error("CSV error: {0}")]
    Csv(String),
}

impl From<std::io::Error> for ReportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<csv::Error> for ReportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

/// Tunables for [`generate`]. Kept as a `*Config` struct with a
/// `Default`, in the teacher's style of exposing tunables without doing
/// config-file I/O.
#[derive(Debug, Clone)]
pub struct FeedReportConfig {
    /// How far back from `now` to start the report (spec §4.11 step 1).
    pub backtrack: ChronoDuration,
    /// Filename prefix (`{prefix}-{granularity}-{meter}_{timestamp}.csv`).
    pub prefix: String,
    /// Whether to write the optional `LPEX V2.0` leading version-tag
    /// line (spec §6: "First line *may* be a version tag"). The
    /// original emits it only for certain report variants; this is left
    /// as a caller choice rather than hard-coded either way.
    pub write_version_tag: bool,
}

impl Default for FeedReportConfig {
    fn default() -> Self {
        Self {
            backtrack: ChronoDuration::hours(24),
            prefix: "LPEx".to_owned(),
            write_version_tag: true,
        }
    }
}

fn align_to_period(t: DateTime<Utc>, profile: Profile) -> DateTime<Utc> {
    profile.from_slot(profile.to_slot(t))
}

fn granularity_label(profile: Profile) -> &'static str {
    match profile {
        Profile::Minute1 => "1min",
        Profile::Minute15 => "15min",
        Profile::Minute60 => "60min",
        Profile::Hour24 => "24h",
        Profile::Monthly => "1month",
        Profile::Yearly => "1year",
    }
}

/// Generates LPEx-style feed reports for `meter` over `[now - backtrack,
/// now)`, one CSV file per period chunk (spec §4.11).
///
/// Each produced file contains one line per register that had at least
/// one reading in that chunk: timestamp, customer columns (left blank;
/// no customer directory is part of this crate's scope), register, unit,
/// conversion factor (always `1`), measuring period in minutes, then one
/// `(advance, status)` pair per slot in the chunk.
pub fn generate(
    source: &impl ReadoutSource,
    meter: ServerId,
    register_filter: Option<Obis>,
    profile: Profile,
    now: DateTime<Utc>,
    config: &FeedReportConfig,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, ReportError> {
    let range_start = now - config.backtrack;
    let mut start = align_to_period(range_start, profile);
    let mut written = Vec::new();

    while start < now {
        let next_stop = next_period_boundary(start, profile);
        let rows = source.rows_in_range(meter, register_filter, profile, start, next_stop)?;
        // Always flush, even with no rows: a period with no readings still
        // gets a header-only CSV file (spec §8, "report generation over an
        // empty time range produces a header-only CSV file").
        let path = write_chunk(&rows, meter, profile, start, next_stop, config, output_dir)?;
        written.push(path);
        start = next_stop;
    }

    Ok(written)
}

/// End of the reporting-period chunk that starts at `start` (spec §4.11
/// step 1/4: "`next_stop = start + period`"). A *period* here is one full
/// reporting window, not one profile slot — for the sub-daily profiles
/// that's a calendar day, matching `examples/original_source/src/lib/
/// report/src/feed.cpp`'s `reporting_period`, so that consecutive slots
/// land in the same chunk and an advance (the difference between two
/// consecutive slot values) can actually be computed in `write_chunk`.
fn next_period_boundary(start: DateTime<Utc>, profile: Profile) -> DateTime<Utc> {
    match profile {
        Profile::Minute1 | Profile::Minute15 | Profile::Minute60 => {
            start.date_naive().and_time(NaiveTime::MIN).and_utc() + ChronoDuration::days(1)
        }
        Profile::Hour24 => next_month_start(start),
        Profile::Monthly => Utc
            .with_ymd_and_hms(start.year() + 1, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(start + ChronoDuration::days(366)),
        Profile::Yearly => {
            let slot = profile.to_slot(start);
            profile.from_slot(slot + 1)
        }
    }
}

fn next_month_start(start: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = (start.year(), start.month());
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .unwrap_or(start + ChronoDuration::days(32))
}

fn write_chunk(
    rows: &[ReadingRow],
    meter: ServerId,
    profile: Profile,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    config: &FeedReportConfig,
    output_dir: &Path,
) -> Result<PathBuf, ReportError> {
    let start_slot = profile.to_slot(start);
    let end_slot = profile.to_slot(stop);

    // (register) -> slot -> (value, status)
    let mut by_register: BTreeMap<Obis, BTreeMap<i64, (f64, u32)>> = BTreeMap::new();
    for row in rows {
        let slot = profile.to_slot(row.act_time);
        by_register.entry(row.register).or_default().insert(slot, (row.value, row.status));
    }

    let filename = format!(
        "{}-{}-{}_{}.csv",
        config.prefix,
        granularity_label(profile),
        meter,
        start.format("%Y%m%dT%H%M")
    );
    let path = output_dir.join(filename);
    let file = std::fs::File::create(&path)?;
    let mut buf = std::io::BufWriter::new(file);

    if config.write_version_tag {
        writeln!(buf, "LPEX V2.0")?;
    }

    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut buf);
    let measuring_period_minutes = profile.fixed_period_seconds().map_or(0, |secs| secs / 60);

    let mut header = vec![
        "Datum".to_owned(),
        "Zeit".to_owned(),
        "Kundennummer".to_owned(),
        "Register".to_owned(),
        "Einheit".to_owned(),
        "Umrechnungsfaktor".to_owned(),
        "Messperiodendauer".to_owned(),
    ];
    for slot in start_slot..end_slot {
        header.push(format!("Wert{slot}"));
        header.push(format!("Status{slot}"));
    }
    writer.write_record(&header)?;

    for (register, slots) in &by_register {
        let unit = rows
            .iter()
            .find(|r| r.register == *register)
            .map_or(0, |r| r.unit);

        let mut record = vec![
            start.format("%d.%m.%Y").to_string(),
            start.format("%H:%M:%S").to_string(),
            String::new(),
            register.to_string(),
            unit.to_string(),
            "1".to_owned(),
            measuring_period_minutes.to_string(),
        ];

        for slot in start_slot..end_slot {
            let current = slots.get(&slot);
            let next = slots.get(&(slot + 1));
            match (current, next) {
                (Some((v0, _)), Some((v1, _))) => record.push(format_advance(v1 - v0)),
                _ => record.push(String::new()),
            }
            let status = current.map(|(_, s)| *s).unwrap_or(0);
            record.push(format_status(status));
        }

        writer.write_record(&record)?;
    }

    writer.flush()?;
    drop(writer);
    buf.flush()?;

    Ok(path)
}

fn format_advance(advance: f64) -> String {
    format!("{advance}")
}

fn format_status(status: u32) -> String {
    if status == 0 {
        "0".to_owned()
    } else {
        format!("{status:X}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use chrono::TimeZone;

    fn meter() -> ServerId {
        ServerId::new(1, ServerId::pack_manufacturer(*b"LUG"), 1, 1, None)
    }

    #[test]
    fn empty_range_produces_header_only_csv() {
        let source = MemorySource::default();
        let now = Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let config =
            FeedReportConfig { backtrack: ChronoDuration::minutes(15), ..Default::default() };
        let written = generate(&source, meter(), None, Profile::Minute15, now, &config, dir.path()).unwrap();
        assert_eq!(written.len(), 1);

        let contents = std::fs::read_to_string(&written[0]).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("LPEX V2.0"));
        assert!(lines.next().unwrap().starts_with("Datum,Zeit,Kundennummer"));
        assert!(lines.next().is_none(), "no data rows for a register with no readings");
    }

    #[test]
    fn one_register_two_readings_emits_one_advance() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let t1 = t0 + ChronoDuration::minutes(15);
        let register = Obis::new([1, 0, 1, 8, 0, 0xFF]);
        let rows = vec![
            ReadingRow { meter: meter(), register, act_time: t0, value: 100.0, unit: 30, status: 0 },
            ReadingRow { meter: meter(), register, act_time: t1, value: 105.0, unit: 30, status: 0 },
        ];
        let source = MemorySource::new(rows);
        let now = t0 + ChronoDuration::hours(1);
        let dir = tempfile::tempdir().unwrap();
        let config = FeedReportConfig { backtrack: ChronoDuration::hours(1), ..Default::default() };
        let written =
            generate(&source, meter(), None, Profile::Minute15, now, &config, dir.path()).unwrap();
        // Both readings fall on 2020-01-01, which the day-wide reporting
        // window keeps as a single chunk, so the advance between them is
        // computable from within one file.
        assert_eq!(written.len(), 1);

        let contents = std::fs::read_to_string(&written[0]).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("LPEX V2.0"));
        let header: Vec<&str> = lines.next().unwrap().split(',').collect();
        let slot0 = Profile::Minute15.to_slot(t0);
        let wert_col = header
            .iter()
            .position(|h| *h == format!("Wert{slot0}"))
            .expect("slot column for the first reading's slot is present");

        let data_row: Vec<&str> = lines.next().unwrap().split(',').collect();
        assert_eq!(
            data_row[wert_col], "5",
            "advance from the reading at slot {slot0} (100) to slot {} (105) should be 5",
            slot0 + 1
        );
    }
}
