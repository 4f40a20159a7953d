//! Gap reports (spec §4.11): for a closed time window, list the slot
//! indexes each meter is missing readings for.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use smf_proto::Profile;

use crate::feed::ReportError;
use crate::source::ReadoutSource;

/// One meter's missing slots within a gap-report window.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterGap {
    /// Textual form of the meter's identity (spec §6: hex-encoded
    /// server-id).
    pub meter_id: String,
    /// `(slot index, canonical timestamp)` pairs for every expected slot
    /// with no reading (spec §8 scenario 5).
    pub missing: Vec<(i64, DateTime<Utc>)>,
}

/// Computes, for every meter known to `source`, the slots expected in
/// `[window_start, window_end)` at `profile`'s granularity that have no
/// reading on any register.
pub fn compute_gaps(
    source: &impl ReadoutSource,
    profile: Profile,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<MeterGap>, ReportError> {
    let start_slot = profile.to_slot(window_start);
    let end_slot = profile.to_slot(window_end);

    let mut gaps = Vec::new();
    for meter in source.known_meters()? {
        let rows = source.rows_in_range(meter, None, profile, window_start, window_end)?;
        let present: std::collections::HashSet<i64> =
            rows.iter().map(|r| profile.to_slot(r.act_time)).collect();

        let missing: Vec<(i64, DateTime<Utc>)> = (start_slot..end_slot)
            .filter(|slot| !present.contains(slot))
            .map(|slot| (slot, profile.from_slot(slot)))
            .collect();

        if !missing.is_empty() {
            gaps.push(MeterGap { meter_id: meter.to_string(), missing });
        }
    }

    Ok(gaps)
}

/// Writes `gaps` to `path` as `meterID, slot-tuples...` CSV lines (spec
/// §4.11, §6).
pub fn write_gap_report(gaps: &[MeterGap], path: &Path) -> Result<PathBuf, ReportError> {
    let file = std::fs::File::create(path)?;
    let mut buf = std::io::BufWriter::new(file);
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut buf);

    for gap in gaps {
        let mut record = vec![gap.meter_id.clone()];
        for (slot, ts) in &gap.missing {
            record.push(slot.to_string());
            record.push(ts.to_rfc3339());
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    drop(writer);
    buf.flush()?;

    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemorySource, ReadingRow};
    use chrono::{Duration as ChronoDuration, TimeZone};
    use smf_proto::{Obis, ServerId};

    fn meter() -> ServerId {
        ServerId::new(1, ServerId::pack_manufacturer(*b"LUG"), 1, 1, None)
    }

    #[test]
    fn gap_report_lists_missing_slots() {
        let register = Obis::new([1, 0, 1, 8, 0, 0xFF]);
        let window_start = Utc.with_ymd_and_hms(2022, 7, 19, 0, 0, 0).unwrap();
        let mut rows = Vec::new();
        for slot in 0..51 {
            rows.push(ReadingRow {
                meter: meter(),
                register,
                act_time: window_start + ChronoDuration::minutes(15 * slot),
                value: f64::from(slot),
                unit: 30,
                status: 0,
            });
        }
        let source = MemorySource::new(rows);
        let window_end = window_start + ChronoDuration::hours(24);

        let gaps = compute_gaps(&source, Profile::Minute15, window_start, window_end).unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].missing.len(), 45);
        assert_eq!(gaps[0].missing[0].0, 51);
    }

    #[test]
    fn no_gaps_when_every_slot_present() {
        let register = Obis::new([1, 0, 1, 8, 0, 0xFF]);
        let window_start = Utc.with_ymd_and_hms(2022, 7, 19, 0, 0, 0).unwrap();
        let mut rows = Vec::new();
        for slot in 0..4 {
            rows.push(ReadingRow {
                meter: meter(),
                register,
                act_time: window_start + ChronoDuration::minutes(15 * slot),
                value: f64::from(slot),
                unit: 30,
                status: 0,
            });
        }
        let source = MemorySource::new(rows);
        let window_end = window_start + ChronoDuration::hours(1);

        let gaps = compute_gaps(&source, Profile::Minute15, window_start, window_end).unwrap();
        assert!(gaps.is_empty());
    }
}
