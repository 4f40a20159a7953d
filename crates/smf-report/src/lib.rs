//! The reading-to-report pipeline (spec §4.11): LPEx-style feed reports
//! and gap reports over a storage-independent [`ReadoutSource`].
//!
//! Profile slot math (`to_slot`/`from_slot`) lives in `smf_proto` and is
//! reused here rather than re-derived.

#![forbid(unsafe_code)]

pub mod feed;
pub mod gap;
pub mod source;

pub use feed::{generate, FeedReportConfig, ReportError};
pub use gap::{compute_gaps, write_gap_report, MeterGap};
pub use source::{MemorySource, ReadingRow, ReadoutSource, SourceError};
