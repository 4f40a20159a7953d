//! Push-channel manager (C4), cluster bus (C8), cache store (C9), and
//! readout persistence (C10) for the gateway's master node.
//!
//! These four components live in one crate because, as in the teacher's
//! `lockframe-server`, they share a single store abstraction and a single
//! driver that wires peer events to store mutations and broadcasts. None
//! of this crate performs socket I/O itself: [`driver::ServerDriver`] is a
//! pure event-to-action translator, matching `smf_core`'s session state
//! machine one layer down the stack.

#![forbid(unsafe_code)]

pub mod cluster;
pub mod driver;
pub mod error;
pub mod push;
pub mod store;

pub use cluster::{ClusterAction, ClusterBus, Response, Verb};
pub use driver::{ServerAction, ServerConfig, ServerDriver, ServerEvent};
pub use error::{ClusterError, PushError, StoreError};
pub use push::{PushChannel, PushChannelRegistry, Target, TargetTable};
pub use store::redb_store::{Readout, ReadoutStore, SmlReadout, SmlReadoutData};
pub use store::{CacheStore, CellValue, ColumnType, ParamMap, Row, Table, TableMeta};
