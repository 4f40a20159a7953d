//! Serial LMN port manager (spec §4.12): a scoped resource around one
//! local-metering-network serial line, reconfigurable at runtime via
//! OBIS-addressed option codes, fanning received bytes out to consumer
//! tasks via `tokio::sync::broadcast`.

#![forbid(unsafe_code)]

pub mod options;
pub mod port;

pub use options::{PortConfig, PortOption};
pub use port::{LmnPort, PortError, PortStatus};
