//! Wire types shared across the gateway: the data model (`ServerId`,
//! `Obis`, `Profile`), IP-T transport framing, the SML codec, and the
//! M-Bus/wireless M-Bus frame parser.
//!
//! This crate only knows how to turn bytes into typed values and back.
//! It has no I/O, no clock, and no notion of a session or a store — those
//! live in `smf-core` and `smf-server`, which depend on this crate for
//! its types.

#![forbid(unsafe_code)]

pub mod errors;
pub mod ipt;
pub mod mbus;
pub mod model;
pub mod sml;

pub use errors::{ProtocolError, Result};
pub use model::{Obis, Profile, ServerId};
