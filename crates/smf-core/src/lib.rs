//! The gateway's transport-facing core: the IP-T octet scrambler (C1)
//! and the IP-T session state machine (C3).
//!
//! Like `smf-proto`, this crate does no I/O of its own — `IptSession`
//! is a pure state machine that takes frames and clock ticks as input
//! and returns `SessionAction`s for a driver to carry out. `Environment`
//! abstracts the clock and RNG so the session can be driven
//! deterministically in tests.

#![forbid(unsafe_code)]

pub mod env;
pub mod error;
pub mod scrambler;
pub mod session;

pub use env::Environment;
pub use error::SessionError;
pub use scrambler::Scrambler;
pub use session::{
    IptSession, KeyInstallTiming, SessionAction, SessionConfig, SessionState, DEFAULT_WATCHDOG_TIMEOUT,
};
