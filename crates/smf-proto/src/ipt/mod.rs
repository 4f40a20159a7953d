//! IP-T transport types: frame header (C1 scrambler lives in `smf-core`,
//! which depends on this crate for [`Frame`]), the byte-wise framer (C2),
//! and typed operation bodies (used by the C3 session state machine in
//! `smf-core`).

pub mod body;
pub mod command;
pub mod frame;
pub mod framer;
pub mod header;

pub use body::{IptBody, LoginResult, OpenPushChannelResult, SimpleResult};
pub use frame::Frame;
pub use framer::{Framer, FramerEvent};
pub use header::{FrameHeader, HEADER_SIZE, MAX_FRAME_LENGTH};
