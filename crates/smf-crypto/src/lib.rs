//! wM-Bus payload decryption (C7, spec §4.7).
//!
//! AES-128-CBC with an IV derived from the secondary address and access
//! number of a long-header wM-Bus frame. Key lookup by server ID is a
//! concern of the caller (the meter-access table lives in `smf-server`);
//! this crate only knows how to turn ciphertext plus a key into
//! plaintext, or flag ciphertext it cannot decrypt.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod wmbus;

pub use wmbus::{decrypt_payload, derive_iv, DecryptOutcome, EncryptionMode, MeterKey, WmbusError};
