//! wM-Bus AES-128 mode-5/7 payload decryption (spec §4.7).
//!
//! The IV is derived from the long header's secondary address and access
//! number per OMS; the key itself is looked up by `ServerId` elsewhere and
//! handed in here, since key custody (the meter-access table) is a
//! concern of the layer driving this module, not of the cipher itself.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use smf_proto::mbus::LongHeader;
use thiserror::Error;
use zeroize::Zeroizing;

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// 16-byte AES-128 meter key, held zeroizing-on-drop.
pub type MeterKey = Zeroizing<[u8; 16]>;

/// Encryption mode carried in the long header's signature low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Mode 5: AES-128-CBC, IV derived from the secondary address.
    Mode5,
    /// Mode 7: AES-128-CBC with a per-telegram IV variant (handled
    /// identically here; OMS mode 7 differs only in key derivation,
    /// which is out of scope — the decryptor is handed the final key).
    Mode7,
}

impl EncryptionMode {
    /// Maps the long header's encryption-mode byte to a known mode.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            5 => Some(Self::Mode5),
            7 => Some(Self::Mode7),
            _ => None,
        }
    }
}

/// Errors raised while decrypting a wM-Bus application-layer payload.
///
/// Corresponds to the spec §7 `DecryptError` taxonomy kind: always
/// transient from the gateway's point of view (a different key or a
/// resend might succeed), but the individual frame is always discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WmbusError {
    /// Encryption-mode byte was neither 5 nor 7.
    #[error("unsupported wM-Bus encryption mode {0:#04x}")]
    UnsupportedMode(u8),

    /// Ciphertext length was not a multiple of the AES block size, or the
    /// block cipher otherwise rejected the input.
    #[error("AES-CBC decryption failed: malformed ciphertext")]
    CipherError,

    /// Decryption succeeded but the mandatory `2F 2F` marker was absent,
    /// which per OMS indicates the wrong key was used.
    #[error("missing 2F 2F marker after decryption: wrong key")]
    MissingMarker,
}

/// Outcome of attempting to decrypt an application-layer payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Payload decrypted and the `2F 2F` marker stripped.
    Decrypted(Vec<u8>),
    /// No key was configured for this server ID; payload is passed
    /// through unmodified, flagged so downstream consumers know it is
    /// still ciphertext.
    Passthrough(Vec<u8>),
}

/// Derives the 16-byte CBC IV from a long header's secondary address and
/// access number (spec §4.7): the 8-byte secondary address, followed by
/// the access-number octet repeated 8 times.
#[must_use]
pub fn derive_iv(header: &LongHeader) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[0..4].copy_from_slice(&header.serial.to_le_bytes());
    iv[4..6].copy_from_slice(&header.manufacturer.to_le_bytes());
    iv[6] = header.version;
    iv[7] = header.medium;
    iv[8..16].copy_from_slice(&[header.access_no; 8]);
    iv
}

/// Decrypts an application-layer payload per spec §4.7.
///
/// When `key` is `None` the payload is returned as-is via
/// [`DecryptOutcome::Passthrough`] and no cipher operation is attempted.
/// When a key is present, the ciphertext is decrypted under AES-128-CBC
/// with the derived IV and the leading `2F 2F` marker is verified and
/// stripped; its absence means the configured key was wrong.
pub fn decrypt_payload(
    header: &LongHeader,
    ciphertext: &[u8],
    key: Option<&MeterKey>,
) -> Result<DecryptOutcome, WmbusError> {
    let Some(key) = key else {
        tracing::warn!(server = %header.to_server_id(), "no meter key configured, passing through ciphertext");
        return Ok(DecryptOutcome::Passthrough(ciphertext.to_vec()));
    };

    if EncryptionMode::from_byte(header.encryption_mode()).is_none() {
        return Err(WmbusError::UnsupportedMode(header.encryption_mode()));
    }

    let iv = derive_iv(header);
    let mut buf = ciphertext.to_vec();
    let cipher = Aes128CbcDec::new_from_slices(key.as_slice(), &iv).map_err(|_| WmbusError::CipherError)?;
    let plaintext =
        cipher.decrypt_padded_mut::<NoPadding>(&mut buf).map_err(|_| WmbusError::CipherError)?;

    if plaintext.len() < 2 || plaintext[0..2] != [0x2F, 0x2F] {
        tracing::warn!(server = %header.to_server_id(), "missing 2F 2F marker, wrong key");
        return Err(WmbusError::MissingMarker);
    }

    Ok(DecryptOutcome::Decrypted(plaintext[2..].to_vec()))
}
