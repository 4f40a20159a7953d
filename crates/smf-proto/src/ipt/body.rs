//! Typed bodies for each IP-T operation (spec §4.3).
//!
//! Bodies are plain Rust structs/enums, not a generic TLV tree — each
//! command has its own fixed shape, the same way the teacher's `Payload`
//! enum gives each opcode its own variant rather than routing everything
//! through one schema. Strings are length-prefixed (`u16` little-endian
//! count, then UTF-8 bytes); integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command;
use crate::errors::{ProtocolError, Result};

fn put_str(buf: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    buf.put_u16_le(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn get_str(buf: &mut Bytes) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::FrameTruncated { expected: 2, actual: buf.remaining() });
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::FrameTruncated { expected: len, actual: buf.remaining() });
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::SmlMalformed("body string is not valid UTF-8".into()))
}

fn need(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(ProtocolError::FrameTruncated { expected: n, actual: buf.remaining() });
    }
    Ok(())
}

/// Outcome of a login attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginResult {
    /// Login accepted.
    Success,
    /// Generic failure, no further detail.
    GeneralError,
    /// Account name not known.
    UnknownAccount,
    /// Account known, password wrong.
    WrongPassword,
    /// Account already has an active session.
    AlreadyLoggedOn,
    /// Account locked out.
    AccountLocked,
    /// Server-side malfunction.
    Malfunction,
}

impl LoginResult {
    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Success,
            2 => Self::UnknownAccount,
            3 => Self::WrongPassword,
            4 => Self::AlreadyLoggedOn,
            13 => Self::AccountLocked,
            14 => Self::Malfunction,
            _ => Self::GeneralError,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Success => 1,
            Self::UnknownAccount => 2,
            Self::WrongPassword => 3,
            Self::AlreadyLoggedOn => 4,
            Self::AccountLocked => 13,
            Self::Malfunction => 14,
            Self::GeneralError => 0,
        }
    }

    /// True if the login succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Outcome of an open-push-channel request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenPushChannelResult {
    /// Channel opened.
    Success,
    /// Named target is not reachable.
    Unreachable,
    /// Named target does not exist.
    Undefined,
    /// A channel to this target is already open.
    AlreadyOpen,
}

impl OpenPushChannelResult {
    fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Success,
            2 => Self::Undefined,
            3 => Self::AlreadyOpen,
            _ => Self::Unreachable,
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Success => 1,
            Self::Unreachable => 0,
            Self::Undefined => 2,
            Self::AlreadyOpen => 3,
        }
    }

    /// True if the channel was opened.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Generic accept/reject result shared by the remaining simple operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimpleResult {
    /// Operation accepted.
    Success,
    /// Operation rejected.
    Failure,
}

impl SimpleResult {
    fn from_code(code: u8) -> Self {
        if code == 1 {
            Self::Success
        } else {
            Self::Failure
        }
    }

    fn to_code(self) -> u8 {
        match self {
            Self::Success => 1,
            Self::Failure => 0,
        }
    }

    /// True if the operation succeeded.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A decoded/encodable IP-T operation body, paired with its command code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IptBody {
    /// Login request (`CTRL_REQ_LOGIN_PUBLIC`/`CTRL_REQ_LOGIN_SCRAMBLED`).
    LoginRequest { account: String, password: String },
    /// Login response.
    LoginResponse { result: LoginResult, watchdog_secs: u16 },
    /// Logout request, no fields.
    Logout,
    /// Logout response.
    LogoutResponse { result: SimpleResult },
    /// Watchdog keepalive request, no fields.
    Watchdog,
    /// Watchdog keepalive response, no fields.
    WatchdogResponse,
    /// Register this device as a push target.
    RegisterTarget { name: String, packet_size: u16, window_size: u8 },
    /// Response to [`IptBody::RegisterTarget`].
    RegisterTargetResponse { result: SimpleResult, target_id: u32 },
    /// Withdraw a previously registered push target.
    DeregisterTarget { name: String },
    /// Response to [`IptBody::DeregisterTarget`].
    DeregisterTargetResponse { result: SimpleResult },
    /// Open a push channel to a named target.
    OpenPushChannel {
        target: String,
        account: String,
        msisdn: String,
        version: String,
        device_id: String,
        timeout_secs: u16,
    },
    /// Response to [`IptBody::OpenPushChannel`].
    OpenPushChannelResponse { result: OpenPushChannelResult, channel_id: u32, packet_size: u16 },
    /// Close an open push channel.
    ClosePushChannel { channel_id: u32 },
    /// Response to [`IptBody::ClosePushChannel`].
    ClosePushChannelResponse { result: SimpleResult, channel_id: u32 },
    /// Transfer a block of readout data over an open push channel.
    TransferPushData { channel_id: u32, status: u8, block: u8, payload: Bytes },
    /// Response to [`IptBody::TransferPushData`].
    TransferPushDataResponse { result: SimpleResult, channel_id: u32 },
    /// Open a virtual connection to a peer identified by MSISDN.
    OpenConnection { msisdn: String },
    /// Response to [`IptBody::OpenConnection`].
    OpenConnectionResponse { result: SimpleResult },
    /// Close the current virtual connection, no fields.
    CloseConnection,
    /// Response to [`IptBody::CloseConnection`].
    CloseConnectionResponse { result: SimpleResult },
}

impl IptBody {
    /// The command code this body is carried under.
    #[must_use]
    pub const fn command(&self) -> u16 {
        match self {
            Self::LoginRequest { .. } => command::CTRL_REQ_LOGIN_SCRAMBLED,
            Self::LoginResponse { .. } => command::CTRL_RES_LOGIN_SCRAMBLED,
            Self::Logout => command::CTRL_REQ_LOGOUT,
            Self::LogoutResponse { .. } => command::CTRL_RES_LOGOUT,
            Self::Watchdog => command::CTRL_REQ_WATCHDOG,
            Self::WatchdogResponse => command::CTRL_RES_WATCHDOG,
            Self::RegisterTarget { .. } => command::CTRL_REQ_REGISTER_TARGET,
            Self::RegisterTargetResponse { .. } => command::CTRL_RES_REGISTER_TARGET,
            Self::DeregisterTarget { .. } => command::CTRL_REQ_DEREGISTER_TARGET,
            Self::DeregisterTargetResponse { .. } => command::CTRL_RES_DEREGISTER_TARGET,
            Self::OpenPushChannel { .. } => command::TP_REQ_OPEN_PUSH_CHANNEL,
            Self::OpenPushChannelResponse { .. } => command::TP_RES_OPEN_PUSH_CHANNEL,
            Self::ClosePushChannel { .. } => command::TP_REQ_CLOSE_PUSH_CHANNEL,
            Self::ClosePushChannelResponse { .. } => command::TP_RES_CLOSE_PUSH_CHANNEL,
            Self::TransferPushData { .. } => command::TP_REQ_PUSHDATA_TRANSFER,
            Self::TransferPushDataResponse { .. } => command::TP_RES_PUSHDATA_TRANSFER,
            Self::OpenConnection { .. } => command::TP_REQ_OPEN_CONNECTION,
            Self::OpenConnectionResponse { .. } => command::TP_RES_OPEN_CONNECTION,
            Self::CloseConnection => command::TP_REQ_CLOSE_CONNECTION,
            Self::CloseConnectionResponse { .. } => command::TP_RES_CLOSE_CONNECTION,
        }
    }

    /// Encodes this body to its wire bytes, not including the frame header.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Self::LoginRequest { account, password } => {
                put_str(&mut buf, account);
                put_str(&mut buf, password);
            }
            Self::LoginResponse { result, watchdog_secs } => {
                buf.put_u8(result.to_code());
                buf.put_u16_le(*watchdog_secs);
            }
            Self::Logout | Self::Watchdog | Self::WatchdogResponse | Self::CloseConnection => {}
            Self::LogoutResponse { result }
            | Self::OpenConnectionResponse { result }
            | Self::CloseConnectionResponse { result } => {
                buf.put_u8(result.to_code());
            }
            Self::RegisterTarget { name, packet_size, window_size } => {
                put_str(&mut buf, name);
                buf.put_u16_le(*packet_size);
                buf.put_u8(*window_size);
            }
            Self::RegisterTargetResponse { result, target_id } => {
                buf.put_u8(result.to_code());
                buf.put_u32_le(*target_id);
            }
            Self::DeregisterTarget { name } => put_str(&mut buf, name),
            Self::DeregisterTargetResponse { result } => buf.put_u8(result.to_code()),
            Self::OpenPushChannel { target, account, msisdn, version, device_id, timeout_secs } => {
                put_str(&mut buf, target);
                put_str(&mut buf, account);
                put_str(&mut buf, msisdn);
                put_str(&mut buf, version);
                put_str(&mut buf, device_id);
                buf.put_u16_le(*timeout_secs);
            }
            Self::OpenPushChannelResponse { result, channel_id, packet_size } => {
                buf.put_u8(result.to_code());
                buf.put_u32_le(*channel_id);
                buf.put_u16_le(*packet_size);
            }
            Self::ClosePushChannel { channel_id } => buf.put_u32_le(*channel_id),
            Self::ClosePushChannelResponse { result, channel_id } => {
                buf.put_u8(result.to_code());
                buf.put_u32_le(*channel_id);
            }
            Self::TransferPushData { channel_id, status, block, payload } => {
                buf.put_u32_le(*channel_id);
                buf.put_u8(*status);
                buf.put_u8(*block);
                buf.put_u32_le(payload.len() as u32);
                buf.put_slice(payload);
            }
            Self::TransferPushDataResponse { result, channel_id } => {
                buf.put_u8(result.to_code());
                buf.put_u32_le(*channel_id);
            }
            Self::OpenConnection { msisdn } => put_str(&mut buf, msisdn),
        }
        buf.freeze()
    }

    /// Decodes a body for the given `command` from `bytes`.
    pub fn decode(command: u16, bytes: Bytes) -> Result<Self> {
        let mut buf = bytes;
        Ok(match command {
            c if c == command::CTRL_REQ_LOGIN_PUBLIC || c == command::CTRL_REQ_LOGIN_SCRAMBLED => {
                Self::LoginRequest { account: get_str(&mut buf)?, password: get_str(&mut buf)? }
            }
            c if c == command::CTRL_RES_LOGIN_PUBLIC || c == command::CTRL_RES_LOGIN_SCRAMBLED => {
                need(&buf, 3)?;
                let result = LoginResult::from_code(buf.get_u8());
                let watchdog_secs = buf.get_u16_le();
                Self::LoginResponse { result, watchdog_secs }
            }
            command::CTRL_REQ_LOGOUT => Self::Logout,
            command::CTRL_RES_LOGOUT => {
                need(&buf, 1)?;
                Self::LogoutResponse { result: SimpleResult::from_code(buf.get_u8()) }
            }
            command::CTRL_REQ_WATCHDOG => Self::Watchdog,
            command::CTRL_RES_WATCHDOG => Self::WatchdogResponse,
            command::CTRL_REQ_REGISTER_TARGET => {
                let name = get_str(&mut buf)?;
                need(&buf, 3)?;
                let packet_size = buf.get_u16_le();
                let window_size = buf.get_u8();
                Self::RegisterTarget { name, packet_size, window_size }
            }
            command::CTRL_RES_REGISTER_TARGET => {
                need(&buf, 5)?;
                let result = SimpleResult::from_code(buf.get_u8());
                let target_id = buf.get_u32_le();
                Self::RegisterTargetResponse { result, target_id }
            }
            command::CTRL_REQ_DEREGISTER_TARGET => Self::DeregisterTarget { name: get_str(&mut buf)? },
            command::CTRL_RES_DEREGISTER_TARGET => {
                need(&buf, 1)?;
                Self::DeregisterTargetResponse { result: SimpleResult::from_code(buf.get_u8()) }
            }
            command::TP_REQ_OPEN_PUSH_CHANNEL => {
                let target = get_str(&mut buf)?;
                let account = get_str(&mut buf)?;
                let msisdn = get_str(&mut buf)?;
                let version = get_str(&mut buf)?;
                let device_id = get_str(&mut buf)?;
                need(&buf, 2)?;
                let timeout_secs = buf.get_u16_le();
                Self::OpenPushChannel { target, account, msisdn, version, device_id, timeout_secs }
            }
            command::TP_RES_OPEN_PUSH_CHANNEL => {
                need(&buf, 7)?;
                let result = OpenPushChannelResult::from_code(buf.get_u8());
                let channel_id = buf.get_u32_le();
                let packet_size = buf.get_u16_le();
                Self::OpenPushChannelResponse { result, channel_id, packet_size }
            }
            command::TP_REQ_CLOSE_PUSH_CHANNEL => {
                need(&buf, 4)?;
                Self::ClosePushChannel { channel_id: buf.get_u32_le() }
            }
            command::TP_RES_CLOSE_PUSH_CHANNEL => {
                need(&buf, 5)?;
                let result = SimpleResult::from_code(buf.get_u8());
                let channel_id = buf.get_u32_le();
                Self::ClosePushChannelResponse { result, channel_id }
            }
            command::TP_REQ_PUSHDATA_TRANSFER => {
                need(&buf, 10)?;
                let channel_id = buf.get_u32_le();
                let status = buf.get_u8();
                let block = buf.get_u8();
                let payload_len = buf.get_u32_le() as usize;
                need(&buf, payload_len)?;
                let payload = buf.copy_to_bytes(payload_len);
                Self::TransferPushData { channel_id, status, block, payload }
            }
            command::TP_RES_PUSHDATA_TRANSFER => {
                need(&buf, 5)?;
                let result = SimpleResult::from_code(buf.get_u8());
                let channel_id = buf.get_u32_le();
                Self::TransferPushDataResponse { result, channel_id }
            }
            command::TP_REQ_OPEN_CONNECTION => Self::OpenConnection { msisdn: get_str(&mut buf)? },
            command::TP_RES_OPEN_CONNECTION => {
                need(&buf, 1)?;
                Self::OpenConnectionResponse { result: SimpleResult::from_code(buf.get_u8()) }
            }
            command::TP_REQ_CLOSE_CONNECTION => Self::CloseConnection,
            command::TP_RES_CLOSE_CONNECTION => {
                need(&buf, 1)?;
                Self::CloseConnectionResponse { result: SimpleResult::from_code(buf.get_u8()) }
            }
            other => return Err(ProtocolError::SmlMalformed(format!("unknown IP-T command {other:#06x}"))),
        })
    }
}
