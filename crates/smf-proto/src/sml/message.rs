//! SML message envelope, body dispatch by tag, and the escape-wrapped
//! transmission framing (spec §4.5, §6, §8).

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};

use super::crc::crc16;
use super::tlv::{self, Value};
use super::tree::ObisTree;
use crate::errors::{ProtocolError, Result};
use crate::model::{Obis, ServerId};

/// Message-body tags (spec §4.5).
pub mod tag {
    /// Open-session request.
    pub const OPEN_REQUEST: u16 = 0x0100;
    /// Open-session response.
    pub const OPEN_RESPONSE: u16 = 0x0101;
    /// Close-session request.
    pub const CLOSE_REQUEST: u16 = 0x0200;
    /// Close-session response.
    pub const CLOSE_RESPONSE: u16 = 0x0201;
    /// Get-profile-list request.
    pub const GET_PROFILE_LIST_REQUEST: u16 = 0x0400;
    /// Get-profile-list response.
    pub const GET_PROFILE_LIST_RESPONSE: u16 = 0x0401;
    /// Get-proc-param request.
    pub const GET_PROC_PARAM_REQUEST: u16 = 0x0500;
    /// Get-proc-param response.
    pub const GET_PROC_PARAM_RESPONSE: u16 = 0x0501;
    /// Set-proc-param request.
    pub const SET_PROC_PARAM_REQUEST: u16 = 0x0600;
    /// Set-proc-param response.
    pub const SET_PROC_PARAM_RESPONSE: u16 = 0x0601;
    /// Get-list request.
    pub const GET_LIST_REQUEST: u16 = 0x0700;
    /// Get-list response.
    pub const GET_LIST_RESPONSE: u16 = 0x0701;
    /// Attention response, carries one of the fixed attention codes.
    pub const ATTENTION_RESPONSE: u16 = 0xFF01;
}

/// One register reading inside a get-profile-list/get-list response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeriodEntry {
    /// Register address.
    pub obis: Obis,
    /// Raw value as carried on the wire.
    pub value: Value,
    /// Decimal scaling exponent (value * 10^scaler is the physical
    /// quantity).
    pub scaler: i8,
    /// Physical unit code (DLMS/COSEM unit table).
    pub unit: u8,
}

impl PeriodEntry {
    fn to_value(&self) -> Value {
        Value::List(vec![
            Value::obis(*self.obis.as_bytes()),
            self.value.clone(),
            Value::Int(i64::from(self.scaler)),
            Value::Uint(u64::from(self.unit)),
        ])
    }

    fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .as_list()
            .ok_or_else(|| ProtocolError::SmlMalformed("period entry is not a list".into()))?;
        let [obis_v, value_v, scaler_v, unit_v] = items else {
            return Err(ProtocolError::SmlMalformed("period entry needs 4 elements".into()));
        };
        let obis = Obis::decode(obis_v.as_bytes().ok_or_else(|| {
            ProtocolError::SmlMalformed("period entry obis is not bytes".into())
        })?)?;
        let scaler = match scaler_v {
            Value::Int(s) => i8::try_from(*s)
                .map_err(|_| ProtocolError::SmlMalformed("scaler out of i8 range".into()))?,
            other => {
                return Err(ProtocolError::SmlMalformed(format!("scaler has wrong type: {other:?}")));
            }
        };
        let unit = match unit_v {
            Value::Uint(u) => u8::try_from(*u)
                .map_err(|_| ProtocolError::SmlMalformed("unit out of u8 range".into()))?,
            other => return Err(ProtocolError::SmlMalformed(format!("unit has wrong type: {other:?}"))),
        };
        Ok(Self { obis, value: value_v.clone(), scaler, unit })
    }
}

fn bytes_value(b: &Bytes) -> Value {
    Value::Bytes(b.clone())
}

fn value_as_bytes(v: &Value, what: &str) -> Result<Bytes> {
    v.as_bytes().cloned().ok_or_else(|| ProtocolError::SmlMalformed(format!("{what} is not bytes")))
}

fn optional_bytes_value(b: &Option<Bytes>) -> Value {
    b.as_ref().map_or(Value::Null, bytes_value)
}

fn value_as_optional_bytes(v: &Value) -> Option<Bytes> {
    v.as_bytes().cloned()
}

fn server_id_value(id: ServerId) -> Value {
    Value::Bytes(Bytes::from(id.encode()))
}

fn value_as_server_id(v: &Value, what: &str) -> Result<ServerId> {
    ServerId::decode(&value_as_bytes(v, what)?)
}

fn time_value(t: DateTime<Utc>) -> Value {
    Value::Uint(u64::try_from(t.timestamp().max(0)).unwrap_or(0))
}

fn value_as_time(v: &Value) -> Result<DateTime<Utc>> {
    let Value::Uint(secs) = v else {
        return Err(ProtocolError::SmlMalformed("actTime is not unsigned".into()));
    };
    Utc.timestamp_opt(i64::try_from(*secs).unwrap_or(i64::MAX), 0)
        .single()
        .ok_or_else(|| ProtocolError::SmlMalformed("actTime out of range".into()))
}

fn obis_list_value(path: &[Obis]) -> Value {
    Value::List(path.iter().map(|o| Value::obis(*o.as_bytes())).collect())
}

fn value_as_obis_list(v: &Value) -> Result<Vec<Obis>> {
    let items = v.as_list().ok_or_else(|| ProtocolError::SmlMalformed("obis list is not a list".into()))?;
    items
        .iter()
        .map(|item| Obis::decode(item.as_bytes().ok_or_else(|| {
            ProtocolError::SmlMalformed("obis list element is not bytes".into())
        })?))
        .collect()
}

/// The decoded body of an SML message, one variant per tag in [`tag`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageBody {
    /// `OPEN_REQUEST` (spec §4.5; `codepage`/`client_id`/`req_file_id`
    /// supplement from `original_source` needed for lossless round-trip).
    OpenRequest {
        /// Optional codepage identifier.
        codepage: Option<Bytes>,
        /// Requesting client identity.
        client_id: Bytes,
        /// Correlates this open with later file-transfer requests.
        req_file_id: Bytes,
        /// Login account name.
        username: Bytes,
        /// Login password.
        password: Bytes,
    },
    /// `OPEN_RESPONSE`.
    OpenResponse {
        /// Echoes the request's codepage, if any.
        codepage: Option<Bytes>,
        /// Responding server's identity.
        server_id: ServerId,
        /// Echoes the request's `req_file_id`.
        req_file_id: Bytes,
    },
    /// `CLOSE_REQUEST`, no fields.
    CloseRequest,
    /// `CLOSE_RESPONSE`, no fields.
    CloseResponse,
    /// `GET_PROFILE_LIST_REQUEST`.
    GetProfileListRequest {
        /// Target meter.
        server_id: ServerId,
        /// Login account name.
        username: Bytes,
        /// Login password.
        password: Bytes,
        /// Registers of interest; empty means "all".
        obj_list: Vec<Obis>,
        /// Inclusive start of the requested time window, if bounded.
        start: Option<DateTime<Utc>>,
        /// Exclusive end of the requested time window, if bounded.
        end: Option<DateTime<Utc>>,
    },
    /// `GET_PROFILE_LIST_RESPONSE`.
    GetProfileListResponse {
        /// Reporting meter.
        server_id: ServerId,
        /// Timestamp the readings were taken at.
        act_time: DateTime<Utc>,
        /// One entry per register in the readout.
        values: Vec<PeriodEntry>,
    },
    /// `GET_PROC_PARAM_REQUEST`.
    GetProcParamRequest {
        /// Target device.
        server_id: ServerId,
        /// Login account name.
        username: Bytes,
        /// Login password.
        password: Bytes,
        /// OBIS path into the parameter tree.
        param_tree_path: Vec<Obis>,
    },
    /// `GET_PROC_PARAM_RESPONSE`.
    GetProcParamResponse {
        /// Responding device.
        server_id: ServerId,
        /// The requested subtree.
        param_tree: ObisTree,
    },
    /// `SET_PROC_PARAM_REQUEST`.
    SetProcParamRequest {
        /// Target device.
        server_id: ServerId,
        /// Login account name.
        username: Bytes,
        /// Login password.
        password: Bytes,
        /// OBIS path of the parameter to write.
        param_tree_path: Vec<Obis>,
        /// New value.
        value: Value,
    },
    /// `SET_PROC_PARAM_RESPONSE`, no fields (the set either lands or the
    /// session is closed with an attention code).
    SetProcParamResponse,
    /// `GET_LIST_REQUEST`.
    GetListRequest {
        /// Target device.
        server_id: ServerId,
        /// Login account name.
        username: Bytes,
        /// Login password.
        password: Bytes,
        /// Name of the list being requested (an OBIS code).
        list_name: Obis,
    },
    /// `GET_LIST_RESPONSE`.
    GetListResponse {
        /// Responding device.
        server_id: ServerId,
        /// Timestamp the list was captured at.
        act_time: DateTime<Utc>,
        /// List contents.
        values: Vec<PeriodEntry>,
    },
    /// `ATTENTION_RESPONSE`.
    AttentionResponse {
        /// Device raising the attention.
        server_id: ServerId,
        /// One of the fixed attention codes (spec §4.5).
        code: Obis,
        /// Optional human-readable detail.
        msg: Option<Bytes>,
    },
}

impl MessageBody {
    /// The tag this body is carried under.
    #[must_use]
    pub const fn tag(&self) -> u16 {
        match self {
            Self::OpenRequest { .. } => tag::OPEN_REQUEST,
            Self::OpenResponse { .. } => tag::OPEN_RESPONSE,
            Self::CloseRequest => tag::CLOSE_REQUEST,
            Self::CloseResponse => tag::CLOSE_RESPONSE,
            Self::GetProfileListRequest { .. } => tag::GET_PROFILE_LIST_REQUEST,
            Self::GetProfileListResponse { .. } => tag::GET_PROFILE_LIST_RESPONSE,
            Self::GetProcParamRequest { .. } => tag::GET_PROC_PARAM_REQUEST,
            Self::GetProcParamResponse { .. } => tag::GET_PROC_PARAM_RESPONSE,
            Self::SetProcParamRequest { .. } => tag::SET_PROC_PARAM_REQUEST,
            Self::SetProcParamResponse => tag::SET_PROC_PARAM_RESPONSE,
            Self::GetListRequest { .. } => tag::GET_LIST_REQUEST,
            Self::GetListResponse { .. } => tag::GET_LIST_RESPONSE,
            Self::AttentionResponse { .. } => tag::ATTENTION_RESPONSE,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::OpenRequest { codepage, client_id, req_file_id, username, password } => {
                Value::List(vec![
                    optional_bytes_value(codepage),
                    bytes_value(client_id),
                    bytes_value(req_file_id),
                    bytes_value(username),
                    bytes_value(password),
                ])
            }
            Self::OpenResponse { codepage, server_id, req_file_id } => Value::List(vec![
                optional_bytes_value(codepage),
                server_id_value(*server_id),
                bytes_value(req_file_id),
            ]),
            Self::CloseRequest | Self::CloseResponse | Self::SetProcParamResponse => Value::List(vec![]),
            Self::GetProfileListRequest { server_id, username, password, obj_list, start, end } => {
                Value::List(vec![
                    server_id_value(*server_id),
                    bytes_value(username),
                    bytes_value(password),
                    obis_list_value(obj_list),
                    start.map_or(Value::Null, time_value),
                    end.map_or(Value::Null, time_value),
                ])
            }
            Self::GetProfileListResponse { server_id, act_time, values } => Value::List(vec![
                server_id_value(*server_id),
                time_value(*act_time),
                Value::List(values.iter().map(PeriodEntry::to_value).collect()),
            ]),
            Self::GetProcParamRequest { server_id, username, password, param_tree_path } => {
                Value::List(vec![
                    server_id_value(*server_id),
                    bytes_value(username),
                    bytes_value(password),
                    obis_list_value(param_tree_path),
                ])
            }
            Self::GetProcParamResponse { server_id, param_tree } => {
                Value::List(vec![server_id_value(*server_id), param_tree.to_value()])
            }
            Self::SetProcParamRequest { server_id, username, password, param_tree_path, value } => {
                Value::List(vec![
                    server_id_value(*server_id),
                    bytes_value(username),
                    bytes_value(password),
                    obis_list_value(param_tree_path),
                    value.clone(),
                ])
            }
            Self::GetListRequest { server_id, username, password, list_name } => Value::List(vec![
                server_id_value(*server_id),
                bytes_value(username),
                bytes_value(password),
                Value::obis(*list_name.as_bytes()),
            ]),
            Self::GetListResponse { server_id, act_time, values } => Value::List(vec![
                server_id_value(*server_id),
                time_value(*act_time),
                Value::List(values.iter().map(PeriodEntry::to_value).collect()),
            ]),
            Self::AttentionResponse { server_id, code, msg } => Value::List(vec![
                server_id_value(*server_id),
                Value::obis(*code.as_bytes()),
                optional_bytes_value(msg),
            ]),
        }
    }

    fn from_tag_value(msg_tag: u16, value: &Value) -> Result<Self> {
        let items = value
            .as_list()
            .ok_or_else(|| ProtocolError::SmlMalformed("message body is not a list".into()))?;
        let malformed = |what: &str| ProtocolError::SmlMalformed(format!("{what} in tag {msg_tag:#06x}"));
        match msg_tag {
            tag::OPEN_REQUEST => {
                let [codepage, client_id, req_file_id, username, password] = items else {
                    return Err(malformed("open request needs 5 elements"));
                };
                Ok(Self::OpenRequest {
                    codepage: value_as_optional_bytes(codepage),
                    client_id: value_as_bytes(client_id, "client_id")?,
                    req_file_id: value_as_bytes(req_file_id, "req_file_id")?,
                    username: value_as_bytes(username, "username")?,
                    password: value_as_bytes(password, "password")?,
                })
            }
            tag::OPEN_RESPONSE => {
                let [codepage, server_id, req_file_id] = items else {
                    return Err(malformed("open response needs 3 elements"));
                };
                Ok(Self::OpenResponse {
                    codepage: value_as_optional_bytes(codepage),
                    server_id: value_as_server_id(server_id, "server_id")?,
                    req_file_id: value_as_bytes(req_file_id, "req_file_id")?,
                })
            }
            tag::CLOSE_REQUEST => Ok(Self::CloseRequest),
            tag::CLOSE_RESPONSE => Ok(Self::CloseResponse),
            tag::GET_PROFILE_LIST_REQUEST => {
                let [server_id, username, password, obj_list, start, end] = items else {
                    return Err(malformed("get-profile-list request needs 6 elements"));
                };
                Ok(Self::GetProfileListRequest {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    username: value_as_bytes(username, "username")?,
                    password: value_as_bytes(password, "password")?,
                    obj_list: value_as_obis_list(obj_list)?,
                    start: (!matches!(start, Value::Null)).then(|| value_as_time(start)).transpose()?,
                    end: (!matches!(end, Value::Null)).then(|| value_as_time(end)).transpose()?,
                })
            }
            tag::GET_PROFILE_LIST_RESPONSE => {
                let [server_id, act_time, values] = items else {
                    return Err(malformed("get-profile-list response needs 3 elements"));
                };
                let values_list = values
                    .as_list()
                    .ok_or_else(|| malformed("get-profile-list response values is not a list"))?;
                Ok(Self::GetProfileListResponse {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    act_time: value_as_time(act_time)?,
                    values: values_list.iter().map(PeriodEntry::from_value).collect::<Result<_>>()?,
                })
            }
            tag::GET_PROC_PARAM_REQUEST => {
                let [server_id, username, password, param_tree_path] = items else {
                    return Err(malformed("get-proc-param request needs 4 elements"));
                };
                Ok(Self::GetProcParamRequest {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    username: value_as_bytes(username, "username")?,
                    password: value_as_bytes(password, "password")?,
                    param_tree_path: value_as_obis_list(param_tree_path)?,
                })
            }
            tag::GET_PROC_PARAM_RESPONSE => {
                let [server_id, param_tree] = items else {
                    return Err(malformed("get-proc-param response needs 2 elements"));
                };
                Ok(Self::GetProcParamResponse {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    param_tree: obis_tree_from_value(param_tree)?,
                })
            }
            tag::SET_PROC_PARAM_REQUEST => {
                let [server_id, username, password, param_tree_path, value] = items else {
                    return Err(malformed("set-proc-param request needs 5 elements"));
                };
                Ok(Self::SetProcParamRequest {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    username: value_as_bytes(username, "username")?,
                    password: value_as_bytes(password, "password")?,
                    param_tree_path: value_as_obis_list(param_tree_path)?,
                    value: value.clone(),
                })
            }
            tag::SET_PROC_PARAM_RESPONSE => Ok(Self::SetProcParamResponse),
            tag::GET_LIST_REQUEST => {
                let [server_id, username, password, list_name] = items else {
                    return Err(malformed("get-list request needs 4 elements"));
                };
                Ok(Self::GetListRequest {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    username: value_as_bytes(username, "username")?,
                    password: value_as_bytes(password, "password")?,
                    list_name: Obis::decode(
                        list_name.as_bytes().ok_or_else(|| malformed("list_name is not bytes"))?,
                    )?,
                })
            }
            tag::GET_LIST_RESPONSE => {
                let [server_id, act_time, values] = items else {
                    return Err(malformed("get-list response needs 3 elements"));
                };
                let values_list =
                    values.as_list().ok_or_else(|| malformed("get-list response values is not a list"))?;
                Ok(Self::GetListResponse {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    act_time: value_as_time(act_time)?,
                    values: values_list.iter().map(PeriodEntry::from_value).collect::<Result<_>>()?,
                })
            }
            tag::ATTENTION_RESPONSE => {
                let [server_id, code, msg] = items else {
                    return Err(malformed("attention response needs 3 elements"));
                };
                Ok(Self::AttentionResponse {
                    server_id: value_as_server_id(server_id, "server_id")?,
                    code: Obis::decode(code.as_bytes().ok_or_else(|| malformed("code is not bytes"))?)?,
                    msg: value_as_optional_bytes(msg),
                })
            }
            other => Err(ProtocolError::SmlMalformed(format!("unknown SML message tag {other:#06x}"))),
        }
    }
}

fn obis_tree_from_value(value: &Value) -> Result<ObisTree> {
    let items =
        value.as_list().ok_or_else(|| ProtocolError::SmlMalformed("obis tree node is not a list".into()))?;
    let [name, leaf, children] = items else {
        return Err(ProtocolError::SmlMalformed("obis tree node needs 3 elements".into()));
    };
    let name = Obis::decode(
        name.as_bytes().ok_or_else(|| ProtocolError::SmlMalformed("obis tree name is not bytes".into()))?,
    )?;
    let value = (!matches!(leaf, Value::Null)).then(|| leaf.clone());
    let children_list =
        children.as_list().ok_or_else(|| ProtocolError::SmlMalformed("obis tree children is not a list".into()))?;
    let children = children_list.iter().map(obis_tree_from_value).collect::<Result<_>>()?;
    Ok(ObisTree { name, value, children })
}

/// A complete SML message: transaction id, group, abort flag, a tagged
/// body, and the trailing CRC16 (spec §3, §4.5).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SmlMessage {
    /// Transaction identifier, correlating requests and responses.
    pub trx: Bytes,
    /// Group number (message sequencing within a transmission).
    pub group_no: u8,
    /// Non-zero instructs the peer to abort remaining processing on error.
    pub abort_on_err: u8,
    /// The tagged body.
    pub body: MessageBody,
}

impl SmlMessage {
    /// Encodes this message: a 5-element list (`trx`, `group_no`,
    /// `abort_on_err`, `choice(tag, body)`, `crc`), where the CRC is
    /// computed over every byte preceding the CRC TLV itself (spec §4.5).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let choice = Value::List(vec![Value::Uint(u64::from(self.body.tag())), self.body.to_value()]);
        let head = Value::List(vec![
            Value::Bytes(self.trx.clone()),
            Value::Uint(u64::from(self.group_no)),
            Value::Uint(u64::from(self.abort_on_err)),
            choice,
        ]);
        let mut buf = Vec::new();
        // The message is itself a 5-element list; write that header before
        // the 4 head elements so the CRC covers the announced list shape too.
        tlv::write_length(&mut buf, 0x7, 5);
        // write_length is crate-private to tlv's encode path; reuse write_value
        // for the inner elements via a temporary list that drops its own header.
        if let Value::List(elements) = head {
            for element in elements {
                tlv::write_value(&mut buf, &element);
            }
        }
        let crc = crc16(&buf);
        tlv::write_uint_fixed(&mut buf, u64::from(crc), 2);
        buf
    }

    /// Decodes a message from `data`, validating its trailing CRC16.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        let (value, consumed) = tlv::parse_value(data)?;
        let items = value
            .as_list()
            .ok_or_else(|| ProtocolError::SmlMalformed("SML message is not a list".into()))?;
        let [trx, group_no, abort_on_err, choice, crc] = items else {
            return Err(ProtocolError::SmlMalformed("SML message needs 5 elements".into()));
        };
        let Value::Uint(crc) = crc else {
            return Err(ProtocolError::SmlMalformed("crc element is not unsigned".into()));
        };
        let crc_width = crc_tlv_width(*crc);
        if consumed < crc_width {
            return Err(ProtocolError::SmlMalformed("message shorter than its own CRC field".into()));
        }
        let computed = crc16(&data[..consumed - crc_width]);
        let expected = u16::try_from(*crc).unwrap_or(0);
        if computed != expected {
            return Err(ProtocolError::SmlCrcMismatch { computed, expected });
        }
        let choice_items =
            choice.as_list().ok_or_else(|| ProtocolError::SmlMalformed("choice is not a list".into()))?;
        let [msg_tag, body] = choice_items else {
            return Err(ProtocolError::SmlMalformed("choice needs 2 elements".into()));
        };
        let Value::Uint(msg_tag) = msg_tag else {
            return Err(ProtocolError::SmlMalformed("choice tag is not unsigned".into()));
        };
        let msg_tag = u16::try_from(*msg_tag).unwrap_or(u16::MAX);
        let body = MessageBody::from_tag_value(msg_tag, body)?;
        let trx = value_as_bytes(trx, "trx")?;
        let Value::Uint(group_no) = group_no else {
            return Err(ProtocolError::SmlMalformed("group_no is not unsigned".into()));
        };
        let Value::Uint(abort_on_err) = abort_on_err else {
            return Err(ProtocolError::SmlMalformed("abort_on_err is not unsigned".into()));
        };
        Ok((
            Self {
                trx,
                group_no: u8::try_from(*group_no).unwrap_or(0),
                abort_on_err: u8::try_from(*abort_on_err).unwrap_or(0),
                body,
            },
            consumed,
        ))
    }
}

/// Width in bytes of the CRC TL-field + payload (always a 2-byte value,
/// but the TL byte itself is 1 byte since 2 < the inline-length sentinel).
fn crc_tlv_width(_crc: u64) -> usize {
    1 + 2
}

const ESCAPE_START: [u8; 8] = [0x1B, 0x1B, 0x1B, 0x1B, 0x01, 0x01, 0x01, 0x01];
const ESCAPE_END_PREFIX: [u8; 5] = [0x1B, 0x1B, 0x1B, 0x1B, 0x1A];

/// Wraps one or more messages in the escape-delimited transmission framing
/// (spec §6): 8-byte start escape, the concatenated message bytes, zero
/// padding to a 4-byte boundary, the end-escape prefix, the pad count, and
/// a CRC16 over everything from the start escape through the pad count.
#[must_use]
pub fn encode_transmission(messages: &[SmlMessage]) -> Vec<u8> {
    let mut buf = ESCAPE_START.to_vec();
    for message in messages {
        buf.extend(message.encode());
    }
    let trailer_fixed_len = ESCAPE_END_PREFIX.len() + 1 + 2;
    let pad = (4 - (buf.len() + trailer_fixed_len) % 4) % 4;
    buf.extend(std::iter::repeat(0u8).take(pad));
    buf.extend_from_slice(&ESCAPE_END_PREFIX);
    buf.push(pad as u8);
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf
}

/// Unwraps a transmission built by [`encode_transmission`], validating the
/// outer CRC and yielding the decoded messages in order.
pub fn decode_transmission(data: &[u8]) -> Result<Vec<SmlMessage>> {
    if data.len() < ESCAPE_START.len() {
        return Err(ProtocolError::SmlMalformed("transmission shorter than start escape".into()));
    }
    if data[..ESCAPE_START.len()] != ESCAPE_START {
        return Err(ProtocolError::SmlMalformed("missing SML start escape sequence".into()));
    }
    if data.len() < 2 {
        return Err(ProtocolError::SmlMalformed("transmission missing trailing CRC".into()));
    }
    let expected_crc = u16::from_be_bytes([data[data.len() - 2], data[data.len() - 1]]);
    let computed_crc = crc16(&data[..data.len() - 2]);
    if computed_crc != expected_crc {
        return Err(ProtocolError::SmlCrcMismatch { computed: computed_crc, expected: expected_crc });
    }
    let before_crc = &data[..data.len() - 2];
    let end_prefix_pos = find_subslice(before_crc, &ESCAPE_END_PREFIX)
        .ok_or_else(|| ProtocolError::SmlMalformed("missing SML end escape sequence".into()))?;
    let body = &before_crc[ESCAPE_START.len()..end_prefix_pos];
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset < body.len() {
        let (message, consumed) = SmlMessage::decode(&body[offset..])?;
        messages.push(message);
        offset += consumed;
    }
    Ok(messages)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}
