//! SML TLV tokenizer and stack-based reducer (spec §4.5, §6, §9).
//!
//! Type nibble occupies the top 4 bits of the TL byte (0 octet-string, 4
//! bool, 5 int, 6 uint, 7 list, 8 optional); the low nibble carries the
//! length inline for 0..=14, with 0x0F acting as a sentinel introducing a
//! 7-bit-per-byte (MSB-continuation) length extension for longer values.
//! The reducer is the single growable stack of `(remaining, accumulator)`
//! frames the design notes call for: list frames are pushed when opened
//! and reduced into their parent the moment they fill, so there is no
//! recursive-descent call stack mirroring wire nesting depth.

use bytes::Bytes;

use crate::errors::{ProtocolError, Result};

const TYPE_BINARY: u8 = 0x0;
const TYPE_BOOLEAN: u8 = 0x4;
const TYPE_INTEGER: u8 = 0x5;
const TYPE_UNSIGNED: u8 = 0x6;
const TYPE_LIST: u8 = 0x7;
const TYPE_OPTIONAL: u8 = 0x8;

/// A decoded SML value. `List` covers both the open/close SML tuples and
/// nested sub-lists (e.g. the `choice(tag, body)` pair, OBIS tree nodes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// An octet string (TLV type 0).
    Bytes(Bytes),
    /// A boolean (TLV type 4).
    Bool(bool),
    /// A signed integer, 1-8 bytes wide on the wire (TLV type 5).
    Int(i64),
    /// An unsigned integer, 1-8 bytes wide on the wire (TLV type 6).
    Uint(u64),
    /// A list of `n` values (TLV type 7); `n` is an element count, not a
    /// byte length.
    List(Vec<Value>),
    /// The `OPTIONAL` skip marker (TLV type 8, always zero-length): "no
    /// value present" rather than an omitted element (spec §9 Open
    /// Question #2 — the writer always emits this explicitly).
    Null,
}

impl Value {
    /// Convenience: a 6-byte OBIS code as an octet-string value.
    #[must_use]
    pub fn obis(bytes: [u8; 6]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(&bytes))
    }

    /// Borrows the inner bytes if this is a [`Value::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrows the inner list if this is a [`Value::List`].
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

fn minimal_unsigned_width(v: u64) -> usize {
    if v <= u64::from(u8::MAX) {
        1
    } else if v <= u64::from(u16::MAX) {
        2
    } else if v <= u64::from(u32::MAX) {
        4
    } else {
        8
    }
}

fn minimal_signed_width(v: i64) -> usize {
    if v >= i64::from(i8::MIN) && v <= i64::from(i8::MAX) {
        1
    } else if v >= i64::from(i16::MIN) && v <= i64::from(i16::MAX) {
        2
    } else if v >= i64::from(i32::MIN) && v <= i64::from(i32::MAX) {
        4
    } else {
        8
    }
}

pub(crate) fn write_length(out: &mut Vec<u8>, type_nibble: u8, length: usize) {
    if length < 0x0F {
        out.push((type_nibble << 4) | (length as u8));
        return;
    }
    out.push((type_nibble << 4) | 0x0F);
    let mut remaining = length;
    loop {
        let mut chunk = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining > 0 {
            chunk |= 0x80;
        }
        out.push(chunk);
        if remaining == 0 {
            break;
        }
    }
}

/// Encodes a single [`Value`] (and, recursively, its children) onto `out`.
pub fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Bytes(b) => {
            write_length(out, TYPE_BINARY, b.len());
            out.extend_from_slice(b);
        }
        Value::Bool(b) => {
            write_length(out, TYPE_BOOLEAN, 1);
            out.push(u8::from(*b));
        }
        Value::Int(v) => {
            let width = minimal_signed_width(*v);
            write_length(out, TYPE_INTEGER, width);
            let full = v.to_le_bytes();
            out.extend_from_slice(&full[..width]);
        }
        Value::Uint(v) => {
            let width = minimal_unsigned_width(*v);
            write_length(out, TYPE_UNSIGNED, width);
            let full = v.to_le_bytes();
            out.extend_from_slice(&full[..width]);
        }
        Value::List(items) => {
            write_length(out, TYPE_LIST, items.len());
            for item in items {
                write_value(out, item);
            }
        }
        Value::Null => write_length(out, TYPE_OPTIONAL, 0),
    }
}

/// Encodes a u64 at a caller-chosen fixed width (used for the message
/// trailer CRC, which is always exactly 2 bytes regardless of value).
pub fn write_uint_fixed(out: &mut Vec<u8>, value: u64, width: usize) {
    write_length(out, TYPE_UNSIGNED, width);
    let full = value.to_le_bytes();
    out.extend_from_slice(&full[..width]);
}

/// Cursor over an in-memory SML byte buffer, tracking the read position
/// so callers (the message envelope) can slice out "everything read so
/// far" for CRC purposes.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Wraps `data` for reading from offset 0.
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current read offset into the original buffer.
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(ProtocolError::SmlMalformed(format!(
                "TLV wants {n} bytes at offset {}, only {} remain",
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_length(&mut self, length_nibble: u8) -> Result<usize> {
        if length_nibble < 0x0F {
            return Ok(length_nibble as usize);
        }
        let mut length = 0usize;
        let mut shift = 0u32;
        loop {
            let byte = self.take(1)?[0];
            length |= usize::from(byte & 0x7F) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(length)
    }

    /// Reads exactly one (possibly nested) [`Value`] starting at the
    /// current position.
    ///
    /// Nested lists are reduced on an explicit stack of `(remaining,
    /// accumulator)` frames: opening a non-empty list pushes a frame and
    /// moves on to its first child token; completing a token folds it into
    /// the frame on top of the stack, and a frame that reaches zero
    /// remaining is itself popped and folded into its parent. The loop
    /// below is the only call site that "recurses" on nesting depth, so
    /// wire nesting depth never grows the Rust call stack.
    pub fn read_value(&mut self) -> Result<Value> {
        let mut stack: Vec<(usize, Vec<Value>)> = Vec::new();
        let mut completed: Option<Value> = None;

        loop {
            if completed.is_none() {
                let head = self.take(1)?[0];
                let type_nibble = head >> 4;
                let length_nibble = head & 0x0F;
                let length = self.read_length(length_nibble)?;
                completed = Some(match type_nibble {
                    n if n == TYPE_BINARY => {
                        let bytes = self.take(length)?;
                        Value::Bytes(Bytes::copy_from_slice(bytes))
                    }
                    n if n == TYPE_BOOLEAN => {
                        if length != 1 {
                            return Err(ProtocolError::SmlMalformed("boolean TLV length != 1".into()));
                        }
                        Value::Bool(self.take(1)?[0] != 0)
                    }
                    n if n == TYPE_INTEGER => {
                        if length == 0 || length > 8 {
                            return Err(ProtocolError::SmlMalformed(format!(
                                "integer TLV width {length} out of range"
                            )));
                        }
                        let bytes = self.take(length)?;
                        let mut full = if bytes[length - 1] & 0x80 != 0 { [0xFFu8; 8] } else { [0u8; 8] };
                        full[..length].copy_from_slice(bytes);
                        Value::Int(i64::from_le_bytes(full))
                    }
                    n if n == TYPE_UNSIGNED => {
                        if length == 0 || length > 8 {
                            return Err(ProtocolError::SmlMalformed(format!(
                                "unsigned TLV width {length} out of range"
                            )));
                        }
                        let bytes = self.take(length)?;
                        let mut full = [0u8; 8];
                        full[..length].copy_from_slice(bytes);
                        Value::Uint(u64::from_le_bytes(full))
                    }
                    n if n == TYPE_LIST => {
                        if length == 0 {
                            Value::List(Vec::new())
                        } else {
                            stack.push((length, Vec::with_capacity(length)));
                            continue;
                        }
                    }
                    n if n == TYPE_OPTIONAL => {
                        if length != 0 {
                            return Err(ProtocolError::SmlMalformed("optional TLV length != 0".into()));
                        }
                        Value::Null
                    }
                    other => {
                        return Err(ProtocolError::SmlMalformed(format!(
                            "unknown TLV type nibble {other:#x}"
                        )))
                    }
                });
            }

            let value = completed.take().expect("set above or loop `continue`d past this point");
            match stack.last_mut() {
                None => return Ok(value),
                Some((remaining, items)) => {
                    items.push(value);
                    *remaining -= 1;
                    if *remaining == 0 {
                        let (_, items) = stack.pop().expect("just matched Some above");
                        completed = Some(Value::List(items));
                    }
                }
            }
        }
    }
}

/// Parses a single top-level [`Value`] from `data`, returning it and the
/// number of bytes consumed.
pub fn parse_value(data: &[u8]) -> Result<(Value, usize)> {
    let mut cursor = Cursor::new(data);
    let value = cursor.read_value()?;
    Ok((value, cursor.pos()))
}

/// Encodes a [`Value`] to a fresh buffer.
#[must_use]
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, value);
    out
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_list_round_trips_as_list_not_omission() {
        let value = Value::List(vec![]);
        let encoded = encode_value(&value);
        assert_eq!(encoded, vec![0x70]); // type=LIST(7), length=0
        let (decoded, consumed) = parse_value(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn nested_list_round_trips() {
        let value = Value::List(vec![
            Value::Bytes(Bytes::from_static(b"trx-1")),
            Value::Uint(7),
            Value::List(vec![Value::Int(-5), Value::Bool(true), Value::Null]),
        ]);
        let encoded = encode_value(&value);
        let (decoded, consumed) = parse_value(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn long_octet_string_uses_length_extension() {
        let payload = vec![0xABu8; 300];
        let value = Value::Bytes(Bytes::from(payload.clone()));
        let encoded = encode_value(&value);
        assert_eq!(encoded[0] & 0x0F, 0x0F); // sentinel
        let (decoded, _) = parse_value(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let value = Value::Bytes(Bytes::from_static(b"hello"));
        let encoded = encode_value(&value);
        assert!(parse_value(&encoded[..encoded.len() - 2]).is_err());
    }

    proptest! {
        #[test]
        fn integers_round_trip_arbitrary(v: i64) {
            let value = Value::Int(v);
            let (decoded, _) = parse_value(&encode_value(&value)).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn unsigned_round_trip_arbitrary(v: u64) {
            let value = Value::Uint(v);
            let (decoded, _) = parse_value(&encode_value(&value)).unwrap();
            prop_assert_eq!(decoded, value);
        }

        #[test]
        fn byte_strings_round_trip_arbitrary(bytes in proptest::collection::vec(any::<u8>(), 0..600)) {
            let value = Value::Bytes(Bytes::from(bytes));
            let (decoded, _) = parse_value(&encode_value(&value)).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
