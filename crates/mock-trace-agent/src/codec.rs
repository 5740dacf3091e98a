// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! MessagePack codec for v0.4 trace payloads.
//!
//! A v0.4 payload is an array of trace chunks, each chunk an array of span maps. Two independent
//! decode paths are provided: [`decode_trace_chunks`] produces typed [`Span`]s, and
//! [`to_debug_json`] transcodes whatever value the bytes hold into JSON text for raw inspection.

use std::io::{Cursor, ErrorKind};

use rmp::Marker;
use serde_json::{Map, Number, Value};

use crate::errors::{DecodeError, EncodeError};
use crate::span::TraceChunk;

const MAX_DEPTH: usize = 256;

/// Map keys whose integer values are always rendered as decimal strings in debug JSON.
const ID_KEYS: [&str; 3] = ["trace_id", "span_id", "parent_id"];

impl From<rmp_serde::decode::Error> for DecodeError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        use rmp_serde::decode::Error;
        match err {
            Error::InvalidMarkerRead(ref e) | Error::InvalidDataRead(ref e)
                if e.kind() == ErrorKind::UnexpectedEof =>
            {
                DecodeError::Truncated
            }
            Error::TypeMismatch(Marker::Reserved) => DecodeError::UnsupportedType(0xc1),
            Error::TypeMismatch(marker) => DecodeError::UnexpectedType(format!("{marker:?}")),
            Error::DepthLimitExceeded => DecodeError::DepthLimitExceeded,
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

/// Decodes a v0.4 payload into trace chunks, preserving chunk and span order.
pub fn decode_trace_chunks(bytes: &[u8]) -> Result<Vec<TraceChunk>, DecodeError> {
    let mut cursor = Cursor::new(bytes);
    let chunks: Vec<TraceChunk> = rmp_serde::from_read(&mut cursor)?;

    let consumed = usize::try_from(cursor.position()).unwrap_or(bytes.len());
    if consumed < bytes.len() {
        return Err(DecodeError::TrailingBytes(bytes.len() - consumed));
    }
    Ok(chunks)
}

/// Encodes trace chunks the way tracers do, with span fields as named map entries.
pub fn encode_trace_chunks(chunks: &[TraceChunk]) -> Result<Vec<u8>, EncodeError> {
    Ok(rmp_serde::to_vec_named(chunks)?)
}

/// Renders the MessagePack value held by `bytes` as compact JSON text.
///
/// This does not assume any schema: any well-formed value is rendered. Integer ids (see
/// [`ID_KEYS`]) are rendered as decimal strings, every other integer as an exact JSON number, so
/// the text parses back into the same [`Span`](crate::span::Span)s as [`decode_trace_chunks`].
pub fn to_debug_json(bytes: &[u8]) -> Result<String, DecodeError> {
    let mut transcoder = Transcoder { buf: bytes, pos: 0 };
    let value = transcoder.value(0)?;

    let remaining = transcoder.remaining();
    if remaining > 0 {
        return Err(DecodeError::TrailingBytes(remaining));
    }
    serde_json::to_string(&value).map_err(|e| DecodeError::Malformed(e.to_string()))
}

struct Transcoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Transcoder<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated)?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn len16(&mut self) -> Result<usize, DecodeError> {
        Ok(u16::from_be_bytes(self.fixed()?) as usize)
    }

    fn len32(&mut self) -> Result<usize, DecodeError> {
        Ok(u32::from_be_bytes(self.fixed()?) as usize)
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::DepthLimitExceeded);
        }

        let value = match Marker::from_u8(self.u8()?) {
            Marker::Null => Value::Null,
            Marker::True => Value::Bool(true),
            Marker::False => Value::Bool(false),
            Marker::FixPos(v) => Value::from(v),
            Marker::FixNeg(v) => Value::from(v),
            Marker::U8 => Value::from(self.u8()?),
            Marker::U16 => Value::from(u16::from_be_bytes(self.fixed()?)),
            Marker::U32 => Value::from(u32::from_be_bytes(self.fixed()?)),
            Marker::U64 => Value::from(u64::from_be_bytes(self.fixed()?)),
            Marker::I8 => Value::from(i8::from_be_bytes(self.fixed()?)),
            Marker::I16 => Value::from(i16::from_be_bytes(self.fixed()?)),
            Marker::I32 => Value::from(i32::from_be_bytes(self.fixed()?)),
            Marker::I64 => Value::from(i64::from_be_bytes(self.fixed()?)),
            Marker::F32 => float(f32::from_be_bytes(self.fixed()?) as f64),
            Marker::F64 => float(f64::from_be_bytes(self.fixed()?)),
            Marker::FixStr(len) => self.string(len as usize)?,
            Marker::Str8 => {
                let len = self.u8()? as usize;
                self.string(len)?
            }
            Marker::Str16 => {
                let len = self.len16()?;
                self.string(len)?
            }
            Marker::Str32 => {
                let len = self.len32()?;
                self.string(len)?
            }
            Marker::Bin8 => {
                let len = self.u8()? as usize;
                self.binary(len)?
            }
            Marker::Bin16 => {
                let len = self.len16()?;
                self.binary(len)?
            }
            Marker::Bin32 => {
                let len = self.len32()?;
                self.binary(len)?
            }
            Marker::FixArray(len) => self.array(len as usize, depth)?,
            Marker::Array16 => {
                let len = self.len16()?;
                self.array(len, depth)?
            }
            Marker::Array32 => {
                let len = self.len32()?;
                self.array(len, depth)?
            }
            Marker::FixMap(len) => self.map(len as usize, depth)?,
            Marker::Map16 => {
                let len = self.len16()?;
                self.map(len, depth)?
            }
            Marker::Map32 => {
                let len = self.len32()?;
                self.map(len, depth)?
            }
            Marker::FixExt1 => self.ext(1)?,
            Marker::FixExt2 => self.ext(2)?,
            Marker::FixExt4 => self.ext(4)?,
            Marker::FixExt8 => self.ext(8)?,
            Marker::FixExt16 => self.ext(16)?,
            Marker::Ext8 => {
                let len = self.u8()? as usize;
                self.ext(len)?
            }
            Marker::Ext16 => {
                let len = self.len16()?;
                self.ext(len)?
            }
            Marker::Ext32 => {
                let len = self.len32()?;
                self.ext(len)?
            }
            Marker::Reserved => return Err(DecodeError::UnsupportedType(0xc1)),
        };
        Ok(value)
    }

    fn string(&mut self, len: usize) -> Result<Value, DecodeError> {
        let bytes = self.take(len)?;
        Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
    }

    fn binary(&mut self, len: usize) -> Result<Value, DecodeError> {
        let bytes = self.take(len)?;
        Ok(Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()))
    }

    fn ext(&mut self, len: usize) -> Result<Value, DecodeError> {
        let ext_type = i8::from_be_bytes(self.fixed()?);
        let data = self.binary(len)?;
        let mut object = Map::new();
        object.insert("type".to_string(), Value::from(ext_type));
        object.insert("data".to_string(), data);
        Ok(Value::Object(object))
    }

    fn array(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        // every element takes at least one byte, never trust the declared length beyond that
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.value(depth + 1)?);
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, len: usize, depth: usize) -> Result<Value, DecodeError> {
        let mut object = Map::new();
        for _ in 0..len {
            let key = match self.value(depth + 1)? {
                Value::String(key) => key,
                other => other.to_string(),
            };
            let mut value = self.value(depth + 1)?;
            if ID_KEYS.contains(&key.as_str()) {
                value = id_to_string(value);
            }
            object.insert(key, value);
        }
        Ok(Value::Object(object))
    }
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn id_to_string(value: Value) -> Value {
    match value {
        Value::Number(n) if n.is_u64() || n.is_i64() => Value::String(n.to_string()),
        other => other,
    }
}
