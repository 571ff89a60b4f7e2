//! Transport encoding for stored values.
//!
//! Every payload starts with a one-byte tag naming its codec:
//!
//! | tag | body |
//! |-----|------|
//! | `j` | JSON text of a portable [`Value`] |
//! | `b` | bincode bytes of an opaque [`Value`] |
//! | `x` | lowercase hex of the bincode bytes, for text-only transports |
//!
//! Integers are the exception: they are written as bare decimal text so the
//! store's own counter commands can operate on them.
//!
//! Decoding never fails. Payloads without a known tag, or whose body does not
//! decode, go through the untagged path: a JSON attempt first (this is what
//! plain counters and values written by other clients look like), then the
//! raw bytes are handed back unchanged.

use super::value::Value;
use crate::config::PayloadEncoding;

const TAG_JSON: u8 = b'j';
const TAG_BINARY: u8 = b'b';
const TAG_HEX: u8 = b'x';

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Codec {
    opaque: PayloadEncoding,
}

impl Codec {
    pub fn new(opaque: PayloadEncoding) -> Self {
        Self { opaque }
    }

    pub fn encode(&self, value: &Value) -> Vec<u8> {
        if let Value::Int(i) = value {
            return i.to_string().into_bytes();
        }
        if let Some(json) = value.is_portable().then(|| value.to_json()).flatten() {
            return tagged(TAG_JSON, json.to_string().into_bytes());
        }

        match bincode::serde::encode_to_vec(value, bincode::config::standard()) {
            Ok(bytes) => match self.opaque {
                PayloadEncoding::Binary => tagged(TAG_BINARY, bytes),
                PayloadEncoding::Hex => tagged(TAG_HEX, hex::encode(bytes).into_bytes()),
            },
            Err(e) => {
                tracing::warn!(error = %e, "Opaque encoding failed, storing lossy JSON");
                tagged(TAG_JSON, lossy_json(value).to_string().into_bytes())
            }
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Value {
        let decoded = match payload.split_first() {
            Some((&TAG_JSON, body)) => decode_json(body),
            Some((&TAG_BINARY, body)) => decode_binary(body),
            Some((&TAG_HEX, body)) => hex::decode(body).ok().and_then(|b| decode_binary(&b)),
            _ => None,
        };

        decoded
            .or_else(|| decode_json(payload))
            .unwrap_or_else(|| raw(payload))
    }
}

fn tagged(tag: u8, body: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tag);
    out.extend(body);
    out
}

fn decode_json(body: &[u8]) -> Option<Value> {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .map(Value::from)
}

fn decode_binary(body: &[u8]) -> Option<Value> {
    match bincode::serde::decode_from_slice::<Value, _>(body, bincode::config::standard()) {
        Ok((value, read)) if read == body.len() => Some(value),
        _ => None,
    }
}

fn raw(payload: &[u8]) -> Value {
    match std::str::from_utf8(payload) {
        Ok(s) => Value::String(s.to_string()),
        Err(_) => Value::Bytes(payload.to_vec()),
    }
}

/// JSON rendition that replaces what JSON cannot carry with nulls.
fn lossy_json(value: &Value) -> serde_json::Value {
    match value {
        Value::List(items) => serde_json::Value::Array(items.iter().map(lossy_json).collect()),
        Value::Map(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), lossy_json(v)))
                .collect(),
        ),
        other => other.to_json().unwrap_or(serde_json::Value::Null),
    }
}
