//! Field/record wire codec for spilled shuffle records (§4.7 step 1).
//!
//! One record per line: fields joined by `0xFF`, lines terminated by
//! `0x0A`. A field is `0x00` for a null value (so it sorts first
//! ascending / last descending against the external `sort` binary's
//! byte-lexicographic order), base64 for a binary column, or JSON
//! otherwise. This mirrors `hustle`'s three-way null/base64/JSON field
//! encoding exactly, since the encoding has to survive a round trip
//! through an external process that only knows how to sort bytes.

use crate::error::{MarbleError, MarbleResult};
use crate::tuple::Value;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub const FIELD_DELIM: u8 = 0xFF;
pub const RECORD_DELIM: u8 = 0x0A;
const NULL_MARKER: u8 = 0x00;

/// Whether a field should be base64-encoded (BINARY columns) rather than
/// JSON-encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldCodec {
    Json,
    Base64,
}

pub fn encode_field(value: &Value, codec: FieldCodec) -> Vec<u8> {
    if value.is_null() {
        return vec![NULL_MARKER];
    }
    match codec {
        FieldCodec::Base64 => match value {
            Value::Bytes(b) => BASE64.encode(b).into_bytes(),
            Value::Int(i) => BASE64.encode(i.to_be_bytes()).into_bytes(),
            Value::Null => unreachable!("handled above"),
        },
        FieldCodec::Json => match value {
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Bytes(b) => serde_json::to_vec(&String::from_utf8_lossy(b).into_owned())
                .expect("string JSON encoding cannot fail"),
            Value::Null => unreachable!("handled above"),
        },
    }
}

pub fn decode_field(bytes: &[u8], codec: FieldCodec) -> MarbleResult<Value> {
    if bytes == [NULL_MARKER] {
        return Ok(Value::Null);
    }
    match codec {
        FieldCodec::Base64 => {
            let decoded = BASE64
                .decode(bytes)
                .map_err(|e| MarbleError::data(format!("corrupt base64 shuffle field: {e}")))?;
            Ok(Value::Bytes(decoded))
        }
        FieldCodec::Json => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| MarbleError::data(format!("non-utf8 shuffle field: {e}")))?;
            if let Ok(i) = text.parse::<i64>() {
                Ok(Value::Int(i))
            } else {
                let s: String = serde_json::from_str(text)
                    .map_err(|e| MarbleError::data(format!("corrupt json shuffle field: {e}")))?;
                Ok(Value::Bytes(s.into_bytes()))
            }
        }
    }
}

/// Encodes one record as a `0xFF`-delimited, `0x0A`-terminated line.
pub fn encode_record(fields: &[Value], codecs: &[FieldCodec]) -> Vec<u8> {
    let mut line = Vec::new();
    for (i, (value, codec)) in fields.iter().zip(codecs).enumerate() {
        if i > 0 {
            line.push(FIELD_DELIM);
        }
        line.extend(encode_field(value, *codec));
    }
    line.push(RECORD_DELIM);
    line
}

/// Decodes one line (without its trailing `0x0A`) back into field values.
pub fn decode_record(line: &[u8], codecs: &[FieldCodec]) -> MarbleResult<Vec<Value>> {
    let mut fields = line.split(|b| *b == FIELD_DELIM);
    codecs
        .iter()
        .map(|codec| {
            let raw = fields
                .next()
                .ok_or_else(|| MarbleError::data("shuffle record has fewer fields than its schema"))?;
            decode_field(raw, *codec)
        })
        .collect()
}
