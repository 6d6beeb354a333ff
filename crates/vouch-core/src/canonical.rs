//! Canonical JSON encoding for deterministic event hashing.
//!
//! Every event payload is serialized to the JSON Canonicalization Scheme
//! (RFC 8785) before it is hashed and signed, so that the same logical
//! payload always produces the same bytes regardless of key order or
//! whitespace:
//!
//! 1. Object keys are sorted lexicographically (byte order)
//! 2. No whitespace between tokens
//! 3. Strings use minimal escaping (only `"` and `\` and the C0 controls)
//! 4. Integers are emitted verbatim; floats in shortest round-trip form
//! 5. Strings are normalized to Unicode NFC
//!
//! The encoder is a pure function over [`serde_json::Value`]; the only
//! failure modes are structural (nesting deeper than [`MAX_DEPTH`]).

use std::fmt::Write as _;

use serde_json::{Map, Number, Value};
use thiserror::Error;
use unicode_normalization::{is_nfc, UnicodeNormalization};

/// Maximum nesting depth accepted by the canonicalizer. Agent payloads are
/// attacker-influenced, so recursion must be bounded.
pub const MAX_DEPTH: usize = 128;

/// Errors produced while canonicalizing a payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalError {
    /// The value is nested deeper than [`MAX_DEPTH`] levels.
    #[error("max depth exceeded: JSON nested deeper than {max_depth} levels")]
    MaxDepthExceeded {
        /// The depth limit that was exceeded.
        max_depth: usize,
    },

    /// The input string was not valid JSON.
    #[error("JSON parse error: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
    },
}

/// Canonicalizes a parsed JSON value to its RFC 8785 byte encoding.
///
/// # Errors
///
/// Returns [`CanonicalError::MaxDepthExceeded`] if the value nests deeper
/// than [`MAX_DEPTH`] levels.
pub fn canonicalize_value(value: &Value) -> Result<String, CanonicalError> {
    let mut output = String::new();
    emit_value(value, &mut output, 0)?;
    Ok(output)
}

/// Parses a JSON string and canonicalizes it.
///
/// # Errors
///
/// Returns [`CanonicalError::ParseError`] for malformed input and
/// [`CanonicalError::MaxDepthExceeded`] for over-deep nesting.
pub fn canonicalize_json(input: &str) -> Result<String, CanonicalError> {
    let value: Value = serde_json::from_str(input).map_err(|e| CanonicalError::ParseError {
        message: e.to_string(),
    })?;
    canonicalize_value(&value)
}

/// Returns `true` if `input` is already in canonical form.
#[must_use]
pub fn is_canonical(input: &str) -> bool {
    canonicalize_json(input).is_ok_and(|canonical| canonical == input)
}

fn emit_value(value: &Value, output: &mut String, depth: usize) -> Result<(), CanonicalError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }

    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => emit_number(n, output),
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => {
            output.push('[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    output.push(',');
                }
                emit_value(item, output, depth + 1)?;
            }
            output.push(']');
        },
        Value::Object(obj) => emit_object(obj, output, depth)?,
    }
    Ok(())
}

/// Integers are emitted as their decimal representation. Floats fall through
/// to `serde_json`'s shortest round-trip formatting (ryu), which is stable
/// across platforms for any given bit pattern.
fn emit_number(n: &Number, output: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(output, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(output, "{u}");
    } else {
        let _ = write!(output, "{n}");
    }
}

/// Emits a string with the minimal escaping of RFC 8785 section 3.2.2.2 and
/// NFC-normalized content.
///
/// Only the quotation mark, reverse solidus, and U+0000..=U+001F are escaped;
/// the short forms (`\b`, `\f`, `\n`, `\r`, `\t`) are used where defined.
fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    // Most strings are already NFC; skip the allocation for those.
    if is_nfc(s) {
        emit_chars(s.chars(), output);
    } else {
        emit_chars(s.nfc(), output);
    }
    output.push('"');
}

fn emit_chars(chars: impl Iterator<Item = char>, output: &mut String) {
    for c in chars {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
}

fn emit_object(
    obj: &Map<String, Value>,
    output: &mut String,
    depth: usize,
) -> Result<(), CanonicalError> {
    let mut sorted_keys: Vec<&String> = obj.keys().collect();
    sorted_keys.sort();

    output.push('{');
    for (i, key) in sorted_keys.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(&obj[*key], output, depth + 1)?;
    }
    output.push('}');
    Ok(())
}
