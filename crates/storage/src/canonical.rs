// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical JSON for content signatures.
//!
//! Object keys are emitted in sorted order at every depth so that the same
//! logical document always hashes identically, regardless of insertion
//! order upstream.

use serde_json::Value;

/// Serialize a value compactly with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String((*key).clone()), out);
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    match serde_json::to_string(value) {
        Ok(s) => out.push_str(&s),
        // Scalars always serialize; this arm is unreachable in practice.
        Err(_) => out.push_str("null"),
    }
}

#[cfg(test)]
#[path = "canonical_tests.rs"]
mod tests;
