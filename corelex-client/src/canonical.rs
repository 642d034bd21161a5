//! Canonical payload encoding.
//!
//! Produces the exact bytes that get signed. Rules:
//! - compact JSON, no whitespace
//! - object keys sorted by their UTF-8 bytes, recursively
//! - arrays keep their order
//! - strings escaped the way `serde_json` escapes them
//! - integers in decimal; a float with no fractional part inside the
//!   exactly-representable range (|x| < 2^53) is written as an integer,
//!   any other float uses the shortest round-trip form
//! - `null` is kept; absent fields are simply not in the map
//! - nesting deeper than `MAX_DEPTH` is rejected

use serde::Serialize;
use serde_json::{Number, Value};

use crate::error::{ClientError, Result};

pub const MAX_DEPTH: usize = 64;

/// Largest magnitude at which every integer is exactly representable in f64
const EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Canonically encode a JSON value.
pub fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = String::new();
    write_value(value, 0, &mut out)?;
    Ok(out.into_bytes())
}

/// Convert any serde value to JSON, then canonically encode it.
pub fn encode_serializable<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(payload)
        .map_err(|e| ClientError::Encoding(format!("payload is not representable as JSON: {}", e)))?;
    encode(&value)
}

fn write_value(value: &Value, depth: usize, out: &mut String) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(ClientError::Encoding(format!(
            "payload nesting exceeds {} levels",
            MAX_DEPTH
        )));
    }

    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, depth + 1, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_value(val, depth + 1, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_number(n: &Number, out: &mut String) -> Result<()> {
    if let Some(i) = n.as_i64() {
        out.push_str(&i.to_string());
    } else if let Some(u) = n.as_u64() {
        out.push_str(&u.to_string());
    } else if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(ClientError::Encoding(format!("non-finite number {}", f)));
        }
        if f.fract() == 0.0 && f.abs() < EXACT_FLOAT_INT {
            // also folds -0.0 into 0
            out.push_str(&(f as i64).to_string());
        } else {
            out.push_str(&n.to_string());
        }
    } else {
        return Err(ClientError::Encoding(format!("unsupported number {}", n)));
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<()> {
    let escaped = serde_json::to_string(s)
        .map_err(|e| ClientError::Encoding(format!("failed to escape string: {}", e)))?;
    out.push_str(&escaped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn encode_str(value: &Value) -> String {
        String::from_utf8(encode(value).unwrap()).unwrap()
    }

    #[test]
    fn test_keys_sorted() {
        assert_eq!(encode_str(&json!({"z": 1, "a": 2, "m": 3})), r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_nested_objects_sorted() {
        assert_eq!(
            encode_str(&json!({"b": {"z": 1, "a": 2}, "a": 0})),
            r#"{"a":0,"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = serde_json::Map::new();
        first.insert("name".into(), json!("A"));
        first.insert("description".into(), json!("d"));
        first.insert("configuration".into(), json!({"prompt": "p", "model": "m"}));

        let mut second = serde_json::Map::new();
        second.insert("configuration".into(), json!({"model": "m", "prompt": "p"}));
        second.insert("description".into(), json!("d"));
        second.insert("name".into(), json!("A"));

        assert_eq!(
            encode(&Value::Object(first)).unwrap(),
            encode(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn test_keys_compare_bytewise() {
        // uppercase sorts before lowercase, multibyte after ASCII
        assert_eq!(
            encode_str(&json!({"b": 1, "B": 2, "é": 3, "a": 4})),
            r#"{"B":2,"a":4,"b":1,"é":3}"#
        );
    }

    #[test]
    fn test_arrays_preserve_order() {
        assert_eq!(encode_str(&json!([3, 1, 2])), "[3,1,2]");
    }

    #[test]
    fn test_strings_escaped() {
        assert_eq!(
            encode_str(&json!({"key": "value with \"quotes\"\n"})),
            r#"{"key":"value with \"quotes\"\n"}"#
        );
    }

    #[test]
    fn test_null_is_distinct_from_absent() {
        assert_eq!(encode_str(&json!({"a": null})), r#"{"a":null}"#);
        assert_eq!(encode_str(&json!({})), "{}");
    }

    #[test]
    fn test_whole_floats_normalize_to_integers() {
        assert_eq!(encode_str(&json!({"n": 1.0})), encode_str(&json!({"n": 1})));
        assert_eq!(encode_str(&json!(-0.0)), "0");
        assert_eq!(encode_str(&json!(2.5)), "2.5");
        assert_eq!(encode_str(&json!(0.1)), "0.1");
    }

    #[test]
    fn test_large_integers_exact() {
        assert_eq!(encode_str(&json!(u64::MAX)), "18446744073709551615");
        assert_eq!(encode_str(&json!(i64::MIN)), "-9223372036854775808");
    }

    #[test]
    fn test_depth_limit_enforced() {
        let mut value = json!(1);
        for _ in 0..=MAX_DEPTH {
            value = json!([value]);
        }
        assert!(matches!(encode(&value), Err(ClientError::Encoding(_))));
    }

    #[test]
    fn test_non_string_map_keys_rejected() {
        let mut map: HashMap<Vec<u8>, u32> = HashMap::new();
        map.insert(vec![1, 2], 3);
        assert!(matches!(encode_serializable(&map), Err(ClientError::Encoding(_))));
    }

    #[test]
    fn test_serializable_matches_value_path() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body {
            thread_id: &'static str,
            input: &'static str,
        }
        let bytes = encode_serializable(&Body {
            thread_id: "t",
            input: "hi",
        })
        .unwrap();
        assert_eq!(bytes, br#"{"input":"hi","threadId":"t"}"#.to_vec());
    }
}
