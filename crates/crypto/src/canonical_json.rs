//! Canonical JSON serialization for signing.
//!
//! Object keys are sorted by code point at every depth, no insignificant
//! whitespace is emitted and only integers in the range ±(2^53 - 1) are
//! allowed. The output depends only on the logical value, never on the
//! insertion order of the maps it was built from.

use serde_json::Value;

use olmdev_shared::constants::MAX_CANONICAL_JSON_INTEGER;

use crate::error::CryptoError;

/// Top-level keys that never take part in a signature.
const UNSIGNED_FIELDS: [&str; 2] = ["signatures", "unsigned"];

/// Serialize `value` to its canonical JSON string.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    let mut out = String::new();
    write_value(value, &mut out)?;
    Ok(out)
}

/// Canonical form of the signable part of `value`: for objects the top-level
/// `signatures` and `unsigned` members are dropped first.
pub fn signable_json(value: &Value) -> Result<String, CryptoError> {
    match value {
        Value::Object(map) => {
            let mut stripped = map.clone();
            for field in UNSIGNED_FIELDS {
                stripped.remove(field);
            }
            canonical_json(&Value::Object(stripped))
        }
        other => canonical_json(other),
    }
}

fn write_value(value: &Value, out: &mut String) -> Result<(), CryptoError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let int = n
                .as_i64()
                .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
                .ok_or_else(|| {
                    CryptoError::InvalidCanonicalJson(format!("non-integer number: {n}"))
                })?;
            if !(-MAX_CANONICAL_JSON_INTEGER..=MAX_CANONICAL_JSON_INTEGER).contains(&int) {
                return Err(CryptoError::InvalidCanonicalJson(format!(
                    "integer out of range: {int}"
                )));
            }
            out.push_str(&int.to_string());
        }
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out)?;
                out.push(':');
                write_value(item, out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn write_string(s: &str, out: &mut String) -> Result<(), CryptoError> {
    // serde_json escapes only what JSON requires and keeps non-ASCII as UTF-8.
    out.push_str(&serde_json::to_string(s)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": true, "m": null}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"m":null,"z":true},"b":1}"#
        );
    }

    #[test]
    fn output_is_independent_of_insertion_order() {
        let mut first = serde_json::Map::new();
        first.insert("one".into(), json!(1));
        first.insert("two".into(), json!([2, "x"]));
        let mut second = serde_json::Map::new();
        second.insert("two".into(), json!([2, "x"]));
        second.insert("one".into(), json!(1));

        assert_eq!(
            canonical_json(&Value::Object(first)).unwrap(),
            canonical_json(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn emits_no_insignificant_whitespace() {
        let value = json!({"list": [1, 2, 3], "text": "a b"});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"list":[1,2,3],"text":"a b"}"#
        );
    }

    #[test]
    fn keeps_unicode_unescaped_and_escapes_quotes() {
        let value = json!({"k": "日本\"語"});
        assert_eq!(canonical_json(&value).unwrap(), "{\"k\":\"日本\\\"語\"}");
    }

    #[test]
    fn rejects_floating_point_numbers() {
        let value = json!({"pi": 3.14});
        assert!(matches!(
            canonical_json(&value),
            Err(CryptoError::InvalidCanonicalJson(_))
        ));
    }

    #[test]
    fn rejects_integers_outside_safe_range() {
        let value = json!({"big": 9_007_199_254_740_992_i64});
        assert!(canonical_json(&value).is_err());

        let ok = json!({"edge": -9_007_199_254_740_991_i64});
        assert_eq!(
            canonical_json(&ok).unwrap(),
            r#"{"edge":-9007199254740991}"#
        );
    }

    #[test]
    fn signable_json_drops_signatures_and_unsigned() {
        let value = json!({
            "device_id": "DEV",
            "signatures": {"@a:b": {"ed25519:DEV": "sig"}},
            "unsigned": {"age": 5}
        });
        assert_eq!(signable_json(&value).unwrap(), r#"{"device_id":"DEV"}"#);
    }

    #[test]
    fn signable_json_keeps_nested_signatures() {
        let value = json!({"inner": {"signatures": 1}});
        assert_eq!(
            signable_json(&value).unwrap(),
            r#"{"inner":{"signatures":1}}"#
        );
    }
}
