use crate::error::{CoreError, CoreResult};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const SIGNATURE_FIELD: &str = "signature";

/// Byte form a package producer signs: compact JSON with object keys sorted at every
/// depth. Only integer numbers are representable, so a manifest carrying a float has no
/// signing bytes at all.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let v = serde_json::to_value(value)?;
    let normalized = normalize_value(v)?;
    let s = serde_json::to_string(&normalized)?;
    Ok(s.into_bytes())
}

/// Bytes covered by a package signature: the manifest document without its `signature` key.
pub fn manifest_signing_bytes(document: &Value) -> CoreResult<Vec<u8>> {
    let Value::Object(map) = document else {
        return Err(CoreError::Canonicalization(
            "manifest document is not a JSON object".to_string(),
        ));
    };
    let mut unsigned = map.clone();
    unsigned.remove(SIGNATURE_FIELD);
    to_canonical_bytes(&Value::Object(unsigned))
}

fn normalize_value(v: Value) -> CoreResult<Value> {
    match v {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| normalize_value(v).map(|v| (k, v)))
                .collect::<CoreResult<_>>()?;
            // preserve_order is on, so insertion order is what gets written.
            Ok(Value::Object(sorted.into_iter().collect()))
        }
        Value::Array(arr) => arr
            .into_iter()
            .map(normalize_value)
            .collect::<CoreResult<Vec<_>>>()
            .map(Value::Array),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Ok(Value::Number(n))
            } else {
                Err(CoreError::Canonicalization(
                    "canonical JSON forbids non-integer numbers".to_string(),
                ))
            }
        }
        other => Ok(other),
    }
}
