use std::collections::{BTreeMap, BTreeSet};

use shoal_types::{ShoalError, Value};

/// Value carried by a put: either a full replacement or a partial update.
///
/// The shape is fixed when the command is built; `perform` never inspects the
/// bytes to decide how to apply them.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Payload {
    Full(Value),
    Delta(Delta),
}

impl Payload {
    pub fn is_delta(&self) -> bool {
        matches!(self, Payload::Delta(_))
    }
}

/// Partial update merged against the current value of an entry.
///
/// Merges are order-sensitive and not idempotent: applying the same delta
/// twice builds on the output of the first application.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Delta {
    /// Append bytes to the current value (absent = empty).
    Append(Vec<u8>),
    /// Add to a big-endian i64 counter (absent = 0).
    Increment(i64),
    /// Upsert and delete fields of a bincode-encoded `BTreeMap<String, Vec<u8>>`.
    MapPatch {
        put: BTreeMap<String, Vec<u8>>,
        remove: BTreeSet<String>,
    },
}

impl Delta {
    pub fn merge(&self, base: Option<&[u8]>) -> Result<Value, ShoalError> {
        match self {
            Delta::Append(tail) => {
                let mut out = base.map(<[u8]>::to_vec).unwrap_or_default();
                out.extend_from_slice(tail);
                Ok(out)
            }
            Delta::Increment(by) => {
                let current = match base {
                    None => 0,
                    Some(bytes) => decode_counter(bytes)?,
                };
                let next = current.checked_add(*by).ok_or_else(|| {
                    ShoalError::DeltaMerge(format!("counter overflow: {current} + {by}"))
                })?;
                Ok(encode_counter(next))
            }
            Delta::MapPatch { put, remove } => {
                let mut map = match base {
                    None => BTreeMap::new(),
                    Some(bytes) => decode_map(bytes)?,
                };
                for field in remove {
                    map.remove(field);
                }
                for (field, value) in put {
                    map.insert(field.clone(), value.clone());
                }
                encode_map(&map)
            }
        }
    }
}

pub fn encode_counter(n: i64) -> Value {
    n.to_be_bytes().to_vec()
}

pub fn decode_counter(bytes: &[u8]) -> Result<i64, ShoalError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        ShoalError::DeltaMerge(format!("counter value must be 8 bytes, got {}", bytes.len()))
    })?;
    Ok(i64::from_be_bytes(arr))
}

pub fn encode_map(map: &BTreeMap<String, Vec<u8>>) -> Result<Value, ShoalError> {
    bincode::serde::encode_to_vec(map, bincode::config::standard())
        .map_err(|e| ShoalError::Serialization(e.to_string()))
}

pub fn decode_map(bytes: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, ShoalError> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(m, _)| m)
        .map_err(|e| ShoalError::DeltaMerge(format!("base is not a field map: {e}")))
}
