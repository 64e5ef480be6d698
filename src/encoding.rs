//! Serialization layer: encode/decode opaque byte blobs, never
//! inspected by the storage adapter.
//!
//! `decode(encode(x)) == x` for every `ResultRecord`/`ExecutionRecord`
//! value. The wire format is JSON, which is self-describing by
//! construction; forward compatibility comes from the
//! `#[serde(flatten)] extra` field each entity carries (see model.rs).

use crate::error::ArchiveResult;
use serde::{de::DeserializeOwned, Serialize};

pub fn encode<T: Serialize>(value: &T) -> ArchiveResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode<T: DeserializeOwned>(blob: &[u8]) -> ArchiveResult<T> {
    Ok(serde_json::from_slice(blob)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultRecord;
    use crate::name::Name;
    use chrono::Utc;
    use std::collections::BTreeMap;

    #[test]
    fn round_trip() {
        let value = ResultRecord {
            name: Name::new("ns/default/results/abc"),
            id: "abc".to_string(),
            created_time: Utc::now(),
            annotations: BTreeMap::from([("k".to_string(), "v".to_string())]),
            etag: "e1".to_string(),
            extra: BTreeMap::new(),
        };
        let blob = encode(&value).unwrap();
        let decoded: ResultRecord = decode(&blob).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_failure_is_reported() {
        let err = decode::<ResultRecord>(b"not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
    }
}
