//! The two entities of the data model.

use crate::name::Name;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from string key to string value. A `BTreeMap`, not a
/// `HashMap`, so merges and re-encodes are deterministic — the round-trip
/// property and stable diffing both want that.
pub type Annotations = BTreeMap<String, String>;

/// A logical grouping identified by a hierarchical name.
///
/// `name`, `id`, `created_time` are immutable after creation.
/// `etag` changes on every successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub name: Name,
    pub id: String,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub annotations: Annotations,
    pub etag: String,

    /// Unknown fields from a future schema version, preserved verbatim
    /// through decode -> mutate -> encode.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An opaque typed payload: a byte string plus a content-type tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

/// A child of exactly one Result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub name: Name,
    pub id: String,
    pub data: Data,
    pub etag: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Common shape the mutation service needs from both entities: a
/// name/etag pair, an immutability check against a prior version, and
/// the set of top-level field-mask roots Update will accept
/// (an unknown mask path is reported as not-found).
pub trait Entity: Serialize + serde::de::DeserializeOwned + Clone {
    fn name(&self) -> &Name;
    fn etag(&self) -> &str;
    fn set_etag(&mut self, etag: String);
    fn immutable_fields_match(&self, prior: &Self) -> bool;
    fn known_mask_roots() -> &'static [&'static str];
}

impl ResultRecord {
    /// Returns the immutable fields that a field-masked or whole-payload
    /// Update must not change.
    pub fn immutable_fields_match(&self, prior: &ResultRecord) -> bool {
        self.name == prior.name && self.id == prior.id && self.created_time == prior.created_time
    }
}

impl Entity for ResultRecord {
    fn name(&self) -> &Name {
        &self.name
    }
    fn etag(&self) -> &str {
        &self.etag
    }
    fn set_etag(&mut self, etag: String) {
        self.etag = etag;
    }
    fn immutable_fields_match(&self, prior: &Self) -> bool {
        ResultRecord::immutable_fields_match(self, prior)
    }
    fn known_mask_roots() -> &'static [&'static str] {
        &["annotations"]
    }
}

impl ExecutionRecord {
    pub fn immutable_fields_match(&self, prior: &ExecutionRecord) -> bool {
        self.name == prior.name && self.id == prior.id
    }
}

impl Entity for ExecutionRecord {
    fn name(&self) -> &Name {
        &self.name
    }
    fn etag(&self) -> &str {
        &self.etag
    }
    fn set_etag(&mut self, etag: String) {
        self.etag = etag;
    }
    fn immutable_fields_match(&self, prior: &Self) -> bool {
        ExecutionRecord::immutable_fields_match(self, prior)
    }
    fn known_mask_roots() -> &'static [&'static str] {
        &["data"]
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
